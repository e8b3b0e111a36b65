//! Wire format for requests and responses.
//!
//! Everything crossing a [`Channel`](crate::Channel) is bincode-encoded.
//! Encoding is deterministic: the same logical content always produces the
//! same bytes, which is what makes signatures stable across re-serialization
//! and idempotency-token comparison meaningful.
//!
//! Operation payloads form a closed set. The mapping from wire discriminator
//! to decoder lives in [`OPERATION_TABLE`], a statically initialized lookup
//! table, so decoding never depends on runtime registration order.

use arka_types::{NodeId, Status, TransactionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service routing names, shared by the engine and channel implementations.
pub const TRANSACTION_SERVICE: &str = "arka.TransactionService";
pub const METHOD_SUBMIT: &str = "submitTransaction";
pub const QUERY_SERVICE: &str = "arka.QueryService";
pub const METHOD_QUERY: &str = "query";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("unknown operation discriminator {0}")]
    UnknownOperation(u16),
}

/// Canonical serialization. Deterministic for a fixed value.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Inverse of [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

// ========== Operation payloads (closed set) ==========

/// Store a keyed blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStore {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Append opaque bytes to a stream. Chunkable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSubmit {
    pub stream: u64,
    pub contents: Vec<u8>,
}

/// Update a named network setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlUpdate {
    pub setting: String,
    pub value: Vec<u8>,
}

/// The business payload of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationData {
    DataStore(DataStore),
    DataSubmit(DataSubmit),
    ControlUpdate(ControlUpdate),
}

impl OperationData {
    pub fn data_store(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        OperationData::DataStore(DataStore {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn data_submit(stream: u64, contents: impl Into<Vec<u8>>) -> Self {
        OperationData::DataSubmit(DataSubmit {
            stream,
            contents: contents.into(),
        })
    }

    pub fn control_update(setting: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        OperationData::ControlUpdate(ControlUpdate {
            setting: setting.into(),
            value: value.into(),
        })
    }

    /// Wire discriminator for this payload.
    pub fn wire_code(&self) -> u16 {
        match self {
            OperationData::DataStore(_) => codes::DATA_STORE,
            OperationData::DataSubmit(_) => codes::DATA_SUBMIT,
            OperationData::ControlUpdate(_) => codes::CONTROL_UPDATE,
        }
    }

    /// Encode the payload without its discriminator.
    pub fn to_payload_bytes(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            OperationData::DataStore(op) => encode(op),
            OperationData::DataSubmit(op) => encode(op),
            OperationData::ControlUpdate(op) => encode(op),
        }
    }
}

/// Wire discriminators. Part of the network protocol; never renumber.
pub mod codes {
    pub const DATA_STORE: u16 = 1;
    pub const DATA_SUBMIT: u16 = 2;
    pub const CONTROL_UPDATE: u16 = 3;
}

/// One row of the operation registry.
pub struct OperationCodec {
    pub code: u16,
    pub name: &'static str,
    pub decode: fn(&[u8]) -> Result<OperationData, CodecError>,
}

/// Closed, statically initialized registry of operation kinds.
pub static OPERATION_TABLE: &[OperationCodec] = &[
    OperationCodec {
        code: codes::DATA_STORE,
        name: "DataStore",
        decode: |bytes| decode::<DataStore>(bytes).map(OperationData::DataStore),
    },
    OperationCodec {
        code: codes::DATA_SUBMIT,
        name: "DataSubmit",
        decode: |bytes| decode::<DataSubmit>(bytes).map(OperationData::DataSubmit),
    },
    OperationCodec {
        code: codes::CONTROL_UPDATE,
        name: "ControlUpdate",
        decode: |bytes| decode::<ControlUpdate>(bytes).map(OperationData::ControlUpdate),
    },
];

/// Decode an operation payload by its wire discriminator.
pub fn decode_operation(code: u16, payload: &[u8]) -> Result<OperationData, CodecError> {
    OPERATION_TABLE
        .iter()
        .find(|entry| entry.code == code)
        .ok_or(CodecError::UnknownOperation(code))
        .and_then(|entry| (entry.decode)(payload))
}

// ========== Transaction wire types ==========

/// Chunk-sequence pointer carried by every chunk of an oversized payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Idempotency token of the first chunk; ties the sequence together.
    pub initial_transaction_id: TransactionId,
    /// Zero-based position in the sequence.
    pub index: u32,
    /// Total number of chunks.
    pub count: u32,
}

/// The signable content of one per-node transaction replica.
///
/// Replicas of one logical transaction differ only in `node_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub transaction_id: TransactionId,
    pub node_id: NodeId,
    pub max_fee: u64,
    pub valid_duration_secs: u64,
    pub memo: String,
    pub operation_code: u16,
    pub operation_bytes: Vec<u8>,
    pub chunk: Option<ChunkInfo>,
}

impl TransactionBody {
    /// Decode the business payload through the operation registry.
    pub fn operation(&self) -> Result<OperationData, CodecError> {
        decode_operation(self.operation_code, &self.operation_bytes)
    }
}

/// A public key and its signature over a body's canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePair {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// The unit actually submitted to a node: canonical body bytes plus all
/// collected signatures over exactly those bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub body_bytes: Vec<u8>,
    pub signatures: Vec<SignaturePair>,
}

/// A node's response to a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAck {
    pub status: Status,
}

// ========== Query wire types ==========

/// A read-only request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub operation_code: u16,
    pub operation_bytes: Vec<u8>,
}

/// A node's response to a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAck {
    pub status: Status,
    pub payload: Vec<u8>,
}
