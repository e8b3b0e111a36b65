//! Client error types.
//!
//! Node-level failures (transport errors, unhealthy nodes) are absorbed by
//! the execution engine and drive retry/backoff; only engine-level
//! exhaustion and fatal application responses reach the caller.

use arka_types::{NodeId, Status, TransactionId};
use thiserror::Error;

use crate::channel::TransportError;
use crate::proto::CodecError;
use crate::signer::KeyError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A single dispatch failed at the transport layer. Surfaced directly
    /// only as the `source` of an exhaustion error, once every candidate
    /// node has been tried.
    #[error("transport failure contacting node {node_id}: {source}")]
    Transport {
        node_id: NodeId,
        #[source]
        source: TransportError,
    },

    /// A node returned a well-formed response with a terminal status.
    #[error("operation failed with status {status:?} on node {node_id}")]
    OperationFailed {
        status: Status,
        node_id: NodeId,
        transaction_id: Option<TransactionId>,
    },

    /// The per-call deadline elapsed before any attempt finished.
    #[error("operation timed out; last node targeted: {last_node_id:?}")]
    Timeout {
        last_node_id: Option<NodeId>,
        #[source]
        source: Option<Box<Error>>,
    },

    /// The attempt budget ran out before any attempt finished.
    #[error("exceeded {attempts} attempts; last node targeted: {last_node_id:?}")]
    MaxAttempts {
        attempts: usize,
        last_node_id: Option<NodeId>,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Every candidate node is inside its backoff window and waiting out
    /// the soonest window would overrun the deadline.
    #[error("all candidate nodes are backed off: {node_ids:?}")]
    AllNodesUnhealthy { node_ids: Vec<NodeId> },

    /// The operation resolved to an empty target-node list.
    #[error("no target nodes available for request")]
    EmptyNodeList,

    /// Splitting the payload would produce more chunks than allowed.
    #[error("payload requires {required} chunks, above the configured maximum {max}")]
    ChunkCountExceeded { required: usize, max: usize },

    /// A request was built for a node the operation does not target.
    #[error("node {0} is not a target of this operation")]
    NotATargetNode(NodeId),

    /// `add_signature` is only sound when the transaction targets one node.
    #[error("adding a precomputed signature requires exactly one target node, found {0}")]
    SignatureTargetsMultipleNodes(usize),

    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("key error: {0}")]
    Key(#[from] KeyError),
}
