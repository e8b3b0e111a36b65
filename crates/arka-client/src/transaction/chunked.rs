//! Splitting oversized payloads into ordered chunks.
//!
//! Each chunk is a full transaction with its own idempotency token plus a
//! pointer back to the first chunk's token, so the network can reassemble
//! the sequence. Chunks execute sequentially; a failed chunk aborts the
//! remainder.

use std::sync::Arc;
use std::time::Duration;

use arka_types::{NodeId, TransactionId};
use tracing::debug;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::proto::{ChunkInfo, OperationData};
use crate::signer::Signer;
use crate::transaction::{FrozenTransaction, Transaction, TransactionResult};

/// Builder for a stream append too large for a single transaction.
pub struct ChunkedTransaction {
    stream: u64,
    contents: Vec<u8>,
    memo: String,
    max_fee: Option<u64>,
    valid_duration_secs: Option<u64>,
    node_ids: Option<Vec<NodeId>>,
    chunk_size: Option<usize>,
    max_chunks: Option<usize>,
    signers: Vec<Arc<dyn Signer>>,
}

impl ChunkedTransaction {
    pub fn new(stream: u64, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            stream,
            contents: contents.into(),
            memo: String::new(),
            max_fee: None,
            valid_duration_secs: None,
            node_ids: None,
            chunk_size: None,
            max_chunks: None,
            signers: Vec::new(),
        }
    }

    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn max_fee(mut self, max_fee: u64) -> Self {
        self.max_fee = Some(max_fee);
        self
    }

    pub fn valid_duration_secs(mut self, secs: u64) -> Self {
        self.valid_duration_secs = Some(secs);
        self
    }

    pub fn node_ids(mut self, node_ids: Vec<NodeId>) -> Self {
        self.node_ids = Some(node_ids);
        self
    }

    /// Override the configured payload bytes per chunk.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Override the configured chunk-count cap.
    pub fn max_chunks(mut self, max: usize) -> Self {
        self.max_chunks = Some(max);
        self
    }

    /// Every chunk is signed by every registered signer.
    pub fn sign(self, signer: impl Signer + 'static) -> Self {
        self.sign_with(Arc::new(signer))
    }

    pub fn sign_with(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signers.push(signer);
        self
    }

    /// Split and freeze into an ordered chunk sequence.
    ///
    /// Content of size `S` with chunk size `C` yields `ceil(S/C)` chunks
    /// (one for empty content); concatenating chunk payloads in index order
    /// reconstructs the content exactly. Fails fast when the sequence would
    /// exceed the chunk-count cap.
    pub fn freeze(self, client: &Client) -> Result<Vec<FrozenTransaction>> {
        let chunk_size = self.chunk_size.unwrap_or(client.config().chunk_size);
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be nonzero".into()));
        }
        let max_chunks = self.max_chunks.unwrap_or(client.config().max_chunks);

        let count = if self.contents.is_empty() {
            1
        } else {
            self.contents.len().div_ceil(chunk_size)
        };
        if count > max_chunks {
            return Err(Error::ChunkCountExceeded {
                required: count,
                max: max_chunks,
            });
        }

        let node_ids = match &self.node_ids {
            Some(ids) => ids.clone(),
            None => client.network().node_ids_for_request(None),
        };

        let payer = client.operator().account;
        let initial = TransactionId::generate(payer);
        debug!(%initial, count, chunk_size, "freezing chunked transaction");

        let mut chunks = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(self.contents.len());
            let piece = self.contents[start..end].to_vec();

            let id = if index == 0 {
                initial
            } else {
                TransactionId::generate(payer)
            };

            let mut builder = Transaction::new(OperationData::data_submit(self.stream, piece))
                .memo(self.memo.clone())
                .chunk_info(ChunkInfo {
                    initial_transaction_id: initial,
                    index: index as u32,
                    count: count as u32,
                });
            if let Some(max_fee) = self.max_fee {
                builder = builder.max_fee(max_fee);
            }
            if let Some(secs) = self.valid_duration_secs {
                builder = builder.valid_duration_secs(secs);
            }

            let mut frozen = builder.freeze_with(id, node_ids.clone())?;
            for signer in &self.signers {
                frozen = frozen.sign_with(Arc::clone(signer));
            }
            chunks.push(frozen);
        }
        Ok(chunks)
    }

    /// Freeze and execute every chunk in order, stopping at the first
    /// failure.
    pub async fn execute_all(
        self,
        client: &Client,
        timeout: Option<Duration>,
    ) -> Result<Vec<TransactionResult>> {
        let mut chunks = self.freeze(client)?;
        let mut results = Vec::with_capacity(chunks.len());
        for chunk in &mut chunks {
            results.push(chunk.execute(client, timeout).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use arka_types::AccountId;
    use async_trait::async_trait;

    use super::*;
    use crate::channel::{Channel, ChannelFactory, TransportError};
    use crate::client::Operator;
    use crate::config::ClientConfig;
    use crate::node::NodeAddress;
    use crate::proto::{self, TransactionBody};
    use crate::signer::PrivateKey;

    struct NullChannel;

    #[async_trait]
    impl Channel for NullChannel {
        async fn dispatch(
            &self,
            _service: &str,
            _method: &str,
            _request: &[u8],
        ) -> std::result::Result<Vec<u8>, TransportError> {
            Err(TransportError::Closed)
        }
    }

    fn client() -> Client {
        let factory: ChannelFactory = Arc::new(|_| Arc::new(NullChannel) as Arc<dyn Channel>);
        let entries: HashMap<_, _> = (0..3)
            .map(|i| (NodeId(i), NodeAddress::new(format!("10.0.0.{i}"), Some(50211))))
            .collect();
        Client::with_channel_factory(
            factory,
            entries,
            Operator::new(AccountId(2), PrivateKey::from_bytes(&[2u8; 32]).unwrap()),
            ClientConfig::default(),
        )
    }

    fn chunk_contents(chunk: &mut FrozenTransaction) -> Vec<u8> {
        let node = chunk.node_ids()[0];
        let body: TransactionBody = proto::decode(&chunk.body_bytes(node).unwrap()).unwrap();
        match body.operation().unwrap() {
            OperationData::DataSubmit(op) => op.contents,
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn test_chunk_count_is_ceiling_of_size_over_chunk_size() {
        let client = client();
        for (size, chunk_size, expected) in [(10, 4, 3), (8, 4, 2), (1, 4, 1), (4, 4, 1)] {
            let chunks = ChunkedTransaction::new(1, vec![0u8; size])
                .chunk_size(chunk_size)
                .freeze(&client)
                .unwrap();
            assert_eq!(chunks.len(), expected, "size {size} chunk {chunk_size}");
        }

        // Empty content still produces one chunk.
        let chunks = ChunkedTransaction::new(1, Vec::new()).freeze(&client).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_chunks_reconstruct_content_in_order() {
        let client = client();
        let contents: Vec<u8> = (0..=255).collect();

        let mut chunks = ChunkedTransaction::new(9, contents.clone())
            .chunk_size(100)
            .freeze(&client)
            .unwrap();
        assert_eq!(chunks.len(), 3);

        let mut reassembled = Vec::new();
        for (index, chunk) in chunks.iter_mut().enumerate() {
            let node = chunk.node_ids()[0];
            let body: TransactionBody = proto::decode(&chunk.body_bytes(node).unwrap()).unwrap();
            let info = body.chunk.unwrap();
            assert_eq!(info.index, index as u32);
            assert_eq!(info.count, 3);
            reassembled.extend(chunk_contents(chunk));
        }
        assert_eq!(reassembled, contents);
    }

    #[test]
    fn test_chunks_share_initial_id_but_own_identities() {
        let client = client();
        let mut chunks = ChunkedTransaction::new(3, vec![0u8; 10])
            .chunk_size(4)
            .freeze(&client)
            .unwrap();

        let initial = chunks[0].transaction_id();
        let mut seen = vec![initial];
        for chunk in chunks.iter_mut().skip(1) {
            let id = chunk.transaction_id();
            assert!(!seen.contains(&id), "chunk ids must be distinct");
            seen.push(id);
        }
        for chunk in chunks.iter_mut() {
            let node = chunk.node_ids()[0];
            let body: TransactionBody = proto::decode(&chunk.body_bytes(node).unwrap()).unwrap();
            assert_eq!(body.chunk.unwrap().initial_transaction_id, initial);
        }
    }

    #[test]
    fn test_chunk_cap_fails_fast() {
        let client = client();
        let result = ChunkedTransaction::new(1, vec![0u8; 100])
            .chunk_size(10)
            .max_chunks(5)
            .freeze(&client);
        assert!(matches!(
            result,
            Err(Error::ChunkCountExceeded { required: 10, max: 5 })
        ));
    }

    #[test]
    fn test_signers_apply_to_every_chunk() {
        let client = client();
        let key = PrivateKey::from_bytes(&[8u8; 32]).unwrap();

        let mut chunks = ChunkedTransaction::new(1, vec![0u8; 8])
            .chunk_size(4)
            .sign(key.clone())
            .freeze(&client)
            .unwrap();

        for chunk in chunks.iter_mut() {
            let node = chunk.node_ids()[0];
            let payload = chunk.signed_payload(node).unwrap();
            assert_eq!(payload.signatures.len(), 1);
            assert!(key
                .public_key()
                .verify(&payload.body_bytes, &payload.signatures[0].signature));
        }
    }
}
