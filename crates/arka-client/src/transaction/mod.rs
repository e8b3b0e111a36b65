//! Transaction lifecycle: mutable construction, freezing, signing,
//! serialization, execution.
//!
//! A [`Transaction`] is the mutable builder. Freezing consumes it and
//! returns a [`FrozenTransaction`]: the logical identity (transaction id,
//! fee, memo, validity window, node list) can no longer change, and one
//! independently signable body exists per target node, differing from its
//! siblings only in the node field. After freezing, the only permitted
//! mutation is appending signatures.
//!
//! Serialization is memoized per node index and invalidated whenever a
//! signature is appended; rebuilding unchanged input is byte-identical
//! because the codec and ed25519 signing are both deterministic.

mod chunked;

pub use chunked::ChunkedTransaction;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arka_types::{NodeId, Status, TransactionId};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::execution::{Execute, Outcome};
use crate::proto::{
    self, ChunkInfo, OperationData, SignaturePair, SignedTransaction, TransactionAck,
    TransactionBody,
};
use crate::signer::{PublicKey, Signer};

/// Default fee ceiling, in base units of the network's fee token.
pub const DEFAULT_MAX_FEE: u64 = 100_000_000;

/// Default validity window, seconds.
pub const DEFAULT_VALID_DURATION_SECS: u64 = 120;

/// Mutable transaction under construction.
pub struct Transaction {
    operation: OperationData,
    memo: String,
    max_fee: u64,
    valid_duration_secs: u64,
    transaction_id: Option<TransactionId>,
    node_ids: Option<Vec<NodeId>>,
    chunk: Option<ChunkInfo>,
}

impl Transaction {
    pub fn new(operation: OperationData) -> Self {
        Self {
            operation,
            memo: String::new(),
            max_fee: DEFAULT_MAX_FEE,
            valid_duration_secs: DEFAULT_VALID_DURATION_SECS,
            transaction_id: None,
            node_ids: None,
            chunk: None,
        }
    }

    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn max_fee(mut self, max_fee: u64) -> Self {
        self.max_fee = max_fee;
        self
    }

    pub fn valid_duration_secs(mut self, secs: u64) -> Self {
        self.valid_duration_secs = secs;
        self
    }

    /// Use an explicit transaction id instead of minting one at freeze
    /// time. Explicit ids are never regenerated by the engine.
    pub fn transaction_id(mut self, id: TransactionId) -> Self {
        self.transaction_id = Some(id);
        self
    }

    /// Pin the target nodes instead of deriving them from the network.
    pub fn node_ids(mut self, node_ids: Vec<NodeId>) -> Self {
        self.node_ids = Some(node_ids);
        self
    }

    pub(crate) fn chunk_info(mut self, chunk: ChunkInfo) -> Self {
        self.chunk = Some(chunk);
        self
    }

    /// Freeze against a client: the payer is the client's operator and the
    /// target nodes, unless pinned, are the network's current selection.
    pub fn freeze(self, client: &Client) -> Result<FrozenTransaction> {
        let payer = client.operator().account;
        let node_ids = match &self.node_ids {
            Some(ids) => ids.clone(),
            None => client.network().node_ids_for_request(None),
        };
        let (id, minted) = match self.transaction_id {
            Some(id) => (id, false),
            None => (TransactionId::generate(payer), true),
        };
        self.freeze_inner(id, minted, node_ids)
    }

    /// Freeze with a fully explicit identity and node list.
    pub fn freeze_with(self, transaction_id: TransactionId, node_ids: Vec<NodeId>) -> Result<FrozenTransaction> {
        self.freeze_inner(transaction_id, false, node_ids)
    }

    fn freeze_inner(
        self,
        transaction_id: TransactionId,
        regenerable: bool,
        node_ids: Vec<NodeId>,
    ) -> Result<FrozenTransaction> {
        if node_ids.is_empty() {
            return Err(Error::EmptyNodeList);
        }

        let count = node_ids.len();
        Ok(FrozenTransaction {
            operation_code: self.operation.wire_code(),
            operation_bytes: self.operation.to_payload_bytes()?,
            memo: self.memo,
            max_fee: self.max_fee,
            valid_duration_secs: self.valid_duration_secs,
            chunk: self.chunk,
            transaction_id,
            regenerable,
            node_ids,
            signers: Vec::new(),
            signer_keys: HashSet::new(),
            extra_signatures: Vec::new(),
            body_cache: vec![None; count],
            serialized_cache: vec![None; count],
        })
    }
}

/// Outcome of a successfully submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionResult {
    /// Idempotency token the network accepted.
    pub transaction_id: TransactionId,
    /// Node that accepted the submission.
    pub node_id: NodeId,
}

/// An immutable, per-node-replicated, signable transaction.
pub struct FrozenTransaction {
    operation_code: u16,
    operation_bytes: Vec<u8>,
    memo: String,
    max_fee: u64,
    valid_duration_secs: u64,
    chunk: Option<ChunkInfo>,

    transaction_id: TransactionId,
    /// True when `freeze` minted the id itself; only such ids may be
    /// regenerated after a `TransactionExpired` response.
    regenerable: bool,
    node_ids: Vec<NodeId>,

    signers: Vec<Arc<dyn Signer>>,
    signer_keys: HashSet<PublicKey>,
    /// Precomputed signatures appended via `add_signature`.
    extra_signatures: Vec<SignaturePair>,

    body_cache: Vec<Option<Vec<u8>>>,
    serialized_cache: Vec<Option<Vec<u8>>>,
}

impl FrozenTransaction {
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    /// Public keys that have signed (or will lazily sign) this transaction.
    pub fn signer_public_keys(&self) -> Vec<PublicKey> {
        self.signers
            .iter()
            .map(|signer| signer.public_key())
            .chain(
                self.extra_signatures
                    .iter()
                    .filter_map(|pair| PublicKey::from_bytes(&pair.public_key).ok()),
            )
            .collect()
    }

    /// Append a signer. Signing twice with the same key is a no-op.
    pub fn sign(self, signer: impl Signer + 'static) -> Self {
        self.sign_with(Arc::new(signer))
    }

    /// Append a boxed signing capability (e.g. an HSM-backed signer).
    pub fn sign_with(mut self, signer: Arc<dyn Signer>) -> Self {
        let key = signer.public_key();
        if !self.signer_keys.insert(key) {
            return self;
        }
        self.signers.push(signer);
        self.invalidate_serialized();
        self
    }

    /// Append a precomputed signature over this transaction's single body.
    ///
    /// Only valid when exactly one node is targeted: a raw signature cannot
    /// be re-derived for the other per-node bodies. Disables id
    /// regeneration for the same reason.
    pub fn add_signature(mut self, public_key: PublicKey, signature: Vec<u8>) -> Result<Self> {
        if self.node_ids.len() != 1 {
            return Err(Error::SignatureTargetsMultipleNodes(self.node_ids.len()));
        }
        if !self.signer_keys.insert(public_key) {
            return Ok(self);
        }
        self.extra_signatures.push(SignaturePair {
            public_key: public_key.to_bytes().to_vec(),
            signature,
        });
        self.regenerable = false;
        self.invalidate_serialized();
        Ok(self)
    }

    fn invalidate_serialized(&mut self) {
        for slot in &mut self.serialized_cache {
            *slot = None;
        }
    }

    fn index_of(&self, node_id: NodeId) -> Result<usize> {
        self.node_ids
            .iter()
            .position(|id| *id == node_id)
            .ok_or(Error::NotATargetNode(node_id))
    }

    fn body(&self, index: usize) -> TransactionBody {
        TransactionBody {
            transaction_id: self.transaction_id,
            node_id: self.node_ids[index],
            max_fee: self.max_fee,
            valid_duration_secs: self.valid_duration_secs,
            memo: self.memo.clone(),
            operation_code: self.operation_code,
            operation_bytes: self.operation_bytes.clone(),
            chunk: self.chunk,
        }
    }

    /// Canonical body bytes for one target node. Memoized.
    pub fn body_bytes(&mut self, node_id: NodeId) -> Result<Vec<u8>> {
        let index = self.index_of(node_id)?;
        self.body_bytes_at(index)
    }

    fn body_bytes_at(&mut self, index: usize) -> Result<Vec<u8>> {
        if let Some(bytes) = &self.body_cache[index] {
            return Ok(bytes.clone());
        }
        let bytes = proto::encode(&self.body(index))?;
        self.body_cache[index] = Some(bytes.clone());
        Ok(bytes)
    }

    /// The fully signed payload for one target node, as decoded structure.
    pub fn signed_payload(&mut self, node_id: NodeId) -> Result<SignedTransaction> {
        let index = self.index_of(node_id)?;
        self.signed_payload_at(index)
    }

    fn signed_payload_at(&mut self, index: usize) -> Result<SignedTransaction> {
        let body_bytes = self.body_bytes_at(index)?;
        let mut signatures: Vec<SignaturePair> = self
            .signers
            .iter()
            .map(|signer| SignaturePair {
                public_key: signer.public_key().to_bytes().to_vec(),
                signature: signer.sign(&body_bytes),
            })
            .collect();
        signatures.extend(self.extra_signatures.iter().cloned());
        Ok(SignedTransaction {
            body_bytes,
            signatures,
        })
    }

    /// One signed payload per target node, parallel to `node_ids`.
    pub fn signed_payloads(&mut self) -> Result<Vec<SignedTransaction>> {
        (0..self.node_ids.len())
            .map(|index| self.signed_payload_at(index))
            .collect()
    }

    /// Wire bytes for one target node. Memoized until a signature is
    /// appended; unchanged input rebuilds byte-identically.
    pub fn to_bytes(&mut self, node_id: NodeId) -> Result<Vec<u8>> {
        let index = self.index_of(node_id)?;
        self.to_bytes_at(index)
    }

    fn to_bytes_at(&mut self, index: usize) -> Result<Vec<u8>> {
        if let Some(bytes) = &self.serialized_cache[index] {
            return Ok(bytes.clone());
        }
        let payload = self.signed_payload_at(index)?;
        let bytes = proto::encode(&payload)?;
        self.serialized_cache[index] = Some(bytes.clone());
        Ok(bytes)
    }

    /// Submit through the retry engine.
    pub async fn execute(&mut self, client: &Client, timeout: Option<Duration>) -> Result<TransactionResult> {
        client.execute(self, timeout).await
    }
}

impl Execute for FrozenTransaction {
    type Response = TransactionResult;

    fn service(&self) -> &'static str {
        proto::TRANSACTION_SERVICE
    }

    fn method(&self) -> &'static str {
        proto::METHOD_SUBMIT
    }

    fn node_ids(&self) -> Option<Vec<NodeId>> {
        Some(self.node_ids.clone())
    }

    fn transaction_id(&self) -> Option<TransactionId> {
        Some(self.transaction_id)
    }

    fn make_request(&mut self, node_id: NodeId) -> Result<Vec<u8>> {
        let index = self.index_of(node_id)?;
        self.to_bytes_at(index)
    }

    fn classify(&self, response: &[u8]) -> Result<Outcome> {
        let ack: TransactionAck = proto::decode(response)?;
        Ok(match ack.status {
            Status::Ok => Outcome::Finished,
            status if status.is_retryable() => Outcome::Retry(status),
            // An expired id is recoverable iff we minted it ourselves.
            Status::TransactionExpired if self.regenerable => Outcome::Retry(ack.status),
            status => Outcome::Error(status),
        })
    }

    fn map_response(&mut self, _response: Vec<u8>, node_id: NodeId) -> Result<TransactionResult> {
        Ok(TransactionResult {
            transaction_id: self.transaction_id,
            node_id,
        })
    }

    fn should_regenerate(&self, status: Status) -> bool {
        status == Status::TransactionExpired && self.regenerable
    }

    fn regenerate_transaction_id(&mut self) -> Result<()> {
        self.transaction_id = TransactionId::generate(self.transaction_id.payer);
        // Every cached byte form embedded the old id.
        for slot in &mut self.body_cache {
            *slot = None;
        }
        self.invalidate_serialized();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use arka_types::AccountId;

    use super::*;
    use crate::signer::PrivateKey;

    fn frozen(nodes: &[u64]) -> FrozenTransaction {
        Transaction::new(OperationData::data_store(b"k".to_vec(), b"v".to_vec()))
            .memo("test")
            .freeze_with(
                TransactionId::new(AccountId(7), 1_000, 1),
                nodes.iter().copied().map(NodeId).collect(),
            )
            .unwrap()
    }

    #[test]
    fn test_freeze_requires_a_target_node() {
        let result = Transaction::new(OperationData::data_store(b"k".to_vec(), b"v".to_vec()))
            .freeze_with(TransactionId::new(AccountId(7), 1_000, 1), Vec::new());
        assert!(matches!(result, Err(Error::EmptyNodeList)));
    }

    #[test]
    fn test_replicas_differ_only_in_node_field() {
        let mut tx = frozen(&[1, 2, 3]);
        let payloads = tx.signed_payloads().unwrap();
        assert_eq!(payloads.len(), 3);

        let bodies: Vec<TransactionBody> = payloads
            .iter()
            .map(|p| proto::decode(&p.body_bytes).unwrap())
            .collect();

        for (body, expected_node) in bodies.iter().zip([1, 2, 3]) {
            assert_eq!(body.node_id, NodeId(expected_node));
            // Identity fields are shared across replicas.
            assert_eq!(body.transaction_id, bodies[0].transaction_id);
            assert_eq!(body.memo, bodies[0].memo);
            assert_eq!(body.max_fee, bodies[0].max_fee);
            assert_eq!(body.operation_bytes, bodies[0].operation_bytes);
        }
    }

    #[test]
    fn test_signing_is_idempotent_per_key() {
        let key = PrivateKey::from_bytes(&[3u8; 32]).unwrap();

        let mut tx = frozen(&[1, 2]).sign(key.clone());
        let first = tx.to_bytes(NodeId(1)).unwrap();

        let mut tx = frozen(&[1, 2]).sign(key.clone()).sign(key.clone());
        let second = tx.to_bytes(NodeId(1)).unwrap();

        assert_eq!(first, second);
        assert_eq!(tx.signer_public_keys().len(), 1);
    }

    #[test]
    fn test_reserialization_is_byte_stable() {
        let key = PrivateKey::from_bytes(&[5u8; 32]).unwrap();
        let mut tx = frozen(&[1, 2]).sign(key);

        let a = tx.to_bytes(NodeId(2)).unwrap();
        let b = tx.to_bytes(NodeId(2)).unwrap();
        assert_eq!(a, b);

        // Even after the memoized form is dropped, the rebuild matches.
        tx.serialized_cache[1] = None;
        let c = tx.to_bytes(NodeId(2)).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_appending_signature_invalidates_cache() {
        let alice = PrivateKey::from_bytes(&[1u8; 32]).unwrap();
        let bob = PrivateKey::from_bytes(&[2u8; 32]).unwrap();

        let mut tx = frozen(&[1]).sign(alice);
        let before = tx.to_bytes(NodeId(1)).unwrap();

        let mut tx = tx.sign(bob);
        let after = tx.to_bytes(NodeId(1)).unwrap();

        assert_ne!(before, after);
        let payload = tx.signed_payload(NodeId(1)).unwrap();
        assert_eq!(payload.signatures.len(), 2);
    }

    #[test]
    fn test_signatures_verify_against_body_bytes() {
        let key = PrivateKey::from_bytes(&[9u8; 32]).unwrap();
        let mut tx = frozen(&[1, 2]).sign(key.clone());

        for node in [NodeId(1), NodeId(2)] {
            let payload = tx.signed_payload(node).unwrap();
            assert_eq!(payload.signatures.len(), 1);
            assert!(key
                .public_key()
                .verify(&payload.body_bytes, &payload.signatures[0].signature));
        }
    }

    #[test]
    fn test_add_signature_requires_single_node() {
        let key = PrivateKey::from_bytes(&[4u8; 32]).unwrap();
        let mut single = frozen(&[1]);
        let sig = key.sign(&single.body_bytes(NodeId(1)).unwrap());

        let result = frozen(&[1, 2]).add_signature(key.public_key(), sig.clone());
        assert!(matches!(
            result,
            Err(Error::SignatureTargetsMultipleNodes(2))
        ));

        let mut tx = single.add_signature(key.public_key(), sig).unwrap();
        let payload = tx.signed_payload(NodeId(1)).unwrap();
        assert!(key
            .public_key()
            .verify(&payload.body_bytes, &payload.signatures[0].signature));
    }

    #[test]
    fn test_regeneration_changes_id_and_bytes() {
        let client_minted = Transaction::new(OperationData::data_submit(1, b"x".to_vec()));
        // freeze_with is explicit, so regeneration is off; emulate the
        // minted path directly through freeze_inner's public surface.
        let mut tx = client_minted
            .freeze_with(TransactionId::new(AccountId(7), 1_000, 1), vec![NodeId(1)])
            .unwrap();
        assert!(!tx.should_regenerate(Status::TransactionExpired));

        tx.regenerable = true;
        assert!(tx.should_regenerate(Status::TransactionExpired));

        let old_id = tx.transaction_id();
        let before = tx.to_bytes(NodeId(1)).unwrap();
        tx.regenerate_transaction_id().unwrap();
        assert_ne!(tx.transaction_id(), old_id);
        assert_ne!(tx.to_bytes(NodeId(1)).unwrap(), before);
    }

    #[test]
    fn test_expired_is_terminal_for_explicit_ids() {
        let tx = frozen(&[1]);
        let ack = proto::encode(&TransactionAck {
            status: Status::TransactionExpired,
        })
        .unwrap();
        assert_eq!(
            tx.classify(&ack).unwrap(),
            Outcome::Error(Status::TransactionExpired)
        );
    }
}
