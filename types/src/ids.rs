//! Identifier types shared across the SDK.
//!
//! A node's [`NodeId`] is its stable identity on the ledger, distinct from
//! whatever transport address it is currently reachable at. A
//! [`TransactionId`] is the idempotency token of one logical operation: all
//! per-node replicas of a submitted transaction carry the same id, and the
//! network deduplicates on it.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ArkaError;

/// Stable identity of one ledger node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ArkaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(NodeId)
            .map_err(|_| ArkaError::InvalidId(format!("invalid node id: {s}")))
    }
}

/// Account paying for (and identified as the origin of) an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = ArkaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(AccountId)
            .map_err(|_| ArkaError::InvalidId(format!("invalid account id: {s}")))
    }
}

/// Idempotency token of one logical operation.
///
/// Combines the payer account, the wall-clock instant from which the
/// operation is valid, and a random nonce disambiguating ids generated
/// within the same nanosecond. Two replicas of one transaction targeting
/// different nodes share the same `TransactionId`; chunked payloads give
/// each chunk its own id plus a pointer back to the first chunk's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// Account that pays for and owns the operation.
    pub payer: AccountId,
    /// Start of the validity window, nanoseconds since the Unix epoch.
    pub valid_start_nanos: u64,
    /// Random disambiguator.
    pub nonce: u32,
}

impl TransactionId {
    /// Mint a fresh id for `payer`, valid from now.
    pub fn generate(payer: AccountId) -> Self {
        let valid_start_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Self {
            payer,
            valid_start_nanos,
            nonce: rand::thread_rng().gen(),
        }
    }

    /// Construct an explicit id, e.g. when replaying a recorded operation.
    pub fn new(payer: AccountId, valid_start_nanos: u64, nonce: u32) -> Self {
        Self {
            payer,
            valid_start_nanos,
            nonce,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.payer, self.valid_start_nanos, self.nonce)
    }
}

impl FromStr for TransactionId {
    type Err = ArkaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ArkaError::InvalidId(format!("invalid transaction id: {s}"));

        let (payer, rest) = s.split_once('@').ok_or_else(err)?;
        let (start, nonce) = rest.split_once('/').ok_or_else(err)?;

        Ok(Self {
            payer: payer.parse()?,
            valid_start_nanos: start.parse().map_err(|_| err())?,
            nonce: nonce.parse().map_err(|_| err())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_display_roundtrip() {
        let id = TransactionId::new(AccountId(42), 1_700_000_000_000_000_000, 7);
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = TransactionId::generate(AccountId(1));
        let b = TransactionId::generate(AccountId(1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_ids_rejected() {
        assert!("not-a-number".parse::<NodeId>().is_err());
        assert!("3@xyz/0".parse::<TransactionId>().is_err());
        assert!("3@100".parse::<TransactionId>().is_err());
    }
}
