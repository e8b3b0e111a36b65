//! Response status taxonomy.

use serde::{Deserialize, Serialize};

/// Application-level outcome of a request, as reported by a node.
///
/// This is the well-formed-response half of the error model: transport
/// failures never reach this type. Which statuses are retried and which are
/// terminal is decided by the operation being executed; `is_retryable` only
/// captures the statuses that are transient for every operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Request accepted.
    Ok,
    /// Node is momentarily overloaded; safe to retry.
    Busy,
    /// Node is up but not yet serving requests; safe to retry.
    PlatformNotActive,
    /// Queried record is not yet available; safe to retry on the query path.
    RecordNotFound,
    /// The transaction id was already used.
    DuplicateTransaction,
    /// The transaction's validity window has passed.
    ///
    /// Recoverable only by regenerating the transaction id and resubmitting.
    TransactionExpired,
    /// A signature did not verify against its public key.
    InvalidSignature,
    /// The request body failed validation.
    InvalidTransaction,
    /// The offered fee does not cover the operation.
    InsufficientFee,
    /// The (single) payload exceeds the network's size limit.
    PayloadTooLarge,
}

impl Status {
    /// Statuses that are transient regardless of operation kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Status::Busy | Status::PlatformNotActive)
    }

    /// True for the success status.
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(Status::Busy.is_retryable());
        assert!(Status::PlatformNotActive.is_retryable());
        assert!(!Status::Ok.is_retryable());
        assert!(!Status::InvalidSignature.is_retryable());
        assert!(!Status::TransactionExpired.is_retryable());
    }
}
