// ========== Core Modules ==========
pub mod ids;
pub mod status;

// Export identifier types
pub use ids::{AccountId, NodeId, TransactionId};

// Export response status taxonomy
pub use status::Status;

// Error types
#[derive(Debug, thiserror::Error)]
pub enum ArkaError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}
