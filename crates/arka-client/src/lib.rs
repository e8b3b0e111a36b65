//! Arka Client - Multi-Node Ledger SDK
//!
//! Submits signed requests to a permissioned ledger over multiple
//! independent node endpoints and reconciles their failure behavior into a
//! single reliable call. The caller never picks a node.
//!
//! # Architecture
//!
//! ```text
//! Transaction / Query
//!         │
//!         ▼
//! ┌─────────────────────────┐
//! │     Execution engine    │  Retry loop: build → dispatch → classify
//! │   (Which outcome?)      │
//! └───────────┬─────────────┘
//!             │
//!             ▼
//! ┌─────────────────────────┐
//! │        Network          │  Health-ordered node selection
//! │     (Which node?)       │
//! └───────────┬─────────────┘
//!             │
//!             ▼
//! ┌─────────────────────────┐
//! │      Node channel       │  Lazily created transport, backoff state
//! └─────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use arka_client::{Client, ClientConfig, Transaction};
//! use arka_client::proto::OperationData;
//!
//! let client = Client::for_network(entries, operator, ClientConfig::default());
//!
//! let response = Transaction::new(OperationData::data_store(b"key", b"value"))
//!     .memo("example")
//!     .freeze(&client)?
//!     .sign(key)
//!     .execute(&client, None)
//!     .await?;
//! ```

// Core modules
mod client;
mod config;
mod error;
mod execution;
mod network;
mod node;

// Transport and wire format
pub mod channel;
pub mod proto;
pub mod signer;

// Request types
mod query;
mod transaction;

// Re-exports: Error types
pub use error::{Error, Result};

// Re-exports: Client and configuration
pub use client::{Client, Operator};
pub use config::ClientConfig;

// Re-exports: Transport seam
pub use channel::{Channel, ChannelFactory, ConnectivityState, TransportError};

// Re-exports: Node and network
pub use network::Network;
pub use node::{Node, NodeAddress};

// Re-exports: Execution engine contract
pub use execution::{Execute, Outcome};

// Re-exports: Request types
pub use query::{Query, QueryResult};
pub use transaction::{ChunkedTransaction, FrozenTransaction, Transaction, TransactionResult};

// Re-exports: Shared identifiers
pub use arka_types::{AccountId, NodeId, Status, TransactionId};
