//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables for node selection, retry, and chunking.
///
/// Defaults reflect the network's fault-tolerance assumptions but none of
/// them is an invariant; production deployments override them freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Attempt budget for one `execute` call.
    pub max_attempts: usize,

    /// Smallest per-node backoff window.
    pub min_backoff: Duration,

    /// Largest per-node backoff window; also bounds how long the engine
    /// waits for a backed-off node when no deadline was given.
    pub max_backoff: Duration,

    /// Cumulative node-down failures after which a node is permanently
    /// evicted from the network map. `None` disables eviction.
    pub max_node_attempts: Option<u64>,

    /// Default per-call deadline applied when `execute` is not given one.
    pub request_timeout: Option<Duration>,

    /// Override for how many nodes one operation targets. Defaults to a
    /// third of the network, rounded up.
    pub max_nodes_per_request: Option<usize>,

    /// Connect to nodes on their TLS port variants.
    pub transport_security: bool,

    /// Payload bytes per chunk when splitting oversized content.
    pub chunk_size: usize,

    /// Fail fast instead of emitting more chunks than this.
    pub max_chunks: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            min_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
            max_node_attempts: None,
            request_timeout: Some(Duration::from_secs(120)),
            max_nodes_per_request: None,
            transport_security: false,
            chunk_size: 1024,
            max_chunks: 20,
        }
    }
}

impl ClientConfig {
    /// Load a configuration from its JSON representation. Absent fields
    /// keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }
}
