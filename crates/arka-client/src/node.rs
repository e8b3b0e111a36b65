//! Node addresses and node handles.
//!
//! A [`Node`] wraps one endpoint of the network: its transport address, a
//! lazily created channel, and the usage/backoff counters that drive
//! selection. Health is purely a function of the last failure time plus the
//! current backoff window; a node never becomes healthy early.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arka_types::NodeId;
use parking_lot::Mutex;
use tracing::debug;

use crate::channel::{Channel, ChannelFactory};
use crate::error::Error;

/// Plaintext port of a consensus node.
pub const PORT_NODE_PLAIN: u16 = 50211;
/// TLS port of a consensus node.
pub const PORT_NODE_TLS: u16 = 50212;
/// Plaintext port of a mirror endpoint.
pub const PORT_MIRROR_PLAIN: u16 = 5600;
/// TLS port of a mirror endpoint.
pub const PORT_MIRROR_TLS: u16 = 443;

/// Parsed `host[:port]` endpoint address. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    host: String,
    port: Option<u16>,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port to actually connect to, defaulting to the plaintext node port.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(PORT_NODE_PLAIN)
    }

    /// The TLS variant of this address. Known plaintext ports are remapped
    /// (50211 → 50212, 5600 → 443); any other port is left unchanged.
    pub fn to_secure(&self) -> NodeAddress {
        let port = match self.port {
            Some(PORT_NODE_PLAIN) => Some(PORT_NODE_TLS),
            Some(PORT_MIRROR_PLAIN) => Some(PORT_MIRROR_TLS),
            other => other,
        };
        NodeAddress {
            host: self.host.clone(),
            port,
        }
    }

    /// The plaintext variant of this address; inverse of [`to_secure`].
    ///
    /// [`to_secure`]: NodeAddress::to_secure
    pub fn to_insecure(&self) -> NodeAddress {
        let port = match self.port {
            Some(PORT_NODE_TLS) => Some(PORT_NODE_PLAIN),
            Some(PORT_MIRROR_TLS) => Some(PORT_MIRROR_PLAIN),
            other => other,
        };
        NodeAddress {
            host: self.host.clone(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.effective_port())
    }
}

impl FromStr for NodeAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::InvalidAddress(s.into()));
        }

        match s.rsplit_once(':') {
            None => Ok(NodeAddress::new(s, None)),
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(Error::InvalidAddress(s.into()));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidAddress(s.into()))?;
                Ok(NodeAddress::new(host, Some(port)))
            }
        }
    }
}

/// Usage and backoff counters of one node. Guarded by a single mutex so a
/// reader never observes a torn healthy/backoff-until pair.
#[derive(Debug, Clone)]
struct NodeHealth {
    use_count: u64,
    last_used: Option<Instant>,
    current_backoff: Duration,
    backoff_until: Option<Instant>,
    attempts: u64,
}

/// Handle to one network node.
///
/// Owns the lazily created channel for its address. Backoff state mutates
/// only through [`increase_backoff`](Node::increase_backoff) and
/// [`decrease_backoff`](Node::decrease_backoff).
pub struct Node {
    id: NodeId,
    address: NodeAddress,
    min_backoff: Duration,
    max_backoff: Duration,
    factory: ChannelFactory,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    health: Mutex<NodeHealth>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        address: NodeAddress,
        min_backoff: Duration,
        max_backoff: Duration,
        factory: ChannelFactory,
    ) -> Self {
        Self {
            id,
            address,
            min_backoff,
            max_backoff,
            factory,
            channel: Mutex::new(None),
            health: Mutex::new(NodeHealth {
                use_count: 0,
                last_used: None,
                current_backoff: min_backoff,
                backoff_until: None,
                attempts: 0,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// True iff the node is outside its backoff window.
    pub fn is_healthy(&self) -> bool {
        match self.health.lock().backoff_until {
            None => true,
            Some(until) => Instant::now() >= until,
        }
    }

    /// When the current backoff window ends, if one is open.
    pub(crate) fn healthy_at(&self) -> Option<Instant> {
        self.health.lock().backoff_until
    }

    /// Penalize the node after a failure attributable to the node itself.
    ///
    /// Doubles the backoff (capped) and opens a new backoff window from now.
    pub fn increase_backoff(&self) {
        let mut health = self.health.lock();
        health.attempts += 1;
        health.current_backoff = (health.current_backoff * 2).min(self.max_backoff);
        health.backoff_until = Some(Instant::now() + health.current_backoff);
        debug!(
            node = %self.id,
            backoff_ms = health.current_backoff.as_millis() as u64,
            attempts = health.attempts,
            "node penalized"
        );
    }

    /// Rehabilitate the node after a successful contact. Halves the backoff
    /// down to the configured minimum.
    pub fn decrease_backoff(&self) {
        let mut health = self.health.lock();
        health.current_backoff = (health.current_backoff / 2).max(self.min_backoff);
    }

    /// Backoff that would apply to the next failure; also the engine's
    /// pacing value for application-level retries against this node.
    pub fn current_backoff(&self) -> Duration {
        self.health.lock().current_backoff
    }

    /// Cumulative node-down failures observed on this handle.
    pub fn attempts(&self) -> u64 {
        self.health.lock().attempts
    }

    /// Times this node was handed out for a dispatch.
    pub fn use_count(&self) -> u64 {
        self.health.lock().use_count
    }

    /// The node's channel, created on first use. Every call counts as a
    /// logical use and refreshes the recency stamp.
    pub(crate) fn channel(&self) -> Arc<dyn Channel> {
        {
            let mut health = self.health.lock();
            health.use_count += 1;
            health.last_used = Some(Instant::now());
        }

        let mut slot = self.channel.lock();
        slot.get_or_insert_with(|| (self.factory)(&self.address))
            .clone()
    }

    /// Close the channel if one was created. Idempotent.
    pub(crate) fn close_channel(&self) {
        if let Some(channel) = self.channel.lock().take() {
            channel.close();
        }
    }

    /// New handle at a different address carrying this handle's full health
    /// history. Used when toggling transport security.
    pub(crate) fn clone_with_address(&self, address: NodeAddress) -> Node {
        Node {
            id: self.id,
            address,
            min_backoff: self.min_backoff,
            max_backoff: self.max_backoff,
            factory: Arc::clone(&self.factory),
            channel: Mutex::new(None),
            health: Mutex::new(self.health.lock().clone()),
        }
    }

    /// Selection order: healthy nodes first, then fewer uses, then the one
    /// used longest ago. This ordering is the whole load-balancing policy.
    pub(crate) fn compare(&self, other: &Node, now: Instant) -> CmpOrdering {
        let key = |node: &Node| {
            let health = node.health.lock();
            let unhealthy = match health.backoff_until {
                None => false,
                Some(until) => now < until,
            };
            (unhealthy, health.use_count, health.last_used)
        };
        key(self).cmp(&key(other))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
