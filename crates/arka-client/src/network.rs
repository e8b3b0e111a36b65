//! Network selector: owns the node handles for one logical network.
//!
//! Maps stable node identity to handle and keeps an ordered working list
//! used for health-biased selection. Reconfiguration is a reconciling diff:
//! a node that survives a refresh keeps its health history. Randomness is
//! used exactly once, when the list is first filled, so concurrent clients
//! do not all start on the same node; selection itself is deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arka_types::NodeId;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::channel::ChannelFactory;
use crate::config::ClientConfig;
use crate::node::{Node, NodeAddress};

struct Inner {
    map: HashMap<NodeId, Arc<Node>>,
    /// Working list; always in one-to-one agreement with `map`.
    order: Vec<NodeId>,
    transport_security: bool,
    shuffled: bool,
}

/// The set of node handles for one logical network.
///
/// A client talking to a primary network and a read-only mirror holds two
/// disjoint `Network` instances; nothing is shared between them.
pub struct Network {
    factory: ChannelFactory,
    min_backoff: Duration,
    max_backoff: Duration,
    max_nodes_per_request: Option<usize>,
    inner: RwLock<Inner>,
}

impl Network {
    pub(crate) fn new(factory: ChannelFactory, config: &ClientConfig) -> Self {
        Self {
            factory,
            min_backoff: config.min_backoff,
            max_backoff: config.max_backoff,
            max_nodes_per_request: config.max_nodes_per_request,
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                order: Vec::new(),
                transport_security: config.transport_security,
                shuffled: false,
            }),
        }
    }

    /// Replace the node set, diffing against the current one.
    ///
    /// Removed identities are closed and evicted; added identities get fresh
    /// handles; surviving identities keep their counters, re-homed onto the
    /// new address if it changed.
    pub fn set_network(&self, entries: HashMap<NodeId, NodeAddress>) {
        let mut inner = self.inner.write();
        let secure = inner.transport_security;

        let removed: Vec<NodeId> = inner
            .map
            .keys()
            .filter(|id| !entries.contains_key(id))
            .copied()
            .collect();
        for id in &removed {
            if let Some(node) = inner.map.remove(id) {
                node.close_channel();
            }
        }
        inner.order.retain(|id| !removed.contains(id));

        for (id, address) in entries {
            let address = if secure {
                address.to_secure()
            } else {
                address.to_insecure()
            };

            match inner.map.get(&id).cloned() {
                Some(existing) if *existing.address() == address => {}
                Some(existing) => {
                    debug!(node = %id, %address, "node re-homed to new address");
                    let replacement = Arc::new(existing.clone_with_address(address));
                    existing.close_channel();
                    inner.map.insert(id, replacement);
                }
                None => {
                    let node = Node::new(
                        id,
                        address,
                        self.min_backoff,
                        self.max_backoff,
                        Arc::clone(&self.factory),
                    );
                    inner.map.insert(id, Arc::new(node));
                    inner.order.push(id);
                }
            }
        }

        // One-time shuffle: avoids every fresh client starting on the same
        // first node. Refreshes never reshuffle.
        if !inner.shuffled && !inner.order.is_empty() {
            inner.order.shuffle(&mut rand::thread_rng());
            inner.shuffled = true;
        }

        info!(nodes = inner.order.len(), "network configured");
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.inner.read().map.get(&id).cloned()
    }

    /// Identities in working-list order (not selection order).
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    pub fn transport_security(&self) -> bool {
        self.inner.read().transport_security
    }

    /// The subset of nodes one operation should target, best candidates
    /// first. `count` falls back to the configured override, then to a
    /// third of the network rounded up.
    pub fn node_ids_for_request(&self, count: Option<usize>) -> Vec<NodeId> {
        let inner = self.inner.read();
        let total = inner.order.len();
        if total == 0 {
            return Vec::new();
        }

        let count = count
            .or(self.max_nodes_per_request)
            .unwrap_or_else(|| total.div_ceil(3))
            .clamp(1, total);

        let now = Instant::now();
        let mut nodes: Vec<&Arc<Node>> = inner.order.iter().filter_map(|id| inner.map.get(id)).collect();
        nodes.sort_by(|a, b| a.compare(b, now));
        nodes.iter().take(count).map(|node| node.id()).collect()
    }

    /// Flip every handle onto its secure or insecure address variant,
    /// closing old channels. Health counters survive the flip.
    pub fn set_transport_security(&self, secure: bool) {
        let mut inner = self.inner.write();
        if inner.transport_security == secure {
            return;
        }
        inner.transport_security = secure;

        let ids: Vec<NodeId> = inner.map.keys().copied().collect();
        for id in ids {
            if let Some(node) = inner.map.get(&id).cloned() {
                let address = if secure {
                    node.address().to_secure()
                } else {
                    node.address().to_insecure()
                };
                let replacement = Arc::new(node.clone_with_address(address));
                node.close_channel();
                inner.map.insert(id, replacement);
            }
        }
        info!(secure, "transport security toggled");
    }

    /// Permanently remove a node whose failure count exceeded the cap. The
    /// only removal path besides `set_network`.
    pub(crate) fn evict(&self, id: NodeId) {
        let mut inner = self.inner.write();
        if let Some(node) = inner.map.remove(&id) {
            node.close_channel();
            inner.order.retain(|other| *other != id);
            warn!(node = %id, attempts = node.attempts(), "node evicted after repeated failures");
        }
    }

    /// Earliest instant at which any of `candidates` leaves its backoff
    /// window. `None` when at least one is already healthy. Candidates no
    /// longer in the map (evicted mid-operation) are skipped; they are not
    /// healthy nodes.
    pub(crate) fn earliest_healthy_at(&self, candidates: &[NodeId]) -> Option<Instant> {
        let inner = self.inner.read();
        let mut earliest: Option<Instant> = None;
        for id in candidates {
            let Some(node) = inner.map.get(id) else {
                continue;
            };
            match node.healthy_at() {
                None => return None,
                Some(until) if until <= Instant::now() => return None,
                Some(until) => {
                    earliest = Some(earliest.map_or(until, |e| e.min(until)));
                }
            }
        }
        earliest
    }

    /// Close every node's channel. Handles stay usable; channels are
    /// recreated on demand.
    pub fn close(&self) {
        let inner = self.inner.read();
        for node in inner.map.values() {
            node.close_channel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, TransportError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Channel for CountingChannel {
        async fn dispatch(
            &self,
            _service: &str,
            _method: &str,
            _request: &[u8],
        ) -> Result<Vec<u8>, TransportError> {
            Ok(Vec::new())
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_factory(closed: Arc<AtomicUsize>) -> ChannelFactory {
        Arc::new(move |_| {
            Arc::new(CountingChannel {
                closed: Arc::clone(&closed),
            }) as Arc<dyn Channel>
        })
    }

    fn entries(ids: &[u64]) -> HashMap<NodeId, NodeAddress> {
        ids.iter()
            .map(|id| {
                (
                    NodeId(*id),
                    NodeAddress::new(format!("10.0.0.{id}"), Some(crate::node::PORT_NODE_PLAIN)),
                )
            })
            .collect()
    }

    fn network(ids: &[u64]) -> (Network, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let network = Network::new(counting_factory(Arc::clone(&closed)), &ClientConfig::default());
        network.set_network(entries(ids));
        (network, closed)
    }

    #[test]
    fn test_refresh_with_same_set_preserves_health() {
        let (network, closed) = network(&[0, 1, 2]);

        let node = network.node(NodeId(1)).unwrap();
        node.channel();
        node.increase_backoff();

        network.set_network(entries(&[0, 1, 2]));

        let node = network.node(NodeId(1)).unwrap();
        assert_eq!(node.use_count(), 1);
        assert_eq!(node.attempts(), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_refresh_closes_exactly_the_removed_node() {
        let (network, closed) = network(&[0, 1, 2]);

        // Touch every channel so close() is observable.
        for id in [0, 1, 2] {
            network.node(NodeId(id)).unwrap().channel();
        }
        network.node(NodeId(0)).unwrap().increase_backoff();

        // Drop node 2, add node 3.
        network.set_network(entries(&[0, 1, 3]));

        assert!(network.node(NodeId(2)).is_none());
        assert!(network.node(NodeId(3)).is_some());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        // Survivors keep their history.
        assert_eq!(network.node(NodeId(0)).unwrap().attempts(), 1);
        assert_eq!(network.node(NodeId(1)).unwrap().use_count(), 1);
    }

    #[test]
    fn test_selection_count_defaults_to_third() {
        let (network, _) = network(&[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(network.node_ids_for_request(None).len(), 3);
        assert_eq!(network.node_ids_for_request(Some(5)).len(), 5);
        // Clamped to the network size.
        assert_eq!(network.node_ids_for_request(Some(100)).len(), 9);

        let (small, _) = network_of_two();
        assert_eq!(small.node_ids_for_request(None).len(), 1);
    }

    fn network_of_two() -> (Network, Arc<AtomicUsize>) {
        network(&[0, 1])
    }

    #[test]
    fn test_selection_skips_unhealthy_node() {
        let (network, _) = network(&[0, 1, 2, 3]);

        let bad = NodeId(2);
        network.node(bad).unwrap().increase_backoff();

        let picked = network.node_ids_for_request(Some(1));
        assert_eq!(picked.len(), 1);
        assert_ne!(picked[0], bad);

        // The unhealthy node still appears, last, when all are requested.
        let all = network.node_ids_for_request(Some(4));
        assert_eq!(all.len(), 4);
        assert_eq!(*all.last().unwrap(), bad);
    }

    #[test]
    fn test_transport_security_rehomes_and_preserves_counters() {
        let (network, closed) = network(&[0]);
        let node = network.node(NodeId(0)).unwrap();
        node.channel();
        node.increase_backoff();

        network.set_transport_security(true);

        let node = network.node(NodeId(0)).unwrap();
        assert_eq!(node.address().port(), Some(crate::node::PORT_NODE_TLS));
        assert_eq!(node.use_count(), 1);
        assert_eq!(node.attempts(), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        // No-op toggle does nothing.
        network.set_transport_security(true);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_evict_removes_node_and_closes_channel() {
        let (network, closed) = network(&[0, 1]);
        network.node(NodeId(0)).unwrap().channel();

        network.evict(NodeId(0));

        assert!(network.node(NodeId(0)).is_none());
        assert_eq!(network.node_ids(), vec![NodeId(1)]);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_earliest_healthy_at() {
        let (network, _) = network(&[0, 1]);
        let candidates = [NodeId(0), NodeId(1)];

        // All healthy: no wait needed.
        assert!(network.earliest_healthy_at(&candidates).is_none());

        network.node(NodeId(0)).unwrap().increase_backoff();
        assert!(network.earliest_healthy_at(&candidates).is_none());

        network.node(NodeId(1)).unwrap().increase_backoff();
        let wake = network.earliest_healthy_at(&candidates);
        assert!(wake.is_some());
        assert!(wake.unwrap() > Instant::now());
    }

    #[test]
    fn test_earliest_healthy_at_skips_evicted_candidate() {
        let (network, _) = network(&[0, 1]);
        network.evict(NodeId(0));
        network.node(NodeId(1)).unwrap().increase_backoff();

        // The evicted id must not read as "a healthy node exists": the only
        // remaining candidate is backed off, so there is a wait.
        let wake = network.earliest_healthy_at(&[NodeId(0), NodeId(1)]);
        assert!(wake.is_some());
        assert!(wake.unwrap() > Instant::now());
    }
}
