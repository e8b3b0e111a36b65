//! Generic retrying execution engine.
//!
//! Drives any request (transaction or query) through build → dispatch →
//! classify → retry. Two failure channels are kept apart: transport
//! failures penalize the node and rotate to the next candidate, while
//! application responses are classified by the operation itself into
//! finished / retry / terminal. Any successful exchange rehabilitates the
//! node — contact, not business success, is what proves it reachable.
//!
//! Pacing defers entirely to node-level backoff: the engine keeps no retry
//! schedule of its own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arka_types::{NodeId, Status, TransactionId};
use tracing::{debug, warn};

use crate::channel::{ConnectivityState, TransportError};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::node::Node;

/// Classification of a well-formed application response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Terminal success; hand the response to `map_response`.
    Finished,
    /// Transient condition; retry without penalizing the node.
    Retry(Status),
    /// Terminal failure; hand the status to `map_error`.
    Error(Status),
}

/// Contract between the engine and one executable request.
///
/// `make_request` may do real work per call (lazy signing, memoized
/// serialization); the engine calls it once per attempt with the node the
/// attempt targets.
pub trait Execute: Send {
    type Response: Send;

    fn service(&self) -> &'static str;

    fn method(&self) -> &'static str;

    /// Target nodes pinned by the operation (e.g. at freeze time). `None`
    /// lets the engine ask the network for a health-ordered subset.
    fn node_ids(&self) -> Option<Vec<NodeId>> {
        None
    }

    /// The operation's idempotency token, if it has one.
    fn transaction_id(&self) -> Option<TransactionId> {
        None
    }

    /// Canonical request bytes for one attempt against `node_id`.
    fn make_request(&mut self, node_id: NodeId) -> Result<Vec<u8>>;

    /// Classify a well-formed response.
    fn classify(&self, response: &[u8]) -> Result<Outcome>;

    /// Turn the final response into the caller-visible value.
    fn map_response(&mut self, response: Vec<u8>, node_id: NodeId) -> Result<Self::Response>;

    /// Typed terminal failure carrying the operation's identity.
    fn map_error(&self, status: Status, node_id: NodeId) -> Error {
        Error::OperationFailed {
            status,
            node_id,
            transaction_id: self.transaction_id(),
        }
    }

    /// Whether a transport failure is attributable to the node itself.
    fn is_node_down(&self, error: &TransportError) -> bool {
        error.is_node_down()
    }

    /// Whether `status` invalidates the current idempotency token.
    fn should_regenerate(&self, _status: Status) -> bool {
        false
    }

    /// Mint a fresh idempotency token after `should_regenerate` fired.
    fn regenerate_transaction_id(&mut self) -> Result<()> {
        Ok(())
    }
}

enum Resolved {
    Healthy(usize, Arc<Node>),
    AllBackedOff,
    NonePresent,
}

/// First healthy candidate at or after `cursor`, wrapping around.
fn resolve(network: &Network, candidates: &[NodeId], cursor: usize) -> Resolved {
    let mut any_present = false;
    for offset in 0..candidates.len() {
        let index = (cursor + offset) % candidates.len();
        if let Some(node) = network.node(candidates[index]) {
            any_present = true;
            if node.is_healthy() {
                return Resolved::Healthy(index, node);
            }
        }
    }
    if any_present {
        Resolved::AllBackedOff
    } else {
        Resolved::NonePresent
    }
}

/// First candidate still in the network at or after `cursor`, healthy or not.
fn first_present(network: &Network, candidates: &[NodeId], cursor: usize) -> Option<(usize, Arc<Node>)> {
    (0..candidates.len())
        .map(|offset| (cursor + offset) % candidates.len())
        .find_map(|index| network.node(candidates[index]).map(|node| (index, node)))
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Run `executable` to completion against `network`.
///
/// Bounded by the attempt budget and, when given, a wall-clock deadline;
/// whichever triggers first wins and both report the last-targeted node.
/// The deadline is cooperative: checked at loop entry and again immediately
/// before dispatch, never aborting an attempt mid-flight.
pub(crate) async fn execute<E: Execute>(
    network: &Network,
    config: &ClientConfig,
    executable: &mut E,
    timeout: Option<Duration>,
) -> Result<E::Response> {
    let deadline = timeout.or(config.request_timeout).map(|t| Instant::now() + t);

    let candidates = executable
        .node_ids()
        .unwrap_or_else(|| network.node_ids_for_request(None));
    if candidates.is_empty() {
        return Err(Error::EmptyNodeList);
    }

    let mut cursor = 0usize;
    let mut last_node: Option<NodeId> = None;
    let mut last_error: Option<Error> = None;

    for attempt in 1..=config.max_attempts {
        if expired(deadline) {
            return Err(Error::Timeout {
                last_node_id: last_node,
                source: last_error.take().map(Box::new),
            });
        }

        let (index, node) = match resolve(network, &candidates, cursor) {
            Resolved::Healthy(index, node) => (index, node),
            Resolved::NonePresent => return Err(Error::EmptyNodeList),
            Resolved::AllBackedOff => {
                // Wait out the soonest backoff window when it fits inside
                // the deadline (or one max-backoff, absent a deadline);
                // otherwise report the whole candidate list for diagnosis.
                let wake = network
                    .earliest_healthy_at(&candidates)
                    .unwrap_or_else(Instant::now);
                let bound = deadline.unwrap_or_else(|| Instant::now() + config.max_backoff);
                if wake > bound {
                    return Err(Error::AllNodesUnhealthy {
                        node_ids: candidates,
                    });
                }

                debug!(
                    wait_ms = wake.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "all candidate nodes backed off; waiting for the soonest window"
                );
                tokio::time::sleep_until(tokio::time::Instant::from_std(wake)).await;

                match resolve(network, &candidates, cursor) {
                    Resolved::Healthy(index, node) => (index, node),
                    Resolved::NonePresent => return Err(Error::EmptyNodeList),
                    // Still flagged unhealthy: force one attempt anyway.
                    Resolved::AllBackedOff => match first_present(network, &candidates, cursor) {
                        Some((index, node)) => (index, node),
                        None => return Err(Error::EmptyNodeList),
                    },
                }
            }
        };

        last_node = Some(node.id());
        let request = executable.make_request(node.id())?;

        if expired(deadline) {
            return Err(Error::Timeout {
                last_node_id: last_node,
                source: last_error.take().map(Box::new),
            });
        }

        let channel = node.channel();
        let outcome = if channel.connectivity_state() == ConnectivityState::Shutdown {
            // Advisory fail-fast: no point in a round trip on a closed channel.
            Err(TransportError::Closed)
        } else {
            debug!(node = %node.id(), attempt, service = executable.service(), "dispatching");
            channel
                .dispatch(executable.service(), executable.method(), &request)
                .await
        };

        match outcome {
            Err(error) => {
                warn!(node = %node.id(), attempt, %error, "transport failure");
                if executable.is_node_down(&error) {
                    node.increase_backoff();
                    if let Some(cap) = config.max_node_attempts {
                        if node.attempts() > cap {
                            network.evict(node.id());
                        }
                    }
                }
                last_error = Some(Error::Transport {
                    node_id: node.id(),
                    source: error,
                });
                cursor = (index + 1) % candidates.len();
            }
            Ok(response) => {
                // The exchange itself succeeded, whatever the status says.
                node.decrease_backoff();

                match executable.classify(&response)? {
                    Outcome::Finished => {
                        debug!(node = %node.id(), attempt, "finished");
                        return executable.map_response(response, node.id());
                    }
                    Outcome::Retry(status) => {
                        debug!(node = %node.id(), attempt, ?status, "retryable response");
                        if executable.should_regenerate(status) {
                            executable.regenerate_transaction_id()?;
                        }
                        last_error = Some(executable.map_error(status, node.id()));
                        cursor = (index + 1) % candidates.len();

                        let delay = node.current_backoff();
                        if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                            return Err(Error::Timeout {
                                last_node_id: last_node,
                                source: last_error.take().map(Box::new),
                            });
                        }
                        tokio::time::sleep(delay).await;
                    }
                    Outcome::Error(status) => {
                        return Err(executable.map_error(status, node.id()));
                    }
                }
            }
        }
    }

    Err(Error::MaxAttempts {
        attempts: config.max_attempts,
        last_node_id: last_node,
        source: last_error.map(Box::new),
    })
}
