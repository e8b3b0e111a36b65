//! Transport seam between the execution engine and the wire.
//!
//! A [`Channel`] performs one RPC exchange: request bytes in, response bytes
//! out. Connectivity failures must surface as [`TransportError`] so the
//! engine can tell "the node is unreachable" apart from "the node answered
//! with a business status"; only the former penalizes node health.
//!
//! Channels are created through a [`ChannelFactory`] injected into the
//! [`Network`](crate::Network), so tests and alternative transports plug in
//! without touching node or engine code.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::node::NodeAddress;

/// Advisory view of a channel's connection state.
///
/// Used to fail fast before a network round trip when a channel is already
/// known to be down; never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// No exchange attempted yet.
    Idle,
    /// Last exchange completed.
    Ready,
    /// Last exchange failed at the transport layer.
    Failed,
    /// `close()` has been called.
    Shutdown,
}

/// Connectivity-level failure of one dispatch.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("node unreachable at {address}")]
    Unreachable { address: String },

    #[error("node resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("stream reset: {0}")]
    StreamReset(String),

    #[error("channel is closed")]
    Closed,
}

impl TransportError {
    /// Whether this failure is attributable to the node itself.
    ///
    /// Node-down failures trigger backoff on the node handle; a dispatch on
    /// an already-closed channel says nothing about the node's health.
    pub fn is_node_down(&self) -> bool {
        !matches!(self, TransportError::Closed)
    }
}

/// One RPC transport to one node.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Perform one exchange. A returned `Ok` means the node produced a
    /// well-formed response, whatever its business status.
    async fn dispatch(
        &self,
        service: &str,
        method: &str,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, TransportError>;

    /// Advisory connectivity snapshot.
    fn connectivity_state(&self) -> ConnectivityState {
        ConnectivityState::Idle
    }

    /// Release underlying resources. Idempotent.
    fn close(&self) {}
}

/// Constructs a channel for a node address. Injected into the network so
/// node handles stay transport-agnostic.
pub type ChannelFactory = Arc<dyn Fn(&NodeAddress) -> Arc<dyn Channel> + Send + Sync>;

/// Default factory: HTTP channels over a shared connection pool.
pub fn http_channel_factory() -> ChannelFactory {
    let http = reqwest::Client::new();
    Arc::new(move |address| Arc::new(HttpChannel::new(http.clone(), address)) as Arc<dyn Channel>)
}

/// HTTP implementation of [`Channel`].
///
/// Requests are POSTed to `http://host:port/v1/{service}/{method}` with the
/// encoded payload as the body; well-formed responses ride back as bytes.
pub struct HttpChannel {
    http: reqwest::Client,
    base: String,
    state: Mutex<ConnectivityState>,
    closed: AtomicBool,
}

impl HttpChannel {
    pub fn new(http: reqwest::Client, address: &NodeAddress) -> Self {
        Self {
            http,
            base: format!("http://{address}"),
            state: Mutex::new(ConnectivityState::Idle),
            closed: AtomicBool::new(false),
        }
    }

    fn record(&self, state: ConnectivityState) {
        *self.state.lock() = state;
    }
}

#[async_trait]
impl Channel for HttpChannel {
    async fn dispatch(
        &self,
        service: &str,
        method: &str,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let url = format!("{}/v1/{service}/{method}", self.base);
        debug!(%url, len = request.len(), "dispatching request");

        let sent = self.http.post(&url).body(request.to_vec()).send().await;
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.record(ConnectivityState::Failed);
                return Err(if e.is_connect() || e.is_timeout() {
                    TransportError::Unreachable {
                        address: self.base.clone(),
                    }
                } else {
                    TransportError::StreamReset(e.to_string())
                });
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.record(ConnectivityState::Failed);
            return Err(TransportError::ResourceExhausted(status.to_string()));
        }
        if status.is_server_error() {
            self.record(ConnectivityState::Failed);
            return Err(TransportError::Unavailable(status.to_string()));
        }

        match response.bytes().await {
            Ok(bytes) => {
                self.record(ConnectivityState::Ready);
                Ok(bytes.to_vec())
            }
            Err(e) => {
                self.record(ConnectivityState::Failed);
                Err(TransportError::StreamReset(e.to_string()))
            }
        }
    }

    fn connectivity_state(&self) -> ConnectivityState {
        if self.closed.load(Ordering::Acquire) {
            ConnectivityState::Shutdown
        } else {
            *self.state.lock()
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_is_not_node_down() {
        assert!(!TransportError::Closed.is_node_down());
        assert!(TransportError::Unreachable {
            address: "10.0.0.1:50211".into()
        }
        .is_node_down());
        assert!(TransportError::ResourceExhausted("429".into()).is_node_down());
    }

    #[tokio::test]
    async fn test_http_channel_close_is_idempotent() {
        let address: NodeAddress = "127.0.0.1:50211".parse().unwrap();
        let channel = HttpChannel::new(reqwest::Client::new(), &address);

        channel.close();
        channel.close();
        assert_eq!(channel.connectivity_state(), ConnectivityState::Shutdown);

        let result = channel.dispatch("svc", "m", b"payload").await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
