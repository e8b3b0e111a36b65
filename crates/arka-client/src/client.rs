//! Client facade tying the network, configuration, and operator together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arka_types::{AccountId, NodeId};

use crate::channel::{http_channel_factory, ChannelFactory};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::execution::{self, Execute};
use crate::network::Network;
use crate::node::NodeAddress;
use crate::signer::PrivateKey;

/// The account that pays for operations and the key that signs for it.
#[derive(Clone)]
pub struct Operator {
    pub account: AccountId,
    pub key: PrivateKey,
}

impl Operator {
    pub fn new(account: AccountId, key: PrivateKey) -> Self {
        Self { account, key }
    }
}

/// Entry point of the SDK.
///
/// Owns one [`Network`] (a second, read-only network would be a second
/// `Client`; the two share nothing). Cheap to clone via `Arc` internals is
/// deliberately not offered — wrap the client in an `Arc` to share it.
pub struct Client {
    network: Arc<Network>,
    config: ClientConfig,
    operator: Operator,
}

impl Client {
    /// Client over the default HTTP transport.
    pub fn for_network(
        entries: HashMap<NodeId, NodeAddress>,
        operator: Operator,
        config: ClientConfig,
    ) -> Self {
        Self::with_channel_factory(http_channel_factory(), entries, operator, config)
    }

    /// Client with an injected channel factory; the seam tests and
    /// alternative transports plug into.
    pub fn with_channel_factory(
        factory: ChannelFactory,
        entries: HashMap<NodeId, NodeAddress>,
        operator: Operator,
        config: ClientConfig,
    ) -> Self {
        let network = Network::new(factory, &config);
        network.set_network(entries);
        Self {
            network: Arc::new(network),
            config,
            operator,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Replace the node set; surviving nodes keep their health history.
    pub fn set_network(&self, entries: HashMap<NodeId, NodeAddress>) {
        self.network.set_network(entries);
    }

    /// Flip every node onto its secure or insecure address variant.
    pub fn set_transport_security(&self, secure: bool) {
        self.network.set_transport_security(secure);
    }

    /// Run any executable request through the retry engine.
    pub async fn execute<E: Execute>(
        &self,
        executable: &mut E,
        timeout: Option<Duration>,
    ) -> Result<E::Response> {
        execution::execute(&self.network, &self.config, executable, timeout).await
    }

    /// Close every node channel. The client stays usable; channels are
    /// recreated on demand.
    pub fn close(&self) {
        self.network.close();
    }
}
