//! Configuration for the Ember SPV client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use embercore::params::Network;

/// Configuration for the SPV client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Network to connect to.
    pub network: Network,

    /// Directory for the header file and wallet state.
    pub data_dir: PathBuf,

    /// Identifier used in persisted wallet keys.
    pub wallet_id: String,

    /// Peers to connect to at startup.
    pub seed_peers: Vec<SocketAddr>,

    /// A peer to prefer for all requests when it qualifies.
    pub preferred_peer: Option<SocketAddr>,

    /// Maximum simultaneous connections.
    pub max_connections: usize,

    /// Restrict block/tx requests to filter-capable peers.
    pub require_filter_peers: bool,

    /// Learn additional peers from `addr`/`addrv2` gossip.
    pub enable_discovery: bool,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Time allowed for a handshake to complete.
    pub handshake_timeout: Duration,

    /// Overall header sync timeout (one retry on expiry).
    pub header_sync_timeout: Duration,

    /// Overall filter-header sync timeout (one retry on expiry).
    pub filter_header_sync_timeout: Duration,

    /// Timeout for a single block request.
    pub block_request_timeout: Duration,

    /// How long to wait for mempool confirmation after a broadcast.
    pub mempool_verify_timeout: Duration,
}

impl ClientConfig {
    /// A configuration with defaults for the given network.
    pub fn new(network: Network) -> Self {
        ClientConfig {
            network,
            data_dir: PathBuf::from("."),
            wallet_id: "default".to_string(),
            seed_peers: Vec::new(),
            preferred_peer: None,
            max_connections: 1,
            require_filter_peers: false,
            enable_discovery: false,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            header_sync_timeout: Duration::from_secs(300),
            filter_header_sync_timeout: Duration::from_secs(120),
            block_request_timeout: Duration::from_secs(10),
            mempool_verify_timeout: Duration::from_secs(5),
        }
    }

    /// Mainnet defaults.
    pub fn mainnet() -> Self {
        Self::new(Network::Mainnet)
    }

    /// Testnet defaults.
    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    /// Regtest defaults.
    pub fn regtest() -> Self {
        Self::new(Network::Regtest)
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Set the wallet identifier.
    pub fn with_wallet_id(mut self, id: impl Into<String>) -> Self {
        self.wallet_id = id.into();
        self
    }

    /// Add a seed peer.
    pub fn with_seed_peer(mut self, peer: SocketAddr) -> Self {
        self.seed_peers.push(peer);
        self
    }

    /// Prefer one peer over round-robin selection.
    pub fn with_preferred_peer(mut self, peer: SocketAddr) -> Self {
        self.preferred_peer = Some(peer);
        self
    }

    /// Allow this many simultaneous connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Require filter-capable peers for block/tx requests too.
    pub fn with_require_filter_peers(mut self, require: bool) -> Self {
        self.require_filter_peers = require;
        self
    }

    /// Enable peer discovery via address gossip.
    pub fn with_discovery(mut self, enable: bool) -> Self {
        self.enable_discovery = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_single_connection_no_discovery() {
        let config = ClientConfig::mainnet();
        assert_eq!(config.max_connections, 1);
        assert!(!config.enable_discovery);
        assert!(!config.require_filter_peers);
        assert_eq!(config.header_sync_timeout, Duration::from_secs(300));
    }

    #[test]
    fn builder_chains() {
        let peer: SocketAddr = "127.0.0.1:18757".parse().unwrap();
        let config = ClientConfig::testnet()
            .with_data_dir("/tmp/ember-test")
            .with_seed_peer(peer)
            .with_max_connections(0)
            .with_discovery(true);
        assert_eq!(config.seed_peers, vec![peer]);
        // The floor is one connection.
        assert_eq!(config.max_connections, 1);
        assert!(config.enable_discovery);
    }
}
