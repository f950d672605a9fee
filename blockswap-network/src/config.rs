//! Network configuration

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the WebSocket listener binds to
    pub listen_address: SocketAddr,

    /// Host advertised in this node's peer record
    pub connect_host: String,

    /// Port advertised in this node's peer record
    pub connect_port: u16,

    /// Scheme prefix of the advertised URI
    pub uri_prefix: String,

    /// Kademlia DHT parameters
    pub dht: DhtConfig,

    /// Directory record handling
    pub directory: DirectoryConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 10100)),
            connect_host: "127.0.0.1".to_string(),
            connect_port: 10100,
            uri_prefix: "ws://".to_string(),
            dht: DhtConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Create a new network configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the WebSocket listen address
    pub fn with_listen_address(mut self, address: SocketAddr) -> Self {
        self.listen_address = address;
        self
    }

    /// Set the advertised host and port
    pub fn with_connect_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.connect_host = host.into();
        self.connect_port = port;
        self
    }

    /// Set the DHT parameters
    pub fn with_dht(mut self, dht: DhtConfig) -> Self {
        self.dht = dht;
        self
    }

    /// Set the directory parameters
    pub fn with_directory(mut self, directory: DirectoryConfig) -> Self {
        self.directory = directory;
        self
    }

    /// URI published in this node's peer record
    pub fn public_uri(&self) -> String {
        format!("{}{}:{}", self.uri_prefix, self.connect_host, self.connect_port)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        // The listener speaks plain WebSocket only
        if self.uri_prefix != "ws://" {
            return Err(format!("URI prefix must be ws://, got {}", self.uri_prefix));
        }

        if self.connect_host.is_empty() {
            return Err("Connect host must not be empty".to_string());
        }

        self.dht.validate()?;
        self.directory.validate()
    }
}

/// Kademlia DHT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtConfig {
    /// DHT listening address
    pub listen_address: Multiaddr,

    /// Bootstrap nodes to join through
    pub bootstrap_nodes: Vec<Multiaddr>,

    /// Path to store the DHT keypair; a fresh keypair is used when unset
    pub keystore_path: Option<PathBuf>,

    /// Transport connection timeout
    pub connection_timeout: Duration,

    /// Timeout of a single Kademlia query
    pub query_timeout: Duration,

    /// Maximum time to wait for the bootstrap to complete
    pub bootstrap_timeout: Duration,

    /// How long an idle DHT connection is kept open
    pub idle_connection_timeout: Duration,

    /// Lifetime of stored records; `None` keeps them forever
    pub record_ttl: Option<Duration>,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            listen_address: Multiaddr::empty()
                .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
                .with(Protocol::Tcp(21300)),
            bootstrap_nodes: Vec::new(),
            keystore_path: None,
            connection_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(60),
            bootstrap_timeout: Duration::from_secs(30),
            idle_connection_timeout: Duration::from_secs(300),
            record_ttl: Some(Duration::from_secs(36 * 60 * 60)),
        }
    }
}

impl DhtConfig {
    /// Create a new DHT configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listening address
    pub fn with_listen_address(mut self, address: Multiaddr) -> Self {
        self.listen_address = address;
        self
    }

    /// Set bootstrap nodes
    pub fn with_bootstrap_nodes(mut self, nodes: Vec<Multiaddr>) -> Self {
        self.bootstrap_nodes = nodes;
        self
    }

    /// Set keystore path
    pub fn with_keystore_path(mut self, path: PathBuf) -> Self {
        self.keystore_path = Some(path);
        self
    }

    /// Set the query timeout
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the bootstrap timeout
    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.query_timeout.is_zero() {
            return Err("Query timeout must be greater than zero".to_string());
        }

        if self.bootstrap_timeout.is_zero() {
            return Err("Bootstrap timeout must be greater than zero".to_string());
        }

        if self.connection_timeout.is_zero() {
            return Err("Connection timeout must be greater than zero".to_string());
        }

        Ok(())
    }
}

/// Directory record handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Read-union-write cycles attempted per provider announcement
    pub announce_attempts: u32,

    /// Base delay between announcement attempts
    pub announce_backoff: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            announce_attempts: 3,
            announce_backoff: Duration::from_millis(100),
        }
    }
}

impl DirectoryConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.announce_attempts == 0 {
            return Err("Announce attempts must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.public_uri(), "ws://127.0.0.1:10100");
        assert_eq!(config.directory.announce_attempts, 3);
        assert_eq!(config.dht.listen_address.to_string(), "/ip4/0.0.0.0/tcp/21300");
    }

    #[test]
    fn test_config_builder() {
        let config = NetworkConfig::new()
            .with_connect_address("10.0.0.1", 9000)
            .with_dht(DhtConfig::new().with_keystore_path(PathBuf::from("/tmp/test")));

        assert_eq!(config.public_uri(), "ws://10.0.0.1:9000");
        assert_eq!(config.dht.keystore_path, Some(PathBuf::from("/tmp/test")));
    }

    #[test]
    fn test_config_validation() {
        let mut config = NetworkConfig::default();
        config.uri_prefix = "http://".to_string();
        assert!(config.validate().is_err());

        config.uri_prefix = "wss://".to_string();
        assert!(config.validate().is_err());

        config.uri_prefix = "ws://".to_string();
        assert!(config.validate().is_ok());

        config.directory.announce_attempts = 0;
        assert!(config.validate().is_err());

        config.directory.announce_attempts = 1;
        config.dht.query_timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());
    }
}
