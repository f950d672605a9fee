//! Node configuration: defaults < TOML file < BLOCKSWAP_* environment < CLI flags

use anyhow::{bail, Context};
use blockswap_network::{BootstrapNodes, DhtConfig, NetworkConfig};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Blockswap node
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "blockswap-node", version, about = "Content-addressed block exchange node")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "BLOCKSWAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name the peer CID is derived from
    #[arg(long)]
    pub peer_name: Option<String>,

    /// Directory holding stored blocks
    #[arg(long)]
    pub storage_path: Option<PathBuf>,

    /// Kademlia port
    #[arg(long)]
    pub kad_port: Option<u16>,

    /// Kademlia host
    #[arg(long)]
    pub kad_host: Option<String>,

    /// WebSocket server port
    #[arg(long)]
    pub web_socket_port: Option<u16>,

    /// WebSocket server host
    #[arg(long)]
    pub web_socket_host: Option<String>,

    /// WebSocket port published in the directory
    #[arg(long)]
    pub connect_port: Option<u16>,

    /// WebSocket host published in the directory
    #[arg(long)]
    pub connect_host: Option<String>,

    /// Bootstrap nodes: ip:port or multiaddr, space separated
    #[arg(long, num_args = 0..)]
    pub nodes_adr: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Print a TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub peer_name: String,
    pub storage_path: PathBuf,
    pub kad_port: u16,
    pub kad_host: String,
    pub web_socket_port: u16,
    pub web_socket_host: String,
    pub connect_port: u16,
    pub connect_host: String,
    pub nodes_adr: Vec<String>,
    /// Keystore of the DHT keypair; a fresh keypair per run when unset
    pub keystore_path: Option<PathBuf>,
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_name: String::new(),
            storage_path: PathBuf::from("./storage"),
            kad_port: 21300,
            kad_host: "0.0.0.0".to_string(),
            web_socket_port: 10100,
            web_socket_host: "0.0.0.0".to_string(),
            connect_port: 10100,
            connect_host: "127.0.0.1".to_string(),
            nodes_adr: Vec::new(),
            keystore_path: None,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration with layered precedence
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&NodeConfig::default())?);

        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BLOCKSWAP")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("nodes_adr"),
        );

        let mut node_config: NodeConfig = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        node_config.apply_cli(cli);
        node_config.validate()?;
        Ok(node_config)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(peer_name) = &cli.peer_name {
            self.peer_name = peer_name.clone();
        }
        if let Some(storage_path) = &cli.storage_path {
            self.storage_path = storage_path.clone();
        }
        if let Some(port) = cli.kad_port {
            self.kad_port = port;
        }
        if let Some(host) = &cli.kad_host {
            self.kad_host = host.clone();
        }
        if let Some(port) = cli.web_socket_port {
            self.web_socket_port = port;
        }
        if let Some(host) = &cli.web_socket_host {
            self.web_socket_host = host.clone();
        }
        if let Some(port) = cli.connect_port {
            self.connect_port = port;
        }
        if let Some(host) = &cli.connect_host {
            self.connect_host = host.clone();
        }
        if !cli.nodes_adr.is_empty() {
            self.nodes_adr = cli.nodes_adr.clone();
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
        self.json_logs |= cli.json_logs;
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.peer_name.trim().is_empty() {
            bail!("a peer name is required (--peer-name or BLOCKSWAP_PEER_NAME)");
        }
        if !self.storage_path.is_dir() {
            bail!(
                "storage path {} is not an existing directory",
                self.storage_path.display()
            );
        }
        Ok(())
    }

    /// Network configuration for this node
    pub fn network_config(&self) -> anyhow::Result<NetworkConfig> {
        let ws_host: IpAddr = self
            .web_socket_host
            .parse()
            .with_context(|| format!("invalid WebSocket host {}", self.web_socket_host))?;
        let kad_host: IpAddr = self
            .kad_host
            .parse()
            .with_context(|| format!("invalid Kademlia host {}", self.kad_host))?;
        let bootstrap_nodes = BootstrapNodes::from_strings(&self.nodes_adr)
            .map_err(anyhow::Error::msg)
            .context("invalid bootstrap node")?;

        let kad_address =
            BootstrapNodes::parse_node(&SocketAddr::new(kad_host, self.kad_port).to_string())
                .map_err(anyhow::Error::msg)?;

        let mut dht = DhtConfig::new()
            .with_listen_address(kad_address)
            .with_bootstrap_nodes(bootstrap_nodes);
        if let Some(path) = &self.keystore_path {
            dht = dht.with_keystore_path(path.clone());
        }

        let config = NetworkConfig::new()
            .with_listen_address(SocketAddr::new(ws_host, self.web_socket_port))
            .with_connect_address(self.connect_host.clone(), self.connect_port)
            .with_dht(dht);
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }
}

/// Commented TOML template of every setting with its default
pub fn generate_config_template() -> anyhow::Result<String> {
    let defaults = toml::to_string_pretty(&NodeConfig {
        peer_name: "my-peer".to_string(),
        ..NodeConfig::default()
    })?;

    Ok(format!(
        "# Blockswap node configuration\n\
         # Pass with --config <path>. Every key can be overridden with a\n\
         # BLOCKSWAP_<KEY> environment variable or the matching CLI flag.\n\
         # nodes_adr entries are ip:port pairs or multiaddrs.\n\n{}",
        defaults
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cli_overrides_defaults() {
        let temp_dir = tempdir().unwrap();
        let cli = Cli::parse_from([
            "blockswap-node",
            "--peer-name",
            "alice",
            "--storage-path",
            temp_dir.path().to_str().unwrap(),
            "--kad-port",
            "4000",
            "--nodes-adr",
            "127.0.0.1:21300",
            "10.0.0.2:21300",
        ]);

        let mut config = NodeConfig::default();
        config.apply_cli(&cli);

        assert_eq!(config.peer_name, "alice");
        assert_eq!(config.kad_port, 4000);
        assert_eq!(config.web_socket_port, 10100);
        assert_eq!(config.nodes_adr.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_network_config() {
        let config = NodeConfig {
            peer_name: "alice".to_string(),
            connect_host: "10.0.0.1".to_string(),
            connect_port: 9000,
            nodes_adr: vec!["127.0.0.1:21300".to_string()],
            ..NodeConfig::default()
        };

        let network = config.network_config().unwrap();
        assert_eq!(network.public_uri(), "ws://10.0.0.1:9000");
        assert_eq!(network.listen_address, "0.0.0.0:10100".parse().unwrap());
        assert_eq!(network.dht.listen_address.to_string(), "/ip4/0.0.0.0/tcp/21300");
        assert_eq!(
            network.dht.bootstrap_nodes[0].to_string(),
            "/ip4/127.0.0.1/tcp/21300"
        );
    }

    #[test]
    fn test_validate_requires_peer_name_and_storage() {
        let temp_dir = tempdir().unwrap();
        let mut config = NodeConfig {
            storage_path: temp_dir.path().to_path_buf(),
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());

        config.peer_name = "alice".to_string();
        assert!(config.validate().is_ok());

        config.storage_path = temp_dir.path().join("missing");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_template_parses_back() {
        let template = generate_config_template().unwrap();
        let parsed: NodeConfig = toml::from_str(&template).unwrap();
        assert_eq!(parsed.peer_name, "my-peer");
        assert_eq!(parsed.kad_port, 21300);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("node.toml");
        std::fs::write(
            &path,
            format!(
                "peer_name = \"bob\"\nstorage_path = \"{}\"\nweb_socket_port = 10200\n",
                temp_dir.path().display()
            ),
        )
        .unwrap();

        let cli = Cli {
            config: Some(path),
            connect_port: Some(10201),
            ..Cli::default()
        };
        let config = NodeConfig::load(&cli).unwrap();

        assert_eq!(config.peer_name, "bob");
        assert_eq!(config.web_socket_port, 10200);
        assert_eq!(config.connect_port, 10201);
    }
}
