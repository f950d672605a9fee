//! Bootstrap node parsing

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::net::SocketAddr;
use std::str::FromStr;

/// Known DHT nodes a new node joins through
pub struct BootstrapNodes;

impl BootstrapNodes {
    /// Parse bootstrap nodes from command line or config values.
    ///
    /// Each entry is either a multiaddr (`/ip4/10.0.0.1/tcp/21300`) or a
    /// plain `host:port` pair, which is turned into a TCP multiaddr.
    pub fn from_strings<I, S>(nodes: I) -> Result<Vec<Multiaddr>, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        nodes
            .into_iter()
            .map(|s| Self::parse_node(s.as_ref()))
            .collect()
    }

    /// Parse a single bootstrap node
    pub fn parse_node(node: &str) -> Result<Multiaddr, String> {
        let node = node.trim();
        if node.starts_with('/') {
            return Multiaddr::from_str(node)
                .map_err(|e| format!("Invalid multiaddr '{}': {}", node, e));
        }

        if let Ok(addr) = node.parse::<SocketAddr>() {
            let ip = match addr {
                SocketAddr::V4(v4) => Protocol::Ip4(*v4.ip()),
                SocketAddr::V6(v6) => Protocol::Ip6(*v6.ip()),
            };
            return Ok(Multiaddr::empty()
                .with(ip)
                .with(Protocol::Tcp(addr.port())));
        }

        let (host, port) = node
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid bootstrap node '{}': expected host:port", node))?;
        let port: u16 = port
            .parse()
            .map_err(|_| format!("Invalid port in bootstrap node '{}'", node))?;
        if host.is_empty() {
            return Err(format!("Missing host in bootstrap node '{}'", node));
        }

        Ok(Multiaddr::empty()
            .with(Protocol::Dns4(host.to_string().into()))
            .with(Protocol::Tcp(port)))
    }

    /// Peer id embedded in a `/p2p/..` suffix, if any
    pub fn peer_id(addr: &Multiaddr) -> Option<PeerId> {
        addr.iter().find_map(|p| match p {
            Protocol::P2p(peer_id) => Some(peer_id),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiaddr() {
        let nodes = BootstrapNodes::from_strings(["/ip4/10.0.0.1/tcp/21300"]).unwrap();
        assert_eq!(nodes[0].to_string(), "/ip4/10.0.0.1/tcp/21300");
    }

    #[test]
    fn test_parse_host_port() {
        let nodes = BootstrapNodes::from_strings(vec![
            "127.0.0.1:21300".to_string(),
            "boot.local:4000".to_string(),
        ])
        .unwrap();

        assert_eq!(nodes[0].to_string(), "/ip4/127.0.0.1/tcp/21300");
        assert_eq!(nodes[1].to_string(), "/dns4/boot.local/tcp/4000");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(BootstrapNodes::parse_node("no-port").is_err());
        assert!(BootstrapNodes::parse_node("host:notaport").is_err());
        assert!(BootstrapNodes::parse_node(":21300").is_err());
        assert!(BootstrapNodes::parse_node("/ip4/not-an-ip/tcp/1").is_err());
    }

    #[test]
    fn test_peer_id_suffix() {
        let peer_id = libp2p::identity::Keypair::generate_ed25519()
            .public()
            .to_peer_id();
        let addr: Multiaddr = format!("/ip4/127.0.0.1/tcp/21300/p2p/{}", peer_id)
            .parse()
            .unwrap();

        assert_eq!(BootstrapNodes::peer_id(&addr), Some(peer_id));
        assert_eq!(
            BootstrapNodes::peer_id(&"/ip4/127.0.0.1/tcp/1".parse().unwrap()),
            None
        );
    }
}
