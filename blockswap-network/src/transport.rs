//! libp2p transport stack for the DHT

use crate::{DhtConfig, NetworkError, NetworkResult};
use libp2p::{
    core::{muxing::StreamMuxerBox, transport::Boxed, upgrade, Transport},
    dns,
    identity::Keypair,
    multiaddr::Protocol,
    noise::Config as NoiseConfig,
    tcp::{self, Config as TcpConfig},
    yamux::Config as YamuxConfig,
    Multiaddr, PeerId,
};

/// Build the libp2p transport stack used by the DHT swarm
pub fn build_transport(
    keypair: &Keypair,
    config: &DhtConfig,
) -> NetworkResult<Boxed<(PeerId, StreamMuxerBox)>> {
    let tcp_transport = tcp::tokio::Transport::new(TcpConfig::new().nodelay(true));
    // DNS resolution for /dns4 bootstrap nodes
    let dns_transport = dns::tokio::Transport::system(tcp_transport)
        .map_err(|e| NetworkError::Config(format!("DNS transport error: {}", e)))?;
    let noise_config = NoiseConfig::new(keypair)
        .map_err(|e| NetworkError::Config(format!("Noise config error: {}", e)))?;

    let transport = dns_transport
        .upgrade(upgrade::Version::V1Lazy)
        .authenticate(noise_config)
        .multiplex(YamuxConfig::default())
        .timeout(config.connection_timeout)
        .boxed();

    Ok(transport)
}

/// Address filtering for addresses learned from remote peers
pub struct AddressFilter;

impl AddressFilter {
    /// Check that an address carries a host and a TCP port
    pub fn is_valid_address(addr: &Multiaddr) -> bool {
        let mut has_ip = false;
        let mut has_tcp = false;

        for protocol in addr.iter() {
            match protocol {
                Protocol::Ip4(ip) => has_ip = !ip.is_unspecified(),
                Protocol::Ip6(ip) => has_ip = !ip.is_unspecified(),
                Protocol::Dns(_) | Protocol::Dns4(_) | Protocol::Dns6(_) => has_ip = true,
                Protocol::Tcp(port) => has_tcp = port != 0,
                _ => {}
            }
        }

        has_ip && has_tcp
    }

    /// Keep only addresses worth adding to the routing table
    pub fn filter_addresses(addresses: Vec<Multiaddr>) -> Vec<Multiaddr> {
        addresses
            .into_iter()
            .filter(Self::is_valid_address)
            .collect()
    }
}
