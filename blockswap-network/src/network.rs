//! Network facade composing the directory and the connection manager

use crate::{
    ConnectionManager, DhtIdentity, Directory, InboundArrival, KademliaStore, NetworkConfig,
    NetworkError, NetworkResult, PeerSession, SharedRecordStore,
};
use blockswap_core::{BlockId, PeerCid};
use futures::stream::BoxStream;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the exchange engine needs from the network.
///
/// Built by [`Network::start`], which either returns a fully started node
/// or leaves nothing running.
pub struct Network {
    config: NetworkConfig,
    directory: Directory,
    connections: ConnectionManager,
}

impl Network {
    /// Bind the listener, join the directory and publish the local URI
    pub async fn start(
        config: NetworkConfig,
        local: PeerCid,
        records: SharedRecordStore,
    ) -> NetworkResult<Self> {
        config.validate().map_err(NetworkError::Config)?;

        let directory = Directory::new(records, local, config.directory.clone());
        let connections =
            match ConnectionManager::listen(config.listen_address, local, directory.clone()).await
            {
                Ok(connections) => connections,
                Err(e) => {
                    directory.records().shutdown().await;
                    return Err(e);
                }
            };

        let uri = advertised_uri(&config, connections.local_addr());
        if let Err(e) = join(&directory, &uri).await {
            warn!(error = %e, "Network startup failed, releasing listener");
            connections.stop().await;
            directory.records().shutdown().await;
            return Err(e);
        }

        info!(peer = %local, %uri, "Network started");
        Ok(Self {
            config,
            directory,
            connections,
        })
    }

    /// Start with a Kademlia record store configured from `config.dht`
    pub async fn with_kademlia(config: NetworkConfig, local: PeerCid) -> NetworkResult<Self> {
        config.validate().map_err(NetworkError::Config)?;
        let identity = DhtIdentity::from_config(&config.dht)?;
        let records = KademliaStore::spawn(identity, config.dht.clone()).await?;
        Self::start(config, local, Arc::new(records)).await
    }

    /// Release the listener, close acceptor sessions and leave the directory
    pub async fn stop(&self) {
        self.connections.stop().await;
        self.directory.records().shutdown().await;
        info!(peer = %self.local_peer(), "Network stopped");
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn local_peer(&self) -> &PeerCid {
        self.directory.local_peer()
    }

    /// Address the WebSocket listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.connections.local_addr()
    }

    /// URI published for the local peer
    pub fn public_uri(&self) -> String {
        advertised_uri(&self.config, self.local_addr())
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Overwrite the published URI of the local peer
    pub async fn publish_uri(&self, uri: &str) -> NetworkResult<()> {
        self.directory.publish_self(uri).await
    }

    pub async fn connect(&self, peer: &PeerCid) -> NetworkResult<PeerSession> {
        self.connections.connect(peer).await
    }

    pub async fn announce_provider(&self, block: &BlockId) -> NetworkResult<()> {
        self.directory.announce_provider(block).await
    }

    pub async fn find_providers(&self, block: &BlockId) -> NetworkResult<BTreeSet<PeerCid>> {
        self.directory.find_providers(block).await
    }

    pub fn inbound_sessions(&self) -> BoxStream<'static, InboundArrival> {
        self.connections.inbound_sessions()
    }
}

async fn join(directory: &Directory, uri: &str) -> NetworkResult<()> {
    directory.records().bootstrap().await?;
    directory.publish_self(uri).await
}

/// Published URI; an advertised port of 0 means the port actually bound
fn advertised_uri(config: &NetworkConfig, bound: SocketAddr) -> String {
    if config.connect_port == 0 {
        format!("{}{}:{}", config.uri_prefix, config.connect_host, bound.port())
    } else {
        config.public_uri()
    }
}
