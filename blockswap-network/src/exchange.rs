//! Traits the block-exchange engine is written against

use crate::{InboundArrival, Network, NetworkResult, PeerSession};
use async_trait::async_trait;
use blockswap_core::{BlockId, PeerCid};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::time::Duration;

/// A frame channel to one remote peer
#[async_trait]
pub trait ExchangePeer: Send + Sync {
    fn remote(&self) -> &PeerCid;

    async fn send(&self, frame: Bytes) -> NetworkResult<()>;

    /// `None` once the peer is gone
    async fn recv(&self) -> Option<NetworkResult<Bytes>>;

    async fn ping(&self) -> NetworkResult<Option<Duration>>;

    async fn close(&self) -> NetworkResult<()>;
}

/// Discovery and dialing as seen by the exchange engine
#[async_trait]
pub trait ExchangeNetwork: Send + Sync {
    type Peer: ExchangePeer;

    async fn publish_uri(&self, uri: &str) -> NetworkResult<()>;

    async fn connect(&self, peer: &PeerCid) -> NetworkResult<Self::Peer>;

    async fn announce_provider(&self, block: &BlockId) -> NetworkResult<()>;

    async fn find_providers(&self, block: &BlockId) -> NetworkResult<BTreeSet<PeerCid>>;

    /// Sessions opened by remote peers; meant for a single consumer
    fn inbound_sessions(&self) -> BoxStream<'static, (PeerCid, Self::Peer)>;
}

#[async_trait]
impl ExchangePeer for PeerSession {
    fn remote(&self) -> &PeerCid {
        PeerSession::remote(self)
    }

    async fn send(&self, frame: Bytes) -> NetworkResult<()> {
        PeerSession::send(self, frame).await
    }

    async fn recv(&self) -> Option<NetworkResult<Bytes>> {
        PeerSession::recv(self).await
    }

    async fn ping(&self) -> NetworkResult<Option<Duration>> {
        PeerSession::ping(self).await
    }

    async fn close(&self) -> NetworkResult<()> {
        PeerSession::close(self).await
    }
}

#[async_trait]
impl ExchangeNetwork for Network {
    type Peer = PeerSession;

    async fn publish_uri(&self, uri: &str) -> NetworkResult<()> {
        Network::publish_uri(self, uri).await
    }

    async fn connect(&self, peer: &PeerCid) -> NetworkResult<PeerSession> {
        Network::connect(self, peer).await
    }

    async fn announce_provider(&self, block: &BlockId) -> NetworkResult<()> {
        Network::announce_provider(self, block).await
    }

    async fn find_providers(&self, block: &BlockId) -> NetworkResult<BTreeSet<PeerCid>> {
        Network::find_providers(self, block).await
    }

    fn inbound_sessions(&self) -> BoxStream<'static, (PeerCid, PeerSession)> {
        Network::inbound_sessions(self)
            .map(|InboundArrival { peer, session }| (peer, session))
            .boxed()
    }
}
