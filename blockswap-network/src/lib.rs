//! Blockswap networking layer
//!
//! Peer discovery through a directory of peer and provider records kept in
//! a Kademlia DHT, and duplex frame sessions between peers over WebSocket
//! connections. [`Network`] ties both together for the exchange engine.

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod dht;
pub mod directory;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod network;
pub mod record_store;
pub mod session;
pub mod transport;

pub use bootstrap::BootstrapNodes;
pub use config::{DhtConfig, DirectoryConfig, NetworkConfig};
pub use connection::{ConnectionManager, InboundArrival, PEER_CID_HEADER};
pub use dht::KademliaStore;
pub use directory::{Directory, PeerRecord, ProviderRecord};
pub use error::{NetworkError, NetworkResult};
pub use exchange::{ExchangeNetwork, ExchangePeer};
pub use identity::DhtIdentity;
pub use network::Network;
pub use record_store::{MemoryRecordStore, RecordStore, SharedRecordStore};
pub use session::{PeerSession, SessionRole};

/// Re-export commonly used types
pub use libp2p::{Multiaddr, PeerId};
