//! Network error types

use blockswap_core::{CoreError, PeerCid};
use thiserror::Error;

pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Libp2p transport error: {0}")]
    Transport(#[from] libp2p::TransportError<std::io::Error>),

    #[error("Peer not found: {0}")]
    PeerNotFound(PeerCid),

    #[error("Failed to connect to peer {peer}: {reason}")]
    ConnectFailure { peer: PeerCid, reason: String },

    #[error("Failed to send frame: {0}")]
    SendFailure(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Record store error: {0}")]
    RecordStore(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid content identifier: {0}")]
    Cid(#[from] CoreError),

    #[error("DHT identity error: {0}")]
    Identity(String),

    #[error("Network timeout")]
    Timeout,

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
