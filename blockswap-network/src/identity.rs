//! DHT node identity and keystore handling

use crate::{DhtConfig, NetworkError, NetworkResult};
use libp2p::{identity::Keypair, PeerId};
use std::fs;
use std::path::Path;
use tracing::info;

/// Keypair the DHT node authenticates its connections with.
///
/// This is unrelated to the node's [`PeerCid`](blockswap_core::PeerCid);
/// the directory never stores libp2p peer ids.
#[derive(Debug, Clone)]
pub struct DhtIdentity {
    keypair: Keypair,
    peer_id: PeerId,
}

impl DhtIdentity {
    /// Generate a fresh ed25519 identity
    pub fn generate() -> Self {
        Self::from_keypair(Keypair::generate_ed25519())
    }

    fn from_keypair(keypair: Keypair) -> Self {
        let peer_id = PeerId::from(&keypair.public());
        Self { keypair, peer_id }
    }

    /// Identity described by a DHT configuration
    pub fn from_config(config: &DhtConfig) -> NetworkResult<Self> {
        match &config.keystore_path {
            Some(path) => Self::load_or_generate(path),
            None => Ok(Self::generate()),
        }
    }

    /// Load identity from a keystore file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> NetworkResult<Self> {
        let data = fs::read(path.as_ref())?;
        let keypair = Keypair::from_protobuf_encoding(&data)
            .map_err(|e| NetworkError::Identity(format!("Failed to decode keypair: {}", e)))?;

        Ok(Self::from_keypair(keypair))
    }

    /// Save identity to a keystore file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> NetworkResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let encoded = self
            .keypair
            .to_protobuf_encoding()
            .map_err(|e| NetworkError::Identity(format!("Failed to encode keypair: {}", e)))?;

        fs::write(path.as_ref(), encoded)?;
        Ok(())
    }

    /// Load the keystore at `path`, or create it when missing.
    ///
    /// A keystore that exists but cannot be decoded is an error rather
    /// than being silently replaced.
    pub fn load_or_generate<P: AsRef<Path>>(path: P) -> NetworkResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            let identity = Self::load_from_file(path)?;
            info!("Loaded DHT identity: {}", identity.peer_id);
            return Ok(identity);
        }

        let identity = Self::generate();
        identity.save_to_file(path)?;
        info!("Saved new DHT identity: {}", identity.peer_id);
        Ok(identity)
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_identity_persists() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("keys").join("dht.key");

        let created = DhtIdentity::load_or_generate(&path).unwrap();
        assert!(path.exists());

        let loaded = DhtIdentity::load_or_generate(&path).unwrap();
        assert_eq!(created.peer_id(), loaded.peer_id());
    }

    #[test]
    fn test_corrupt_keystore_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("dht.key");
        fs::write(&path, b"garbage").unwrap();

        assert!(matches!(
            DhtIdentity::load_or_generate(&path),
            Err(NetworkError::Identity(_))
        ));
    }

    #[test]
    fn test_from_config_without_keystore() {
        let a = DhtIdentity::from_config(&DhtConfig::default()).unwrap();
        let b = DhtIdentity::from_config(&DhtConfig::default()).unwrap();
        assert_ne!(a.peer_id(), b.peer_id());
    }
}
