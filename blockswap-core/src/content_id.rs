//! Content identifiers for blocks and peers

use crate::{CoreError, CoreResult};
use ::cid::multihash::Multihash;
use ::cid::Cid;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub use ::cid::Version;

/// Multicodec code for raw binary content
pub const RAW_CODEC: u64 = 0x55;

/// Multihash code for BLAKE3 with a 256-bit digest
pub const BLAKE3_256: u64 = 0x1e;

/// Multihash code for SHA2-256, the only hash allowed in a v0 CID
pub const SHA2_256: u64 = 0x12;

/// Identifier of a stored block
pub type BlockId = ContentId;

/// Identifier of a network participant
///
/// Derived once from a human-chosen peer name and never changed for the
/// lifetime of the node.
pub type PeerCid = ContentId;

/// Self-describing content identifier.
///
/// Equality is structural: a v0 and a v1 identifier wrapping the same
/// multihash are different values, and so are their string forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Cid);

impl ContentId {
    /// Derive the v1 identifier (raw codec, BLAKE3-256) of a byte string
    pub fn for_data(data: &[u8]) -> CoreResult<Self> {
        let digest = blake3::hash(data);
        let hash = Multihash::<64>::wrap(BLAKE3_256, digest.as_bytes())
            .map_err(|e| CoreError::Multihash(e.to_string()))?;
        Ok(Self(Cid::new_v1(RAW_CODEC, hash)))
    }

    /// Derive a peer identity from a peer name
    pub fn for_peer_name(name: &str) -> CoreResult<PeerCid> {
        Self::for_data(name.as_bytes())
    }

    /// Borrow the underlying CID
    pub fn as_cid(&self) -> &Cid {
        &self.0
    }

    /// CID version of this identifier
    pub fn version(&self) -> Version {
        self.0.version()
    }

    /// Multicodec of the identified content
    pub fn codec(&self) -> u64 {
        self.0.codec()
    }

    /// Convert a v0 identifier to its v1 equivalent; v1 identifiers are returned as is
    pub fn to_v1(&self) -> CoreResult<Self> {
        self.0
            .into_v1()
            .map(Self)
            .map_err(|e| CoreError::InvalidCid {
                input: self.to_string(),
                reason: e.to_string(),
            })
    }
}

impl From<Cid> for ContentId {
    fn from(cid: Cid) -> Self {
        Self(cid)
    }
}

impl From<ContentId> for Cid {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ContentId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::try_from(s)
            .map(Self)
            .map_err(|e| CoreError::InvalidCid {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_data_is_deterministic() {
        let a = ContentId::for_data(b"hello block").unwrap();
        let b = ContentId::for_data(b"hello block").unwrap();
        let c = ContentId::for_data(b"another block").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.version(), Version::V1);
        assert_eq!(a.codec(), RAW_CODEC);
        assert_eq!(a.as_cid().hash().code(), BLAKE3_256);
    }

    #[test]
    fn test_peer_name_derivation() {
        let alice = ContentId::for_peer_name("alice").unwrap();
        assert_eq!(alice, ContentId::for_peer_name("alice").unwrap());
        assert_ne!(alice, ContentId::for_peer_name("bob").unwrap());
        assert_eq!(alice, ContentId::for_data(b"alice").unwrap());
    }

    #[test]
    fn test_canonical_string_parses_back() {
        let id = ContentId::for_data(b"payload").unwrap();
        let text = id.to_string();

        // v1 identifiers use the multibase base32 prefix
        assert!(text.starts_with('b'));
        assert_eq!(text.parse::<ContentId>().unwrap(), id);
    }

    #[test]
    fn test_v0_and_v1_are_distinct() {
        let hash = Multihash::<64>::wrap(SHA2_256, &[7u8; 32]).unwrap();
        let v0 = ContentId::from(Cid::new_v0(hash).unwrap());
        let v1 = v0.to_v1().unwrap();

        assert_eq!(v0.version(), Version::V0);
        assert!(v0.to_string().starts_with("Qm"));
        assert_ne!(v0, v1);
        assert_ne!(v0.to_string(), v1.to_string());
        assert_eq!(v0.to_string().parse::<ContentId>().unwrap(), v0);
    }

    #[test]
    fn test_invalid_string_is_rejected() {
        let err = "not-a-cid".parse::<ContentId>().unwrap_err();
        match err {
            CoreError::InvalidCid { input, .. } => assert_eq!(input, "not-a-cid"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let id = ContentId::for_data(b"json").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let back: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ContentId>("\"not a cid\"").is_err());
    }
}
