//! Peer and provider records over a shared record store

use crate::{DirectoryConfig, NetworkError, NetworkResult, SharedRecordStore};
use blockswap_core::{BlockId, PeerCid};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reachability record of one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub uri: String,
}

/// Peers known to hold a block.
///
/// Entries are kept as raw strings so that one malformed entry written by
/// another node does not make the whole record unreadable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub peers: BTreeSet<String>,
}

/// Provider record as found on the wire, before entries are checked
#[derive(Deserialize)]
struct RawProviderRecord {
    peers: Vec<serde_json::Value>,
}

impl ProviderRecord {
    /// Parse a stored record, dropping entries that are not strings.
    ///
    /// `None` when the value is not an object with a `peers` array.
    pub fn parse(key: &str, value: &[u8]) -> Option<Self> {
        let raw: RawProviderRecord = match serde_json::from_slice(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%key, error = %e, "Malformed provider record, ignoring it");
                return None;
            }
        };

        let peers = raw
            .peers
            .into_iter()
            .filter_map(|entry| match entry {
                serde_json::Value::String(peer) => Some(peer),
                other => {
                    warn!(%key, entry = %other, "Skipping non-string provider entry");
                    None
                }
            })
            .collect();
        Some(Self { peers })
    }
}

/// Directory key of a peer record
pub fn peer_key(peer: &PeerCid) -> String {
    format!("peer_{}", peer)
}

/// Directory key of a provider record
pub fn block_key(block: &BlockId) -> String {
    format!("block_{}", block)
}

/// Namespaced view over a [`RecordStore`](crate::RecordStore) for one local peer
#[derive(Clone)]
pub struct Directory {
    records: SharedRecordStore,
    local: PeerCid,
    config: DirectoryConfig,
}

impl Directory {
    pub fn new(records: SharedRecordStore, local: PeerCid, config: DirectoryConfig) -> Self {
        Self {
            records,
            local,
            config,
        }
    }

    pub fn local_peer(&self) -> &PeerCid {
        &self.local
    }

    /// Underlying record store
    pub fn records(&self) -> &SharedRecordStore {
        &self.records
    }

    /// Publish the URI other peers use to reach the local node
    pub async fn publish_self(&self, uri: &str) -> NetworkResult<()> {
        let record = PeerRecord {
            uri: uri.to_string(),
        };
        self.records
            .put(&peer_key(&self.local), serde_json::to_vec(&record)?)
            .await?;

        info!(peer = %self.local, %uri, "Published peer URI");
        Ok(())
    }

    /// Look up the URI a peer published.
    ///
    /// A missing or malformed record is `PeerNotFound`. Store failures pass
    /// through unchanged, so a DHT lookup that ran out of time is `Timeout`.
    pub async fn resolve(&self, peer: &PeerCid) -> NetworkResult<String> {
        let key = peer_key(peer);
        let value = self
            .records
            .get(&key)
            .await?
            .ok_or(NetworkError::PeerNotFound(*peer))?;

        match serde_json::from_slice::<PeerRecord>(&value) {
            Ok(record) => Ok(record.uri),
            Err(e) => {
                warn!(%key, error = %e, "Malformed peer record");
                Err(NetworkError::PeerNotFound(*peer))
            }
        }
    }

    /// Add the local peer to the provider record of `block`.
    ///
    /// The store has no atomic merge, so each attempt reads every copy of
    /// the record, writes their union plus the local id and reads the copies
    /// back. When any copy lacks the local id a concurrent writer won, and
    /// the cycle is retried after a jittered backoff.
    pub async fn announce_provider(&self, block: &BlockId) -> NetworkResult<()> {
        let key = block_key(block);
        let local = self.local.to_string();

        for attempt in 1..=self.config.announce_attempts {
            let mut record = merge(self.read_copies(&key).await?);
            record.peers.insert(local.clone());
            self.records.put(&key, serde_json::to_vec(&record)?).await?;

            let written = self.read_copies(&key).await?;
            if !written.is_empty() && written.iter().all(|copy| copy.peers.contains(&local)) {
                debug!(%key, attempt, copies = written.len(), "Announced provider");
                return Ok(());
            }

            warn!(%key, attempt, "Provider announcement lost to a concurrent writer");
            if attempt < self.config.announce_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(NetworkError::Directory(format!(
            "Provider record {} did not keep the local peer after {} attempts",
            key, self.config.announce_attempts
        )))
    }

    /// Announce every block in order and return how many succeeded.
    ///
    /// A block that cannot be announced is logged and skipped.
    pub async fn announce_providers<'a, I>(&self, blocks: I) -> usize
    where
        I: IntoIterator<Item = &'a BlockId>,
    {
        let mut announced = 0;
        for block in blocks {
            match self.announce_provider(block).await {
                Ok(()) => announced += 1,
                Err(e) => warn!(%block, error = %e, "Failed to announce provider"),
            }
        }
        announced
    }

    /// Peers other than the local one that announced `block`
    pub async fn find_providers(&self, block: &BlockId) -> NetworkResult<BTreeSet<PeerCid>> {
        let key = block_key(block);
        let record = merge(self.read_copies(&key).await?);

        let providers = record
            .peers
            .iter()
            .filter_map(|entry| match entry.parse::<PeerCid>() {
                Ok(peer) => Some(peer),
                Err(e) => {
                    warn!(%key, %entry, error = %e, "Skipping unparsable provider entry");
                    None
                }
            })
            .filter(|peer| *peer != self.local)
            .collect();

        Ok(providers)
    }

    /// Every readable copy of the provider record under `key`
    async fn read_copies(&self, key: &str) -> NetworkResult<Vec<ProviderRecord>> {
        let copies = self.records.get_copies(key).await?;
        Ok(copies
            .iter()
            .filter_map(|value| ProviderRecord::parse(key, value))
            .collect())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.announce_backoff * attempt;
        let jitter = rand::rng().random_range(0..=base.as_millis() as u64);
        base + Duration::from_millis(jitter)
    }
}

/// Union of the peers in every copy
fn merge(copies: Vec<ProviderRecord>) -> ProviderRecord {
    let peers = copies.into_iter().flat_map(|copy| copy.peers).collect();
    ProviderRecord { peers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryRecordStore, RecordStore};
    use std::sync::Arc;

    fn peer(name: &str) -> PeerCid {
        PeerCid::for_peer_name(name).unwrap()
    }

    fn directory(store: &MemoryRecordStore, name: &str) -> Directory {
        Directory::new(Arc::new(store.clone()), peer(name), DirectoryConfig::default())
    }

    #[test]
    fn test_record_keys() {
        let alice = peer("alice");
        assert_eq!(peer_key(&alice), format!("peer_{}", alice));
        assert_eq!(block_key(&alice), format!("block_{}", alice));
    }

    #[test]
    fn test_parse_provider_record() {
        let alice = peer("alice").to_string();
        let value = serde_json::to_vec(&serde_json::json!({ "peers": [alice, 7, "x"] })).unwrap();
        let record = ProviderRecord::parse("block_k", &value).unwrap();
        assert_eq!(
            record.peers,
            BTreeSet::from([peer("alice").to_string(), "x".to_string()])
        );

        assert!(ProviderRecord::parse("block_k", b"[1, 2]").is_none());
        assert!(ProviderRecord::parse("block_k", b"{\"peers\": \"alice\"}").is_none());
    }

    #[tokio::test]
    async fn test_wire_format() {
        let store = MemoryRecordStore::new();
        let alice = directory(&store, "alice");
        let block = BlockId::for_data(b"block").unwrap();

        alice.publish_self("ws://10.0.0.1:9000").await.unwrap();
        alice.announce_provider(&block).await.unwrap();

        let peer_json: serde_json::Value =
            serde_json::from_slice(&store.get(&peer_key(&peer("alice"))).await.unwrap().unwrap())
                .unwrap();
        assert_eq!(peer_json, serde_json::json!({ "uri": "ws://10.0.0.1:9000" }));

        let block_json: serde_json::Value =
            serde_json::from_slice(&store.get(&block_key(&block)).await.unwrap().unwrap()).unwrap();
        assert_eq!(
            block_json,
            serde_json::json!({ "peers": [peer("alice").to_string()] })
        );
    }

    #[tokio::test]
    async fn test_malformed_peer_record() {
        let store = MemoryRecordStore::new();
        let alice = directory(&store, "alice");
        let bob = peer("bob");

        store
            .put(&peer_key(&bob), b"{\"url\": 1}".to_vec())
            .await
            .unwrap();

        assert!(matches!(
            alice.resolve(&bob).await,
            Err(NetworkError::PeerNotFound(p)) if p == bob
        ));
    }

    #[tokio::test]
    async fn test_malformed_provider_record_is_replaced() {
        let store = MemoryRecordStore::new();
        let alice = directory(&store, "alice");
        let block = BlockId::for_data(b"data").unwrap();

        store
            .put(&block_key(&block), b"not json".to_vec())
            .await
            .unwrap();
        assert!(alice.find_providers(&block).await.unwrap().is_empty());

        alice.announce_provider(&block).await.unwrap();
        let bob = directory(&store, "bob");
        assert!(bob.find_providers(&block).await.unwrap().contains(&peer("alice")));
    }

    #[tokio::test]
    async fn test_announce_is_idempotent() {
        let store = MemoryRecordStore::new();
        let alice = directory(&store, "alice");
        let block = BlockId::for_data(b"twice").unwrap();

        alice.announce_provider(&block).await.unwrap();
        alice.announce_provider(&block).await.unwrap();

        let record: ProviderRecord =
            serde_json::from_slice(&store.get(&block_key(&block)).await.unwrap().unwrap()).unwrap();
        assert_eq!(record.peers.len(), 1);
    }
}
