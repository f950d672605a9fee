//! Key/value record storage underneath the directory

use crate::NetworkResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Distributed key/value store the directory reads and writes.
///
/// `put` replaces whatever value was stored under the key. There is no
/// compare-and-swap, so concurrent read-modify-write cycles on the same
/// key can lose updates.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Current value under `key`, or `None` when no value is reachable
    async fn get(&self, key: &str) -> NetworkResult<Option<Vec<u8>>>;

    /// Every copy of `key` the store can reach.
    ///
    /// Replicated stores may hold diverging copies after concurrent writes;
    /// a store with a single copy per key returns at most one value.
    async fn get_copies(&self, key: &str) -> NetworkResult<Vec<Vec<u8>>> {
        Ok(self.get(key).await?.into_iter().collect())
    }

    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: Vec<u8>) -> NetworkResult<()>;

    /// Join the wider network; a no-op for stores without peers
    async fn bootstrap(&self) -> NetworkResult<()> {
        Ok(())
    }

    /// Stop background work and release network resources
    async fn shutdown(&self) {}
}

pub type SharedRecordStore = Arc<dyn RecordStore>;

/// In-process record store.
///
/// Clones share the same map, so several nodes built from clones of one
/// store see a single consistent directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Remove a record, returning its last value
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.records.write().remove(key)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, key: &str) -> NetworkResult<Option<Vec<u8>>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> NetworkResult<()> {
        self.records.write().insert(key.to_string(), value);
        Ok(())
    }
}
