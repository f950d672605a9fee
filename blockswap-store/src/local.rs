//! File-per-block storage on the local filesystem

use crate::{BlockStorage, StoreError, StoreResult};
use async_trait::async_trait;
use blockswap_core::BlockId;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Block store rooted at a fixed directory.
///
/// Each block is a single file named by the block's canonical CID string.
/// There is no sharding, no metadata sidecar and no cross-operation lock;
/// concurrent `put` and `get` on the same id rely on the filesystem.
#[derive(Debug, Clone)]
pub struct LocalBlockStore {
    root: PathBuf,
}

impl LocalBlockStore {
    /// Open a store over an existing root directory.
    ///
    /// The root is never created; a missing root is an error.
    pub fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(StoreError::RootNotFound(root.to_path_buf()));
        }

        debug!(root = %root.display(), "Opened local block store");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing a block
    pub fn block_path(&self, id: &BlockId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Identifiers of every stored block.
    ///
    /// Files whose names are not canonical identifiers are skipped.
    pub async fn list(&self) -> StoreResult<Vec<BlockId>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.parse::<BlockId>().ok()) else {
                debug!(file = ?name, "Skipping non-block file");
                continue;
            };
            if entry.file_type().await?.is_file() {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    fn map_io(id: &BlockId, err: io::Error) -> StoreError {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(*id)
        } else {
            warn!(block = %id, error = %err, "Block store I/O failure");
            StoreError::Io(err)
        }
    }
}

#[async_trait]
impl BlockStorage for LocalBlockStore {
    async fn get(&self, id: &BlockId) -> StoreResult<Vec<u8>> {
        tokio::fs::read(self.block_path(id))
            .await
            .map_err(|e| Self::map_io(id, e))
    }

    async fn put(&self, id: &BlockId, block: &[u8]) -> StoreResult<()> {
        tokio::fs::write(self.block_path(id), block)
            .await
            .map_err(|e| {
                warn!(block = %id, error = %e, "Failed to write block");
                StoreError::Io(e)
            })?;

        debug!(block = %id, size = block.len(), "Stored block");
        Ok(())
    }

    async fn delete(&self, id: &BlockId) -> StoreResult<()> {
        tokio::fs::remove_file(self.block_path(id))
            .await
            .map_err(|e| Self::map_io(id, e))?;

        debug!(block = %id, "Deleted block");
        Ok(())
    }

    fn has(&self, id: &BlockId) -> bool {
        self.block_path(id).is_file()
    }

    async fn size(&self, id: &BlockId) -> StoreResult<u64> {
        let metadata = tokio::fs::metadata(self.block_path(id))
            .await
            .map_err(|e| Self::map_io(id, e))?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn block_id(data: &[u8]) -> BlockId {
        BlockId::for_data(data).unwrap()
    }

    #[test]
    fn test_open_requires_existing_root() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("missing");

        let err = LocalBlockStore::open(&missing).unwrap_err();
        assert!(matches!(err, StoreError::RootNotFound(ref path) if path == &missing));
        assert!(err.is_not_found());
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_block_file_layout() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlockStore::open(temp_dir.path()).unwrap();
        let id = block_id(b"layout");

        store.put(&id, b"layout").await.unwrap();

        let expected = temp_dir.path().join(id.to_string());
        assert_eq!(store.block_path(&id), expected);
        assert_eq!(std::fs::read(expected).unwrap(), b"layout");
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlockStore::open(temp_dir.path()).unwrap();
        let id = block_id(b"first");

        store.put(&id, b"first").await.unwrap();
        store.put(&id, b"second version").await.unwrap();

        assert_eq!(store.get(&id).await.unwrap(), b"second version");
        assert_eq!(store.size(&id).await.unwrap(), 14);
    }

    #[tokio::test]
    async fn test_delete_removes_block() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlockStore::open(temp_dir.path()).unwrap();
        let id = block_id(b"gone");

        store.put(&id, b"gone").await.unwrap();
        assert!(store.has(&id));

        store.delete(&id).await.unwrap();
        assert!(!store.has(&id));
        assert!(matches!(
            store.delete(&id).await,
            Err(StoreError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_list_skips_foreign_files() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlockStore::open(temp_dir.path()).unwrap();
        let a = block_id(b"a");
        let b = block_id(b"b");

        store.put(&a, b"a").await.unwrap();
        store.put(&b, b"b").await.unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), b"x").unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let temp_dir = tempdir().unwrap();
        let store = LocalBlockStore::open(temp_dir.path()).unwrap();
        let id = block_id(b"once");

        assert!(store.put_if_absent(&id, b"once").await.unwrap());
        assert!(!store.put_if_absent(&id, b"replacement").await.unwrap());
        assert_eq!(store.get(&id).await.unwrap(), b"once");
    }
}
