//! In-memory blob store

use super::{BlobKey, BlobRemoval, BlobStore, StagedBatch};
use crate::error::StorageError;
use crate::types::BatchId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Blobs {
    live: HashMap<BlobKey, Vec<u8>>,
    staged: BTreeMap<BatchId, BTreeMap<BlobKey, Vec<u8>>>,
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<Blobs>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live blobs
    pub fn len(&self) -> usize {
        self.blobs.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<BlobKey> {
        let mut keys: Vec<BlobKey> = self.blobs.lock().live.keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn missing_staged(batch: &BatchId, key: &BlobKey) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("blob {} is not staged in batch {}", key, batch),
    ))
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &BlobKey, content: &[u8]) -> Result<String, StorageError> {
        self.blobs.lock().live.insert(key.clone(), content.to_vec());
        Ok(self.location(key))
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.lock().live.get(key).cloned())
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, StorageError> {
        Ok(self.blobs.lock().live.contains_key(key))
    }

    async fn remove(&self, key: &BlobKey) -> Result<BlobRemoval, StorageError> {
        Ok(match self.blobs.lock().live.remove(key) {
            Some(_) => BlobRemoval::Removed,
            None => BlobRemoval::Missing,
        })
    }

    async fn stage(&self, batch: &BatchId, key: &BlobKey) -> Result<BlobRemoval, StorageError> {
        let mut blobs = self.blobs.lock();
        match blobs.live.remove(key) {
            Some(bytes) => {
                blobs.staged.entry(*batch).or_default().insert(key.clone(), bytes);
                Ok(BlobRemoval::Removed)
            }
            None => Ok(BlobRemoval::Missing),
        }
    }

    async fn restore(&self, batch: &BatchId, key: &BlobKey) -> Result<(), StorageError> {
        let mut blobs = self.blobs.lock();
        let bytes = blobs
            .staged
            .get_mut(batch)
            .and_then(|staged| staged.remove(key))
            .ok_or_else(|| missing_staged(batch, key))?;
        blobs.live.insert(key.clone(), bytes);
        Ok(())
    }

    async fn purge(&self, batch: &BatchId) -> Result<(), StorageError> {
        self.blobs.lock().staged.remove(batch);
        Ok(())
    }

    async fn staged_batches(&self) -> Result<Vec<StagedBatch>, StorageError> {
        Ok(self
            .blobs
            .lock()
            .staged
            .iter()
            .map(|(batch, keys)| StagedBatch {
                batch: *batch,
                keys: keys.keys().cloned().collect(),
            })
            .collect())
    }

    fn location(&self, key: &BlobKey) -> String {
        format!("memory://{}", key)
    }
}
