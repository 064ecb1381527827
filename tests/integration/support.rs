//! Shared fixtures: on-disk trees and fault-injecting store wrappers

use arbor::blob::{BlobKey, BlobRemoval, BlobStore, FsBlobStore, MemoryBlobStore, StagedBatch};
use arbor::config::CatalogSettings;
use arbor::error::{ApiError, StorageError};
use arbor::store::persistence::SledResourceStore;
use arbor::store::{
    CatalogSnapshot, CatalogTxn, MemoryResourceStore, RelationCounts, ResourceNode, ResourceStore,
};
use arbor::tree::TreeService;
use arbor::types::{BatchId, NodeId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type DiskTree = TreeService<SledResourceStore, FsBlobStore>;

pub fn test_settings() -> CatalogSettings {
    CatalogSettings {
        lock_timeout_ms: 500,
        blob_timeout_ms: 500,
        ..CatalogSettings::default()
    }
}

/// Sled catalog and upload directory under `dir`, with a fresh root
pub async fn disk_tree(dir: &Path) -> (DiskTree, NodeId) {
    disk_tree_with(dir, test_settings()).await
}

pub async fn disk_tree_with(dir: &Path, settings: CatalogSettings) -> (DiskTree, NodeId) {
    let store = SledResourceStore::new(dir.join("catalog")).unwrap();
    let blobs = FsBlobStore::new(dir.join("uploads")).unwrap();
    let tree = TreeService::new(Arc::new(store), Arc::new(blobs), settings).unwrap();
    let root = tree.initialize_catalog().await.unwrap();
    (tree, root)
}

pub type FaultyTree =
    TreeService<FaultyResourceStore<MemoryResourceStore>, FaultyBlobStore<MemoryBlobStore>>;

/// In-memory tree whose stores accept injected faults
pub async fn faulty_tree(blob_timeout_ms: u64) -> (FaultyTree, NodeId) {
    let settings = CatalogSettings {
        blob_timeout_ms,
        ..test_settings()
    };
    let tree = TreeService::new(
        Arc::new(FaultyResourceStore::new(MemoryResourceStore::new())),
        Arc::new(FaultyBlobStore::new(MemoryBlobStore::new())),
        settings,
    )
    .unwrap();
    let root = tree.initialize_catalog().await.unwrap();
    (tree, root)
}

fn injected(what: &str) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("injected {} failure", what),
    ))
}

/// Blob store wrapper whose operations can be made to fail or hang
pub struct FaultyBlobStore<B> {
    inner: B,
    pub fail_put: AtomicBool,
    pub stall_put: AtomicBool,
    pub fail_remove: AtomicBool,
    pub fail_restore: AtomicBool,
    pub fail_purge: AtomicBool,
    /// Stage calls that succeed before staging starts failing
    pub fail_stage_after: Mutex<Option<usize>>,
    /// Stage calls that succeed before staging hangs
    pub stall_stage_after: Mutex<Option<usize>>,
    stage_calls: AtomicUsize,
}

impl<B: BlobStore> FaultyBlobStore<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            fail_put: AtomicBool::new(false),
            stall_put: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            fail_restore: AtomicBool::new(false),
            fail_purge: AtomicBool::new(false),
            fail_stage_after: Mutex::new(None),
            stall_stage_after: Mutex::new(None),
            stage_calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn heal(&self) {
        for flag in [
            &self.fail_put,
            &self.stall_put,
            &self.fail_remove,
            &self.fail_restore,
            &self.fail_purge,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
        *self.fail_stage_after.lock() = None;
        *self.stall_stage_after.lock() = None;
    }
}

async fn hang() {
    tokio::time::sleep(Duration::from_secs(3600)).await;
}

#[async_trait]
impl<B: BlobStore> BlobStore for FaultyBlobStore<B> {
    async fn put(&self, key: &BlobKey, content: &[u8]) -> Result<String, StorageError> {
        if self.stall_put.load(Ordering::SeqCst) {
            hang().await;
        }
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(injected("put"));
        }
        self.inner.put(key, content).await
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn remove(&self, key: &BlobKey) -> Result<BlobRemoval, StorageError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(injected("remove"));
        }
        self.inner.remove(key).await
    }

    async fn stage(&self, batch: &BatchId, key: &BlobKey) -> Result<BlobRemoval, StorageError> {
        let call = self.stage_calls.fetch_add(1, Ordering::SeqCst);
        let stall_after = *self.stall_stage_after.lock();
        if stall_after.map_or(false, |n| call >= n) {
            hang().await;
        }
        let fail_after = *self.fail_stage_after.lock();
        if fail_after.map_or(false, |n| call >= n) {
            return Err(injected("stage"));
        }
        self.inner.stage(batch, key).await
    }

    async fn restore(&self, batch: &BatchId, key: &BlobKey) -> Result<(), StorageError> {
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(injected("restore"));
        }
        self.inner.restore(batch, key).await
    }

    async fn purge(&self, batch: &BatchId) -> Result<(), StorageError> {
        if self.fail_purge.load(Ordering::SeqCst) {
            return Err(injected("purge"));
        }
        self.inner.purge(batch).await
    }

    async fn staged_batches(&self) -> Result<Vec<StagedBatch>, StorageError> {
        self.inner.staged_batches().await
    }

    fn location(&self, key: &BlobKey) -> String {
        self.inner.location(key)
    }
}

/// Resource store wrapper whose write transactions can be made to fail
pub struct FaultyResourceStore<S> {
    inner: S,
    pub fail_writes: AtomicBool,
}

impl<S: ResourceStore> FaultyResourceStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl<S: ResourceStore> ResourceStore for FaultyResourceStore<S> {
    fn read<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: Fn(&dyn CatalogTxn) -> Result<T, ApiError>,
    {
        self.inner.read(f)
    }

    fn write<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: Fn(&dyn CatalogTxn) -> Result<T, ApiError>,
    {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ApiError::StorageFailure(StorageError::Transaction(
                "injected write failure".to_string(),
            )));
        }
        self.inner.write(f)
    }

    fn find_by_title(&self, title: &str) -> Result<Vec<ResourceNode>, ApiError> {
        self.inner.find_by_title(title)
    }

    fn counts(&self) -> Result<RelationCounts, ApiError> {
        self.inner.counts()
    }

    fn scan(&self) -> Result<CatalogSnapshot, ApiError> {
        self.inner.scan()
    }

    fn reset(&self) -> Result<(), ApiError> {
        self.inner.reset()
    }
}
