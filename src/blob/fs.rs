//! Filesystem blob store.
//!
//! Live blobs sit directly in the uploads directory. Staged blobs are moved
//! (renamed) into `.staging/<batch>/` under the same directory, so staging and
//! restoring never copy payload bytes.

use super::{BlobKey, BlobRemoval, BlobStore, StagedBatch};
use crate::error::StorageError;
use crate::types::BatchId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

const STAGING_DIR: &str = ".staging";
const PARTIAL_SUFFIX: &str = "part";
const WRITE_CHUNK_BYTES: usize = 1 << 20;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create the store, creating the uploads directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn live_path(&self, key: &BlobKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    fn batch_dir(&self, batch: &BatchId) -> PathBuf {
        self.root.join(STAGING_DIR).join(batch.to_string())
    }

    fn staged_path(&self, batch: &BatchId, key: &BlobKey) -> PathBuf {
        self.batch_dir(batch).join(key.file_name())
    }

    fn partial_path(&self, key: &BlobKey) -> PathBuf {
        self.root.join(format!("{}.{}", key.file_name(), PARTIAL_SUFFIX))
    }
}

/// An upload being written to `partial` and renamed onto `path` when complete.
///
/// Once `abandoned` is set the rename never happens and the partial file is
/// removed. The flag is checked under its lock together with the rename, so a
/// caller that gave up either sees the finished blob or no file at all.
struct PendingWrite {
    partial: PathBuf,
    path: PathBuf,
    abandoned: Arc<Mutex<bool>>,
}

impl PendingWrite {
    async fn run(self, content: Vec<u8>) -> Result<(), StorageError> {
        let written = self.write(&content).await;
        if let Err(e) = written {
            if let Err(cleanup) = remove_if_present(&self.partial).await {
                tracing::warn!(
                    "Failed to remove partial blob {}: {}",
                    self.partial.display(),
                    cleanup
                );
            }
            if e.kind() == ErrorKind::Interrupted {
                tracing::debug!("Discarded abandoned upload {}", self.partial.display());
            }
            return Err(StorageError::IoError(e));
        }
        Ok(())
    }

    async fn write(&self, content: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(&self.partial).await?;
        for chunk in content.chunks(WRITE_CHUNK_BYTES) {
            self.ensure_wanted()?;
            file.write_all(chunk).await?;
        }
        file.sync_all().await?;
        drop(file);
        self.commit()
    }

    fn ensure_wanted(&self) -> std::io::Result<()> {
        if *self.abandoned.lock() {
            return Err(std::io::Error::new(
                ErrorKind::Interrupted,
                "upload abandoned by caller",
            ));
        }
        Ok(())
    }

    fn commit(&self) -> std::io::Result<()> {
        let abandoned = self.abandoned.lock();
        if *abandoned {
            return Err(std::io::Error::new(
                ErrorKind::Interrupted,
                "upload abandoned by caller",
            ));
        }
        std::fs::rename(&self.partial, &self.path)
    }
}

/// Marks the pending write abandoned when `put` returns or is dropped
struct AbandonOnDrop(Arc<Mutex<bool>>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        *self.0.lock() = true;
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &BlobKey, content: &[u8]) -> Result<String, StorageError> {
        let path = self.live_path(key);
        let write = PendingWrite {
            partial: self.partial_path(key),
            path: path.clone(),
            abandoned: Arc::new(Mutex::new(false)),
        };

        // The writer outlives a dropped `put` and cleans up after itself
        let _abandon = AbandonOnDrop(Arc::clone(&write.abandoned));
        let task = tokio::spawn(write.run(content.to_vec()));
        task.await
            .map_err(|e| StorageError::IoError(std::io::Error::new(ErrorKind::Other, e)))??;

        Ok(path.display().to_string())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.live_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.live_path(key)).await?)
    }

    async fn remove(&self, key: &BlobKey) -> Result<BlobRemoval, StorageError> {
        remove_if_present(&self.partial_path(key)).await?;
        match tokio::fs::remove_file(self.live_path(key)).await {
            Ok(()) => Ok(BlobRemoval::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BlobRemoval::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn stage(&self, batch: &BatchId, key: &BlobKey) -> Result<BlobRemoval, StorageError> {
        let source = self.live_path(key);
        if !tokio::fs::try_exists(&source).await? {
            return Ok(BlobRemoval::Missing);
        }
        tokio::fs::create_dir_all(self.batch_dir(batch)).await?;
        match tokio::fs::rename(&source, self.staged_path(batch, key)).await {
            Ok(()) => Ok(BlobRemoval::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BlobRemoval::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn restore(&self, batch: &BatchId, key: &BlobKey) -> Result<(), StorageError> {
        tokio::fs::rename(self.staged_path(batch, key), self.live_path(key)).await?;
        Ok(())
    }

    async fn purge(&self, batch: &BatchId) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(self.batch_dir(batch)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn staged_batches(&self) -> Result<Vec<StagedBatch>, StorageError> {
        let staging = self.root.join(STAGING_DIR);
        let mut batches = Vec::new();
        let mut entries = match tokio::fs::read_dir(&staging).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(batches),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let batch = match name.to_str().and_then(|s| s.parse::<BatchId>().ok()) {
                Some(batch) => batch,
                None => {
                    tracing::warn!("Ignoring unexpected staging entry {:?}", name);
                    continue;
                }
            };

            let mut keys = Vec::new();
            let mut files = tokio::fs::read_dir(entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                match file.file_name().to_str().and_then(BlobKey::parse) {
                    Some(key) => keys.push(key),
                    None => tracing::warn!(
                        "Ignoring unexpected staged file {}",
                        file.path().display()
                    ),
                }
            }
            keys.sort();
            batches.push(StagedBatch { batch, keys });
        }

        batches.sort_by_key(|b| b.batch);
        Ok(batches)
    }

    fn location(&self, key: &BlobKey) -> String {
        self.live_path(key).display().to_string()
    }
}
