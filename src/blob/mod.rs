//! Blob Store
//!
//! Binary payloads that live outside the relations: uploaded file content and
//! link preview images. A blob is addressed only by its owning node id and an
//! extension, so its location can always be derived from the node row.
//!
//! Cascade deletes do not remove blobs directly. They first move them into a
//! staging batch, which can be restored if the metadata commit fails and purged
//! once it succeeds.

pub mod fs;
pub mod memory;

use crate::error::StorageError;
use crate::store::{NodeKind, ResourceNode};
use crate::types::{BatchId, NodeId};
use async_trait::async_trait;
use std::fmt;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// The single accepted preview image format
pub const PREVIEW_IMAGE_EXTENSION: &str = "png";

/// Location of one blob: `{node_id}.{extension}`, or `{node_id}` when there is none
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    pub node_id: NodeId,
    pub extension: Option<String>,
}

impl BlobKey {
    pub fn new(node_id: NodeId, extension: Option<String>) -> Self {
        Self { node_id, extension }
    }

    pub fn preview(node_id: NodeId) -> Self {
        Self::new(node_id, Some(PREVIEW_IMAGE_EXTENSION.to_string()))
    }

    /// Blob owned by `node`, if its kind owns one
    pub fn for_node(node: &ResourceNode) -> Option<Self> {
        match &node.kind {
            NodeKind::Folder => None,
            NodeKind::File { extension } => Some(Self::new(node.id, extension.clone())),
            NodeKind::Link { .. } => Some(Self::preview(node.id)),
        }
    }

    pub fn file_name(&self) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{}", self.node_id, ext),
            None => self.node_id.to_string(),
        }
    }

    /// Inverse of `file_name`
    pub fn parse(file_name: &str) -> Option<Self> {
        let (id, extension) = match file_name.split_once('.') {
            Some((id, ext)) if !ext.is_empty() => (id, Some(ext.to_string())),
            Some(_) => return None,
            None => (file_name, None),
        };
        let node_id = id.parse().ok()?;
        Some(Self { node_id, extension })
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Outcome of removing or staging a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobRemoval {
    Removed,
    /// Nothing was stored under the key
    Missing,
}

/// Blobs moved aside by one cascade delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBatch {
    pub batch: BatchId,
    pub keys: Vec<BlobKey>,
}

/// Storage for blob payloads
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write (or overwrite) a blob. Returns its storage location.
    async fn put(&self, key: &BlobKey, content: &[u8]) -> Result<String, StorageError>;

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StorageError>;

    async fn exists(&self, key: &BlobKey) -> Result<bool, StorageError>;

    async fn remove(&self, key: &BlobKey) -> Result<BlobRemoval, StorageError>;

    /// Move a blob into the staging area of `batch`.
    async fn stage(&self, batch: &BatchId, key: &BlobKey) -> Result<BlobRemoval, StorageError>;

    /// Move a staged blob back to its live location.
    async fn restore(&self, batch: &BatchId, key: &BlobKey) -> Result<(), StorageError>;

    /// Permanently drop a staging batch.
    async fn purge(&self, batch: &BatchId) -> Result<(), StorageError>;

    /// Batches left behind by deletes that never finished.
    async fn staged_batches(&self) -> Result<Vec<StagedBatch>, StorageError>;

    /// Where the blob for `key` lives, for callers that serve it
    fn location(&self, key: &BlobKey) -> String;
}
