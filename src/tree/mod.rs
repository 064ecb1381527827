//! Tree Service
//!
//! Business logic over the catalog: listing, inserts, renames, link previews
//! and cascade deletion. Every operation receives its persistence handle and
//! blob store through the service value; there is no ambient connection.
//!
//! Reads run in one store snapshot. Writes run in one store transaction, and
//! blob side effects are ordered so that a failure can always be compensated.

pub mod delete;
pub mod integrity;
pub mod listing;
pub mod mutation;
pub mod naming;

pub use delete::{RecoveryReport, SubtreePlan};
pub use integrity::{IntegrityReport, Violation};
pub use mutation::UploadItem;

use crate::blob::BlobStore;
use crate::concurrency::NodeLockManager;
use crate::config::CatalogSettings;
use crate::error::{ApiError, StorageError};
use crate::store::{CatalogTxn, ResourceNode, ResourceStore};
use crate::types::NodeId;
use crate::views::PageAssembler;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Catalog operations over a resource store and a blob store
pub struct TreeService<S, B> {
    store: Arc<S>,
    blobs: Arc<B>,
    locks: NodeLockManager,
    assembler: PageAssembler,
    settings: CatalogSettings,
}

impl<S: ResourceStore, B: BlobStore> TreeService<S, B> {
    pub fn new(store: Arc<S>, blobs: Arc<B>, settings: CatalogSettings) -> Result<Self, ApiError> {
        settings.validate()?;
        Ok(Self {
            assembler: PageAssembler::new(settings.page_size)?,
            locks: NodeLockManager::new(settings.lock_timeout()),
            store,
            blobs,
            settings,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    /// (Re)create the catalog: drop every row and seed the root folder.
    ///
    /// Destructive. Live blobs are left in place; staged ones are purged.
    pub async fn initialize_catalog(&self) -> Result<NodeId, ApiError> {
        for batch in self.blob_op("list staged blobs", self.blobs.staged_batches()).await? {
            self.blob_op("purge staged blobs", self.blobs.purge(&batch.batch))
                .await?;
        }

        self.store.reset()?;
        let root = ResourceNode::folder(self.settings.root_title.clone());
        self.store.write(|txn| {
            txn.put_node(&root)?;
            txn.set_root_id(&root.id)
        })?;
        self.store.flush()?;

        info!(root = %root.id, title = %root.title, "Initialized catalog");
        Ok(root.id)
    }

    /// Id of the root folder.
    ///
    /// Uses the stored root flag; catalogs without one fall back to the single
    /// parentless folder carrying the configured root title.
    pub fn root_id(&self) -> Result<NodeId, ApiError> {
        if let Some(id) = self.store.read(|txn| txn.root_id())? {
            return Ok(id);
        }

        let titled = self.store.find_by_title(&self.settings.root_title)?;
        let candidates: Vec<NodeId> = self.store.read(|txn| {
            let mut ids = Vec::new();
            for node in titled.iter().filter(|n| n.is_folder()) {
                if txn.get_parent(&node.id)?.is_none() {
                    ids.push(node.id);
                }
            }
            Ok(ids)
        })?;

        match candidates.as_slice() {
            [] => Err(ApiError::NotFound(format!(
                "root folder {:?} (catalog not initialized?)",
                self.settings.root_title
            ))),
            [id] => Ok(*id),
            _ => Err(ApiError::CorruptState(format!(
                "{} parentless folders are titled {:?}",
                candidates.len(),
                self.settings.root_title
            ))),
        }
    }

    /// Point lookup of a single node
    pub fn get_node(&self, id: &NodeId) -> Result<ResourceNode, ApiError> {
        self.store
            .read(|txn| txn.get_node(id))?
            .ok_or_else(|| ApiError::node_not_found(id))
    }

    /// Run a blob operation under the configured timeout
    async fn blob_op<T, F>(&self, operation: &str, fut: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.settings.blob_timeout(), fut).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(_) => Err(StorageError::Timeout {
                operation: operation.to_string(),
                millis: self.settings.blob_timeout_ms,
            }
            .into()),
        }
    }
}

/// Look up `id` and require it to be a folder that can take children
pub(crate) fn require_folder(txn: &dyn CatalogTxn, id: &NodeId) -> Result<ResourceNode, ApiError> {
    let node = txn.get_node(id)?.ok_or_else(|| ApiError::node_not_found(id))?;
    if !node.is_folder() {
        return Err(ApiError::InvalidInput(format!(
            "{} is a {}, only folders can contain children",
            id,
            node.resource_type()
        )));
    }
    Ok(node)
}
