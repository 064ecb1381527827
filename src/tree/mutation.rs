//! Inserts and in-place edits

use super::naming::{check_preview_extension, split_filename, validate_title};
use super::{require_folder, TreeService};
use crate::blob::{BlobKey, BlobStore};
use crate::error::ApiError;
use crate::store::{NodeKind, ResourceLink, ResourceNode, ResourceStore};
use crate::types::NodeId;
use futures::future::join_all;
use tracing::{error, info, warn};

/// One file of a batch upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub filename: String,
    pub content: Vec<u8>,
}

impl UploadItem {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

impl<S: ResourceStore, B: BlobStore> TreeService<S, B> {
    /// Create a folder under `parent_id`
    pub async fn add_folder(&self, parent_id: &NodeId, title: &str) -> Result<NodeId, ApiError> {
        let title = validate_title(title)?;
        let _guard = self.locks.read(parent_id).await?;

        let node = ResourceNode::folder(title);
        self.insert_child(parent_id, &node)?;
        info!(parent = %parent_id, node = %node.id, title = %node.title, "Added folder");
        Ok(node.id)
    }

    /// Create a link under `parent_id`. No preview blob is written.
    pub async fn add_link(
        &self,
        parent_id: &NodeId,
        title: &str,
        href: &str,
    ) -> Result<ResourceNode, ApiError> {
        let title = validate_title(title)?;
        let href = href.trim();
        if href.is_empty() {
            return Err(ApiError::InvalidInput("href must not be empty".to_string()));
        }
        let _guard = self.locks.read(parent_id).await?;

        let node = ResourceNode::link(title, href);
        self.insert_child(parent_id, &node)?;
        info!(parent = %parent_id, node = %node.id, href = %href, "Added link");
        Ok(node)
    }

    /// Store an uploaded file and create its node under `parent_id`.
    ///
    /// The blob is written first and removed again if the metadata commit fails.
    pub async fn add_file(
        &self,
        parent_id: &NodeId,
        filename: &str,
        content: &[u8],
    ) -> Result<NodeId, ApiError> {
        let (title, extension) = split_filename(filename)?;
        if content.is_empty() {
            return Err(ApiError::InvalidInput(format!(
                "upload {:?} is empty",
                filename
            )));
        }
        let _guard = self.locks.read(parent_id).await?;

        // Fail before any blob exists
        self.store.read(|txn| require_folder(txn, parent_id))?;

        let node = ResourceNode::file(title, extension.clone());
        let key = BlobKey::new(node.id, extension);

        if let Err(err) = self.blob_op("write upload", self.blobs.put(&key, content)).await {
            // Removes a finished blob and any partial file left by the write
            if let Err(cleanup) = self.blob_op("remove partial upload", self.blobs.remove(&key)).await {
                warn!(blob = %key, error = %cleanup, "Could not remove partial upload");
            }
            return Err(err);
        }

        if let Err(err) = self.insert_child(parent_id, &node) {
            return match self.blob_op("remove orphaned upload", self.blobs.remove(&key)).await {
                Ok(_) => Err(err),
                Err(cleanup) => {
                    error!(blob = %key, error = %cleanup, cause = %err, "Upload left an orphaned blob");
                    Err(ApiError::Unrecoverable(format!(
                        "metadata insert failed ({}) and blob {} could not be removed ({})",
                        err, key, cleanup
                    )))
                }
            };
        }

        info!(parent = %parent_id, node = %node.id, blob = %key, bytes = content.len(), "Added file");
        Ok(node.id)
    }

    /// Upload every item independently; one result per item, in input order.
    pub async fn add_files(
        &self,
        parent_id: &NodeId,
        items: &[UploadItem],
    ) -> Vec<Result<NodeId, ApiError>> {
        let uploads = items
            .iter()
            .map(|item| self.add_file(parent_id, &item.filename, &item.content));
        let results = join_all(uploads).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(parent = %parent_id, total = items.len(), failed, "Batch upload partially failed");
        }
        results
    }

    /// Replace the preview image of a link. Returns the blob location.
    pub async fn change_link_image(
        &self,
        link_id: &NodeId,
        content: &[u8],
        extension: &str,
    ) -> Result<String, ApiError> {
        let _guard = self.locks.write(link_id).await?;

        let node = self.get_node(link_id)?;
        if !matches!(node.kind, NodeKind::Link { .. }) {
            return Err(ApiError::InvalidInput(format!(
                "{} is a {}, only links carry preview images",
                link_id,
                node.resource_type()
            )));
        }
        check_preview_extension(extension)?;
        if content.is_empty() {
            return Err(ApiError::InvalidPayload("preview image is empty".to_string()));
        }

        let key = BlobKey::preview(node.id);
        let location = self
            .blob_op("write preview image", self.blobs.put(&key, content))
            .await?;
        info!(node = %link_id, blob = %key, bytes = content.len(), "Changed link image");
        Ok(location)
    }

    /// Change a node's title in place
    pub async fn rename_object(&self, node_id: &NodeId, title: &str) -> Result<ResourceNode, ApiError> {
        let _guard = self.locks.write(node_id).await?;

        let renamed = self.store.write(|txn| {
            let mut node = txn
                .get_node(node_id)?
                .ok_or_else(|| ApiError::node_not_found(node_id))?;
            node.title = validate_title(title)?;
            txn.put_node(&node)?;
            Ok(node)
        })?;
        info!(node = %node_id, title = %renamed.title, "Renamed node");
        Ok(renamed)
    }

    /// Insert `node` and its link from `parent_id` in one transaction
    fn insert_child(&self, parent_id: &NodeId, node: &ResourceNode) -> Result<(), ApiError> {
        self.store.write(|txn| {
            require_folder(txn, parent_id)?;
            txn.put_node(node)?;
            txn.attach(&ResourceLink::new(*parent_id, node.id))
        })
    }
}
