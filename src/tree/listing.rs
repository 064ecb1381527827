//! Folder listing

use super::TreeService;
use crate::blob::BlobStore;
use crate::error::ApiError;
use crate::store::{CatalogTxn, ResourceNode, ResourceStore};
use crate::types::NodeId;
use crate::views::PageView;
use tracing::debug;

impl<S: ResourceStore, B: BlobStore> TreeService<S, B> {
    /// List a node and its children, chunked for display.
    ///
    /// `None` lists the root. The node, its children and its parent are all read
    /// from one snapshot.
    pub fn get_page(&self, node_id: Option<NodeId>) -> Result<PageView, ApiError> {
        let target = match node_id {
            Some(id) => id,
            None => self.root_id()?,
        };

        let view = self.store.read(|txn| {
            let node = txn
                .get_node(&target)?
                .ok_or_else(|| ApiError::node_not_found(&target))?;
            let children = txn.child_nodes(&target)?;
            if !node.is_folder() && !children.is_empty() {
                return Err(ApiError::CorruptState(format!(
                    "{} {} has {} children",
                    node.resource_type(),
                    node.id,
                    children.len()
                )));
            }

            let parent_id = match txn.get_parent(&target)? {
                Some(link_id) => {
                    let link = txn.get_link(&link_id)?.ok_or_else(|| {
                        ApiError::CorruptState(format!(
                            "parent index of {} references missing link {}",
                            target, link_id
                        ))
                    })?;
                    Some(link.parent_id)
                }
                None => None,
            };
            let is_root = self.is_root_in(txn, &node, parent_id)?;

            Ok(self.assembler.assemble(&node, children, parent_id, is_root))
        })?;

        debug!(node = %view.id, children = view.child_count(), chunks = view.chunks.len(), "Listed page");
        Ok(view)
    }

    fn is_root_in(
        &self,
        txn: &dyn CatalogTxn,
        node: &ResourceNode,
        parent_id: Option<NodeId>,
    ) -> Result<bool, ApiError> {
        Ok(match txn.root_id()? {
            Some(root) => root == node.id,
            None => {
                parent_id.is_none() && node.is_folder() && node.title == self.settings.root_title
            }
        })
    }
}
