//! Page Views
//!
//! Turns a resolved node and its children into a paginated view model: folders
//! first, original order kept within each group, then cut into fixed-size
//! chunks. Nothing here touches storage.

use crate::blob::BlobKey;
use crate::error::ApiError;
use crate::store::{ResourceNode, ResourceType};
use crate::types::NodeId;
use serde::Serialize;

/// One child as shown in a folder view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildEntry {
    pub id: NodeId,
    pub title: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Blob file name: the upload for files, the preview image for links
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl From<&ResourceNode> for ChildEntry {
    fn from(node: &ResourceNode) -> Self {
        Self {
            id: node.id,
            title: node.title.clone(),
            resource_type: node.resource_type(),
            href: node.href().map(str::to_string),
            blob: BlobKey::for_node(node).map(|key| key.file_name()),
        }
    }
}

/// A folder view ready for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageView {
    pub id: NodeId,
    pub title: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    pub is_root: bool,
    /// Parent of the listed node; `None` for the root
    pub parent_id: Option<NodeId>,
    pub chunks: Vec<Vec<ChildEntry>>,
}

impl PageView {
    pub fn child_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// All children in display order
    pub fn children(&self) -> impl Iterator<Item = &ChildEntry> {
        self.chunks.iter().flatten()
    }
}

/// Position of a type in a listing; lower sorts first
fn listing_rank(resource_type: ResourceType) -> u8 {
    match resource_type {
        ResourceType::Folder => 0,
        ResourceType::File | ResourceType::Link => 1,
    }
}

/// Stable folders-first ordering
pub fn sort_for_listing(children: &mut [ResourceNode]) {
    children.sort_by_key(|node| listing_rank(node.resource_type()));
}

/// Split `items` into runs of `size`; the last run may be shorter
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

/// Builds `PageView`s with a fixed chunk size
#[derive(Debug, Clone, Copy)]
pub struct PageAssembler {
    page_size: usize,
}

impl PageAssembler {
    pub fn new(page_size: usize) -> Result<Self, ApiError> {
        if page_size == 0 {
            return Err(ApiError::ConfigError(
                "page size must be greater than 0".to_string(),
            ));
        }
        Ok(Self { page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn assemble(
        &self,
        node: &ResourceNode,
        mut children: Vec<ResourceNode>,
        parent_id: Option<NodeId>,
        is_root: bool,
    ) -> PageView {
        sort_for_listing(&mut children);
        let entries: Vec<ChildEntry> = children.iter().map(ChildEntry::from).collect();
        PageView {
            id: node.id,
            title: node.title.clone(),
            resource_type: node.resource_type(),
            href: node.href().map(str::to_string),
            is_root,
            parent_id,
            chunks: chunk(&entries, self.page_size),
        }
    }
}
