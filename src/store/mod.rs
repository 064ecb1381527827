//! Resource Store
//!
//! Persistence for the two catalog relations: nodes and parent→child links.
//! Containment is never embedded in a node; it lives only in link rows plus two
//! indexes (ordered children per parent, single parent per child).
//!
//! All access goes through a `CatalogTxn` handed out by `ResourceStore::read`
//! or `ResourceStore::write`, so that multi-row reads see one snapshot and
//! multi-row writes are all-or-nothing.

pub mod memory;
pub mod persistence;

use crate::error::ApiError;
use crate::types::{LinkId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

pub use memory::MemoryResourceStore;
pub use persistence::SledResourceStore;

/// Payload-free discriminant of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Folder,
    File,
    Link,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Folder => "folder",
            ResourceType::File => "file",
            ResourceType::Link => "link",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node kind with the data each kind owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Folder,
    /// Uploaded file; `extension` is the original one, used for the blob path
    File { extension: Option<String> },
    /// External bookmark; may own a preview image blob
    Link { href: String },
}

/// ResourceNode: one catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: NodeId,
    pub title: String,
    pub kind: NodeKind,
}

impl ResourceNode {
    pub fn folder(title: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            title: title.into(),
            kind: NodeKind::Folder,
        }
    }

    pub fn file(title: impl Into<String>, extension: Option<String>) -> Self {
        Self {
            id: NodeId::new(),
            title: title.into(),
            kind: NodeKind::File { extension },
        }
    }

    pub fn link(title: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            title: title.into(),
            kind: NodeKind::Link { href: href.into() },
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self.kind {
            NodeKind::Folder => ResourceType::Folder,
            NodeKind::File { .. } => ResourceType::File,
            NodeKind::Link { .. } => ResourceType::Link,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }

    pub fn href(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Link { href } => Some(href),
            NodeKind::Folder | NodeKind::File { .. } => None,
        }
    }
}

/// ResourceLink: containment edge `parent_id -> child_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLink {
    pub id: LinkId,
    pub parent_id: NodeId,
    pub child_id: NodeId,
}

impl ResourceLink {
    pub fn new(parent_id: NodeId, child_id: NodeId) -> Self {
        Self {
            id: LinkId::new(),
            parent_id,
            child_id,
        }
    }
}

/// Row counts per relation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelationCounts {
    pub nodes: usize,
    pub links: usize,
}

/// Full copy of every relation, used for offline integrity checks
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub root: Option<NodeId>,
    pub nodes: HashMap<NodeId, ResourceNode>,
    pub links: HashMap<LinkId, ResourceLink>,
    pub children: HashMap<NodeId, Vec<LinkId>>,
    pub parents: HashMap<NodeId, LinkId>,
}

/// Row-level access inside one transaction.
///
/// Backends implement the primitives; the provided methods keep the link row
/// and both indexes in step and are what the tree service calls.
pub trait CatalogTxn {
    fn get_node(&self, id: &NodeId) -> Result<Option<ResourceNode>, ApiError>;
    fn put_node(&self, node: &ResourceNode) -> Result<(), ApiError>;
    fn delete_node(&self, id: &NodeId) -> Result<(), ApiError>;

    fn get_link(&self, id: &LinkId) -> Result<Option<ResourceLink>, ApiError>;
    fn put_link(&self, link: &ResourceLink) -> Result<(), ApiError>;
    fn delete_link(&self, id: &LinkId) -> Result<(), ApiError>;

    /// Outgoing link ids of `parent`, in insertion order
    fn get_children(&self, parent: &NodeId) -> Result<Vec<LinkId>, ApiError>;
    /// Replaces the child list; an empty list removes the entry
    fn put_children(&self, parent: &NodeId, links: &[LinkId]) -> Result<(), ApiError>;

    fn get_parent(&self, child: &NodeId) -> Result<Option<LinkId>, ApiError>;
    fn put_parent(&self, child: &NodeId, link: &LinkId) -> Result<(), ApiError>;
    fn delete_parent(&self, child: &NodeId) -> Result<(), ApiError>;

    fn root_id(&self) -> Result<Option<NodeId>, ApiError>;
    fn set_root_id(&self, id: &NodeId) -> Result<(), ApiError>;

    /// Insert a link and index it. Fails if the child already has a parent.
    fn attach(&self, link: &ResourceLink) -> Result<(), ApiError> {
        if let Some(existing) = self.get_parent(&link.child_id)? {
            return Err(ApiError::CorruptState(format!(
                "node {} is already attached by link {}",
                link.child_id, existing
            )));
        }
        let mut siblings = self.get_children(&link.parent_id)?;
        siblings.push(link.id);
        self.put_link(link)?;
        self.put_children(&link.parent_id, &siblings)?;
        self.put_parent(&link.child_id, &link.id)
    }

    /// Remove a link row and drop it from both indexes.
    fn detach(&self, id: &LinkId) -> Result<Option<ResourceLink>, ApiError> {
        let link = match self.get_link(id)? {
            Some(link) => link,
            None => return Ok(None),
        };
        let mut siblings = self.get_children(&link.parent_id)?;
        siblings.retain(|l| l != id);
        self.put_children(&link.parent_id, &siblings)?;
        if self.get_parent(&link.child_id)? == Some(*id) {
            self.delete_parent(&link.child_id)?;
        }
        self.delete_link(id)?;
        Ok(Some(link))
    }

    /// Resolve the outgoing link rows of `parent`; a missing row is corruption.
    fn child_links(&self, parent: &NodeId) -> Result<Vec<ResourceLink>, ApiError> {
        let ids = self.get_children(parent)?;
        let mut links = Vec::with_capacity(ids.len());
        for id in ids {
            let link = self.get_link(&id)?.ok_or_else(|| {
                ApiError::CorruptState(format!(
                    "child index of {} references missing link {}",
                    parent, id
                ))
            })?;
            if link.parent_id != *parent {
                return Err(ApiError::CorruptState(format!(
                    "link {} is indexed under {} but points from {}",
                    id, parent, link.parent_id
                )));
            }
            links.push(link);
        }
        Ok(links)
    }

    /// Resolve the direct children of `parent` in insertion order.
    fn child_nodes(&self, parent: &NodeId) -> Result<Vec<ResourceNode>, ApiError> {
        let links = self.child_links(parent)?;
        let mut nodes = Vec::with_capacity(links.len());
        for link in links {
            let node = self.get_node(&link.child_id)?.ok_or_else(|| {
                ApiError::CorruptState(format!(
                    "link {} references missing child {}",
                    link.id, link.child_id
                ))
            })?;
            nodes.push(node);
        }
        Ok(nodes)
    }
}

/// Persistence handle shared by every tree operation
pub trait ResourceStore: Send + Sync {
    /// Run `f` against a consistent snapshot. Writes inside `f` are rejected.
    fn read<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: Fn(&dyn CatalogTxn) -> Result<T, ApiError>;

    /// Run `f` as one atomic unit; nothing is applied unless `f` returns `Ok`.
    /// `f` may be invoked more than once if the backend retries on conflict.
    fn write<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: Fn(&dyn CatalogTxn) -> Result<T, ApiError>;

    /// Every node with the given title, unordered.
    fn find_by_title(&self, title: &str) -> Result<Vec<ResourceNode>, ApiError>;

    fn counts(&self) -> Result<RelationCounts, ApiError>;

    /// Copy of all relations. Not transactional across relations.
    fn scan(&self) -> Result<CatalogSnapshot, ApiError>;

    /// Every link row whose child is in `children`, whether indexed or not.
    fn links_into(&self, children: &HashSet<NodeId>) -> Result<Vec<ResourceLink>, ApiError> {
        Ok(self
            .scan()?
            .links
            .into_values()
            .filter(|link| children.contains(&link.child_id))
            .collect())
    }

    /// Drop every row of every relation.
    fn reset(&self) -> Result<(), ApiError>;

    fn flush(&self) -> Result<(), ApiError> {
        Ok(())
    }
}

pub(crate) fn read_only_violation() -> ApiError {
    ApiError::StorageFailure(crate::error::StorageError::Transaction(
        "write attempted inside a read transaction".to_string(),
    ))
}
