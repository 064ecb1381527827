//! In-memory ResourceStore.
//!
//! Write transactions run against a private copy of the state which replaces
//! the shared state only when the closure succeeds.

use super::{
    read_only_violation, CatalogSnapshot, CatalogTxn, RelationCounts, ResourceLink, ResourceNode,
    ResourceStore,
};
use crate::error::ApiError;
use crate::types::{LinkId, NodeId};
use parking_lot::Mutex;
use std::cell::RefCell;

#[derive(Debug, Clone, Default)]
struct CatalogState {
    snapshot: CatalogSnapshot,
}

enum MemoryTxn<'a> {
    Read(&'a CatalogState),
    Write(RefCell<CatalogState>),
}

impl MemoryTxn<'_> {
    fn with<T>(&self, f: impl FnOnce(&CatalogSnapshot) -> T) -> T {
        match self {
            MemoryTxn::Read(state) => f(&state.snapshot),
            MemoryTxn::Write(cell) => f(&cell.borrow().snapshot),
        }
    }

    fn with_mut(&self, f: impl FnOnce(&mut CatalogSnapshot)) -> Result<(), ApiError> {
        match self {
            MemoryTxn::Read(_) => Err(read_only_violation()),
            MemoryTxn::Write(cell) => {
                f(&mut cell.borrow_mut().snapshot);
                Ok(())
            }
        }
    }
}

impl CatalogTxn for MemoryTxn<'_> {
    fn get_node(&self, id: &NodeId) -> Result<Option<ResourceNode>, ApiError> {
        Ok(self.with(|s| s.nodes.get(id).cloned()))
    }

    fn put_node(&self, node: &ResourceNode) -> Result<(), ApiError> {
        self.with_mut(|s| {
            s.nodes.insert(node.id, node.clone());
        })
    }

    fn delete_node(&self, id: &NodeId) -> Result<(), ApiError> {
        self.with_mut(|s| {
            s.nodes.remove(id);
        })
    }

    fn get_link(&self, id: &LinkId) -> Result<Option<ResourceLink>, ApiError> {
        Ok(self.with(|s| s.links.get(id).copied()))
    }

    fn put_link(&self, link: &ResourceLink) -> Result<(), ApiError> {
        self.with_mut(|s| {
            s.links.insert(link.id, *link);
        })
    }

    fn delete_link(&self, id: &LinkId) -> Result<(), ApiError> {
        self.with_mut(|s| {
            s.links.remove(id);
        })
    }

    fn get_children(&self, parent: &NodeId) -> Result<Vec<LinkId>, ApiError> {
        Ok(self.with(|s| s.children.get(parent).cloned().unwrap_or_default()))
    }

    fn put_children(&self, parent: &NodeId, links: &[LinkId]) -> Result<(), ApiError> {
        self.with_mut(|s| {
            if links.is_empty() {
                s.children.remove(parent);
            } else {
                s.children.insert(*parent, links.to_vec());
            }
        })
    }

    fn get_parent(&self, child: &NodeId) -> Result<Option<LinkId>, ApiError> {
        Ok(self.with(|s| s.parents.get(child).copied()))
    }

    fn put_parent(&self, child: &NodeId, link: &LinkId) -> Result<(), ApiError> {
        self.with_mut(|s| {
            s.parents.insert(*child, *link);
        })
    }

    fn delete_parent(&self, child: &NodeId) -> Result<(), ApiError> {
        self.with_mut(|s| {
            s.parents.remove(child);
        })
    }

    fn root_id(&self) -> Result<Option<NodeId>, ApiError> {
        Ok(self.with(|s| s.root))
    }

    fn set_root_id(&self, id: &NodeId) -> Result<(), ApiError> {
        self.with_mut(|s| s.root = Some(*id))
    }
}

/// In-memory store, used by tests and throwaway catalogs
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    state: Mutex<CatalogState>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceStore for MemoryResourceStore {
    fn read<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: Fn(&dyn CatalogTxn) -> Result<T, ApiError>,
    {
        let state = self.state.lock();
        let txn = MemoryTxn::Read(&*state);
        f(&txn)
    }

    fn write<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: Fn(&dyn CatalogTxn) -> Result<T, ApiError>,
    {
        let mut state = self.state.lock();
        let txn = MemoryTxn::Write(RefCell::new(state.clone()));
        let value = f(&txn)?;
        if let MemoryTxn::Write(cell) = txn {
            *state = cell.into_inner();
        }
        Ok(value)
    }

    fn find_by_title(&self, title: &str) -> Result<Vec<ResourceNode>, ApiError> {
        let state = self.state.lock();
        Ok(state
            .snapshot
            .nodes
            .values()
            .filter(|n| n.title == title)
            .cloned()
            .collect())
    }

    fn counts(&self) -> Result<RelationCounts, ApiError> {
        let state = self.state.lock();
        Ok(RelationCounts {
            nodes: state.snapshot.nodes.len(),
            links: state.snapshot.links.len(),
        })
    }

    fn scan(&self) -> Result<CatalogSnapshot, ApiError> {
        Ok(self.state.lock().snapshot.clone())
    }

    fn reset(&self) -> Result<(), ApiError> {
        *self.state.lock() = CatalogState::default();
        Ok(())
    }
}
