//! Sled-backed ResourceStore.
//!
//! One sled tree per relation. Keys are the 16 raw uuid bytes, values are
//! bincode rows. Every `read`/`write` is a sled multi-tree transaction, so a
//! listing never mixes two points in time and a mutation is all-or-nothing.

use super::{
    read_only_violation, CatalogSnapshot, CatalogTxn, RelationCounts, ResourceLink, ResourceNode,
    ResourceStore,
};
use crate::error::{ApiError, StorageError};
use crate::types::{LinkId, NodeId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree, UnabortableTransactionError,
};
use sled::{Db, Transactional, Tree};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;

const NODES_TREE: &str = "nodes";
const LINKS_TREE: &str = "links";
const CHILDREN_TREE: &str = "children";
const PARENTS_TREE: &str = "parents";
const META_TREE: &str = "meta";

const ROOT_KEY: &[u8] = b"root";

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ApiError> {
    bincode::serialize(value).map_err(|e| ApiError::StorageFailure(StorageError::Codec(e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    bincode::deserialize(bytes).map_err(|e| ApiError::StorageFailure(StorageError::Codec(e)))
}

struct SledTxn<'a> {
    nodes: &'a TransactionalTree,
    links: &'a TransactionalTree,
    children: &'a TransactionalTree,
    parents: &'a TransactionalTree,
    meta: &'a TransactionalTree,
    read_only: bool,
    /// Conflict or storage fault raised by sled; must reach sled so it can retry
    fault: RefCell<Option<UnabortableTransactionError>>,
}

impl<'a> SledTxn<'a> {
    fn guard<T>(&self, result: Result<T, UnabortableTransactionError>) -> Result<T, ApiError> {
        result.map_err(|e| {
            let err = ApiError::StorageFailure(StorageError::Transaction(e.to_string()));
            *self.fault.borrow_mut() = Some(e);
            err
        })
    }

    fn writable(&self) -> Result<(), ApiError> {
        if self.read_only {
            Err(read_only_violation())
        } else {
            Ok(())
        }
    }

    fn get<T: DeserializeOwned>(
        &self,
        tree: &TransactionalTree,
        key: &[u8],
    ) -> Result<Option<T>, ApiError> {
        match self.guard(tree.get(key))? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(
        &self,
        tree: &TransactionalTree,
        key: &[u8],
        value: &T,
    ) -> Result<(), ApiError> {
        self.writable()?;
        let bytes = encode(value)?;
        self.guard(tree.insert(key, bytes)).map(|_| ())
    }

    fn remove(&self, tree: &TransactionalTree, key: &[u8]) -> Result<(), ApiError> {
        self.writable()?;
        self.guard(tree.remove(key)).map(|_| ())
    }
}

impl CatalogTxn for SledTxn<'_> {
    fn get_node(&self, id: &NodeId) -> Result<Option<ResourceNode>, ApiError> {
        self.get(self.nodes, id.as_bytes())
    }

    fn put_node(&self, node: &ResourceNode) -> Result<(), ApiError> {
        self.put(self.nodes, node.id.as_bytes(), node)
    }

    fn delete_node(&self, id: &NodeId) -> Result<(), ApiError> {
        self.remove(self.nodes, id.as_bytes())
    }

    fn get_link(&self, id: &LinkId) -> Result<Option<ResourceLink>, ApiError> {
        self.get(self.links, id.as_bytes())
    }

    fn put_link(&self, link: &ResourceLink) -> Result<(), ApiError> {
        self.put(self.links, link.id.as_bytes(), link)
    }

    fn delete_link(&self, id: &LinkId) -> Result<(), ApiError> {
        self.remove(self.links, id.as_bytes())
    }

    fn get_children(&self, parent: &NodeId) -> Result<Vec<LinkId>, ApiError> {
        Ok(self
            .get::<Vec<LinkId>>(self.children, parent.as_bytes())?
            .unwrap_or_default())
    }

    fn put_children(&self, parent: &NodeId, links: &[LinkId]) -> Result<(), ApiError> {
        if links.is_empty() {
            self.remove(self.children, parent.as_bytes())
        } else {
            self.put(self.children, parent.as_bytes(), &links.to_vec())
        }
    }

    fn get_parent(&self, child: &NodeId) -> Result<Option<LinkId>, ApiError> {
        self.get(self.parents, child.as_bytes())
    }

    fn put_parent(&self, child: &NodeId, link: &LinkId) -> Result<(), ApiError> {
        self.put(self.parents, child.as_bytes(), link)
    }

    fn delete_parent(&self, child: &NodeId) -> Result<(), ApiError> {
        self.remove(self.parents, child.as_bytes())
    }

    fn root_id(&self) -> Result<Option<NodeId>, ApiError> {
        self.get(self.meta, ROOT_KEY)
    }

    fn set_root_id(&self, id: &NodeId) -> Result<(), ApiError> {
        self.put(self.meta, ROOT_KEY, id)
    }
}

/// Sled-based implementation of ResourceStore
pub struct SledResourceStore {
    db: Db,
    nodes: Tree,
    links: Tree,
    children: Tree,
    parents: Tree,
    meta: Tree,
}

impl SledResourceStore {
    /// Open or create a store at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open a store backed by a temporary sled database
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<Self, StorageError> {
        Ok(Self {
            nodes: db.open_tree(NODES_TREE)?,
            links: db.open_tree(LINKS_TREE)?,
            children: db.open_tree(CHILDREN_TREE)?,
            parents: db.open_tree(PARENTS_TREE)?,
            meta: db.open_tree(META_TREE)?,
            db,
        })
    }

    fn run<T, F>(&self, read_only: bool, f: F) -> Result<T, ApiError>
    where
        F: Fn(&dyn CatalogTxn) -> Result<T, ApiError>,
    {
        let result = (
            &self.nodes,
            &self.links,
            &self.children,
            &self.parents,
            &self.meta,
        )
            .transaction(|(nodes, links, children, parents, meta)| {
                let txn = SledTxn {
                    nodes,
                    links,
                    children,
                    parents,
                    meta,
                    read_only,
                    fault: RefCell::new(None),
                };
                match f(&txn) {
                    Ok(value) => Ok(value),
                    Err(err) => match txn.fault.into_inner() {
                        Some(fault) => Err(fault.into()),
                        None => Err(ConflictableTransactionError::Abort(err)),
                    },
                }
            });

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(StorageError::Sled(err).into()),
        }
    }

    fn scan_tree<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<(sled::IVec, T)>, ApiError> {
        let mut rows = Vec::new();
        for entry in tree.iter() {
            let (key, value) = entry.map_err(StorageError::Sled)?;
            rows.push((key, decode(&value)?));
        }
        Ok(rows)
    }

    fn node_key(key: &[u8]) -> Result<NodeId, ApiError> {
        NodeId::from_slice(key).ok_or_else(|| {
            ApiError::CorruptState(format!("malformed node key of {} bytes", key.len()))
        })
    }
}

impl ResourceStore for SledResourceStore {
    fn read<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: Fn(&dyn CatalogTxn) -> Result<T, ApiError>,
    {
        self.run(true, f)
    }

    fn write<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: Fn(&dyn CatalogTxn) -> Result<T, ApiError>,
    {
        self.run(false, f)
    }

    fn find_by_title(&self, title: &str) -> Result<Vec<ResourceNode>, ApiError> {
        Ok(Self::scan_tree::<ResourceNode>(&self.nodes)?
            .into_iter()
            .map(|(_, node)| node)
            .filter(|node| node.title == title)
            .collect())
    }

    fn counts(&self) -> Result<RelationCounts, ApiError> {
        Ok(RelationCounts {
            nodes: self.nodes.len(),
            links: self.links.len(),
        })
    }

    fn links_into(&self, children: &HashSet<NodeId>) -> Result<Vec<ResourceLink>, ApiError> {
        Ok(Self::scan_tree::<ResourceLink>(&self.links)?
            .into_iter()
            .map(|(_, link)| link)
            .filter(|link| children.contains(&link.child_id))
            .collect())
    }

    fn scan(&self) -> Result<CatalogSnapshot, ApiError> {
        let mut snapshot = CatalogSnapshot::default();
        for (_, node) in Self::scan_tree::<ResourceNode>(&self.nodes)? {
            snapshot.nodes.insert(node.id, node);
        }
        for (_, link) in Self::scan_tree::<ResourceLink>(&self.links)? {
            snapshot.links.insert(link.id, link);
        }
        for (key, links) in Self::scan_tree::<Vec<LinkId>>(&self.children)? {
            snapshot.children.insert(Self::node_key(&key)?, links);
        }
        for (key, link) in Self::scan_tree::<LinkId>(&self.parents)? {
            snapshot.parents.insert(Self::node_key(&key)?, link);
        }
        snapshot.root = match self.meta.get(ROOT_KEY).map_err(StorageError::Sled)? {
            Some(bytes) => Some(decode(&bytes)?),
            None => None,
        };
        Ok(snapshot)
    }

    fn reset(&self) -> Result<(), ApiError> {
        for tree in [
            &self.nodes,
            &self.links,
            &self.children,
            &self.parents,
            &self.meta,
        ] {
            tree.clear().map_err(StorageError::Sled)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), ApiError> {
        self.db.flush().map_err(StorageError::Sled)?;
        Ok(())
    }
}
