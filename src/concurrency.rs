//! Concurrent access safety for catalog mutations
//!
//! Provides per-node async read/write locks. Inserts take a read lock on the
//! parent, in-place edits take a write lock on the target, and cascade deletes
//! write-lock every node of the subtree top-down. Listings take no locks; they
//! rely on the store's snapshot reads instead.
//!
//! Every acquisition is bounded by a timeout so a stalled holder can never
//! block an unrelated caller forever.

use crate::error::ApiError;
use crate::types::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as AsyncRwLock};
use tokio::time::Instant;

/// Held lock on a single node; released on drop
#[derive(Debug)]
pub enum NodeGuard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Write locks on a whole subtree, in acquisition order
#[derive(Debug)]
pub struct SubtreeGuard {
    node_ids: Vec<NodeId>,
    _guards: Vec<OwnedRwLockWriteGuard<()>>,
}

impl SubtreeGuard {
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    pub fn covers(&self, node_id: &NodeId) -> bool {
        self.node_ids.contains(node_id)
    }
}

/// Per-node lock manager
pub struct NodeLockManager {
    /// Map from NodeId to per-node lock
    locks: Arc<RwLock<HashMap<NodeId, Arc<AsyncRwLock<()>>>>>,
    timeout: Duration,
}

impl NodeLockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn get_node_lock(&self, node_id: &NodeId) -> Arc<AsyncRwLock<()>> {
        {
            let map = self.locks.read();
            if let Some(lock) = map.get(node_id) {
                return lock.clone();
            }
        }

        let mut map = self.locks.write();
        map.entry(*node_id)
            .or_insert_with(|| Arc::new(AsyncRwLock::new(())))
            .clone()
    }

    fn busy(&self, node_id: &NodeId) -> ApiError {
        ApiError::Busy(format!(
            "could not lock node {} within {}ms",
            node_id,
            self.timeout.as_millis()
        ))
    }

    /// Shared lock on one node
    pub async fn read(&self, node_id: &NodeId) -> Result<NodeGuard, ApiError> {
        let lock = self.get_node_lock(node_id);
        tokio::time::timeout(self.timeout, lock.read_owned())
            .await
            .map(NodeGuard::Read)
            .map_err(|_| self.busy(node_id))
    }

    /// Exclusive lock on one node
    pub async fn write(&self, node_id: &NodeId) -> Result<NodeGuard, ApiError> {
        let lock = self.get_node_lock(node_id);
        tokio::time::timeout(self.timeout, lock.write_owned())
            .await
            .map(NodeGuard::Write)
            .map_err(|_| self.busy(node_id))
    }

    /// Exclusive locks on every node in `node_ids`, acquired in the given order.
    ///
    /// Callers pass ids top-down (ancestors first) so that two overlapping
    /// subtree locks always queue in the same order. The timeout covers the
    /// whole acquisition; on elapse every lock taken so far is released.
    pub async fn write_all(&self, node_ids: &[NodeId]) -> Result<SubtreeGuard, ApiError> {
        let deadline = Instant::now() + self.timeout;
        let mut guards = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let lock = self.get_node_lock(node_id);
            let guard = tokio::time::timeout_at(deadline, lock.write_owned())
                .await
                .map_err(|_| self.busy(node_id))?;
            guards.push(guard);
        }
        Ok(SubtreeGuard {
            node_ids: node_ids.to_vec(),
            _guards: guards,
        })
    }

    /// Drop lock entries for nodes that no longer exist.
    ///
    /// Entries still referenced by a waiter or holder are kept.
    pub fn forget(&self, node_ids: &[NodeId]) {
        let mut map = self.locks.write();
        for node_id in node_ids {
            if let Some(lock) = map.get(node_id) {
                if Arc::strong_count(lock) == 1 {
                    map.remove(node_id);
                }
            }
        }
    }

    /// Number of nodes with a lock entry
    pub fn tracked(&self) -> usize {
        self.locks.read().len()
    }
}

impl Default for NodeLockManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
