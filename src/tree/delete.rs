//! Cascade delete
//!
//! A subtree delete runs as a saga:
//!
//! 1. plan the subtree from a snapshot and write-lock every planned node,
//!    ancestors first; re-plan under the locks and retry if the subtree grew
//! 2. move every owned blob into a staging batch
//! 3. remove every node row and link row of the plan in one metadata transaction
//! 4. purge the batch, or restore it if the commit failed
//!
//! A delete that is cancelled or crashes between 2 and 4 leaves its batch
//! behind; `recover_interrupted_deletions` restores or purges it later.

use super::TreeService;
use crate::blob::{BlobKey, BlobRemoval, BlobStore};
use crate::error::ApiError;
use crate::store::{CatalogTxn, ResourceLink, ResourceNode, ResourceStore, ResourceType};
use crate::types::{BatchId, LinkId, NodeId};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, error, info, warn};

/// Attempts at locking a subtree that keeps growing underneath us
const MAX_PLAN_ATTEMPTS: usize = 3;

/// One node scheduled for removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNode {
    pub node: ResourceNode,
    /// Distance from the subtree root
    pub depth: usize,
    /// Outgoing links at planning time
    pub child_links: Vec<LinkId>,
}

/// Everything a subtree delete will remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreePlan {
    /// Breadth-first: every node comes after its parent
    nodes: Vec<PlannedNode>,
    lock_order: Vec<NodeId>,
    /// Links into planned nodes that the traversal did not follow
    incoming: Vec<ResourceLink>,
}

impl SubtreePlan {
    pub fn root(&self) -> &ResourceNode {
        &self.nodes[0].node
    }

    pub fn root_type(&self) -> ResourceType {
        self.root().resource_type()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in lock order (ancestors first)
    pub fn lock_order(&self) -> &[NodeId] {
        &self.lock_order
    }

    /// Nodes with every child ahead of its parent
    pub fn post_order(&self) -> impl Iterator<Item = &PlannedNode> {
        self.nodes.iter().rev()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.lock_order.contains(id)
    }

    /// Keep the links in `links` that point into the plan from outside the traversal.
    pub fn with_incoming(mut self, links: Vec<ResourceLink>) -> Self {
        let followed: HashSet<LinkId> = self
            .nodes
            .iter()
            .flat_map(|planned| planned.child_links.iter().copied())
            .collect();
        self.incoming = links
            .into_iter()
            .filter(|link| !followed.contains(&link.id) && self.contains(&link.child_id))
            .collect();
        self
    }

    pub fn incoming(&self) -> &[ResourceLink] {
        &self.incoming
    }

    /// Incoming links other than the single parent link of the subtree root
    pub fn stray_links(&self) -> usize {
        let root = self.root().id;
        let into_root = self.incoming.iter().filter(|l| l.child_id == root).count();
        self.incoming.len() - into_root.min(1)
    }

    /// Blobs owned by planned nodes, with the owner's type
    pub fn blob_keys(&self) -> Vec<(BlobKey, ResourceType)> {
        self.post_order()
            .filter_map(|planned| {
                BlobKey::for_node(&planned.node).map(|key| (key, planned.node.resource_type()))
            })
            .collect()
    }
}

/// Collect the subtree under `root_id` without following any edge twice.
///
/// A node reached a second time (a cycle or a shared child) or a path deeper
/// than `max_depth` means the tree invariants no longer hold.
pub fn plan_subtree(
    txn: &dyn CatalogTxn,
    root_id: &NodeId,
    max_depth: usize,
) -> Result<SubtreePlan, ApiError> {
    let mut nodes = Vec::new();
    let mut visited = HashSet::new();
    let mut worklist = VecDeque::from([(*root_id, 0usize)]);

    while let Some((id, depth)) = worklist.pop_front() {
        if !visited.insert(id) {
            return Err(ApiError::CorruptState(format!(
                "node {} is reachable twice from {}",
                id, root_id
            )));
        }
        if depth > max_depth {
            return Err(ApiError::CorruptState(format!(
                "subtree under {} is deeper than {}",
                root_id, max_depth
            )));
        }

        let node = match txn.get_node(&id)? {
            Some(node) => node,
            None if depth == 0 => return Err(ApiError::node_not_found(&id)),
            None => {
                return Err(ApiError::CorruptState(format!(
                    "descendant {} of {} does not exist",
                    id, root_id
                )))
            }
        };

        let links = txn.child_links(&id)?;
        if !node.is_folder() && !links.is_empty() {
            warn!(node = %id, kind = %node.resource_type(), children = links.len(), "Leaf node has children; deleting them too");
        }
        for link in &links {
            worklist.push_back((link.child_id, depth + 1));
        }

        nodes.push(PlannedNode {
            node,
            depth,
            child_links: links.iter().map(|l| l.id).collect(),
        });
    }

    let lock_order = nodes.iter().map(|p| p.node.id).collect();
    Ok(SubtreePlan {
        nodes,
        lock_order,
        incoming: Vec::new(),
    })
}

/// Remove every row of `plan`: every link into a planned node, every link out
/// of one, and the planned nodes themselves.
pub fn apply_plan(txn: &dyn CatalogTxn, plan: &SubtreePlan) -> Result<(), ApiError> {
    for link in plan.incoming() {
        txn.detach(&link.id)?;
    }
    if let Some(link_id) = txn.get_parent(&plan.root().id)? {
        txn.detach(&link_id)?;
    }

    for planned in plan.post_order() {
        let id = planned.node.id;
        for link_id in txn.get_children(&id)? {
            txn.detach(&link_id)?;
        }
        txn.put_children(&id, &[])?;
        if txn.get_parent(&id)?.is_some() {
            txn.delete_parent(&id)?;
        }
        txn.delete_node(&id)?;
    }
    Ok(())
}

/// Outcome of `recover_interrupted_deletions`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Batches examined
    pub batches: usize,
    /// Blobs put back because their node still exists
    pub restored: Vec<BlobKey>,
    /// Blobs dropped because their node is gone
    pub purged: Vec<BlobKey>,
    /// Batches left alone because their nodes were locked
    pub skipped: Vec<BatchId>,
}

impl<S: ResourceStore, B: BlobStore> TreeService<S, B> {
    /// Delete `node_id` and everything beneath it. Returns the type of `node_id`.
    pub async fn delete_subtree(&self, node_id: &NodeId) -> Result<ResourceType, ApiError> {
        match self.root_id() {
            Ok(root) if root == *node_id => {
                return Err(ApiError::InvalidInput(
                    "the root folder cannot be deleted".to_string(),
                ))
            }
            Ok(_) | Err(ApiError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let max_depth = self.settings.max_tree_depth;
        for attempt in 1..=MAX_PLAN_ATTEMPTS {
            let draft = self.store.read(|txn| plan_subtree(txn, node_id, max_depth))?;
            let guard = self.locks.write_all(draft.lock_order()).await?;

            let plan = self.store.read(|txn| plan_subtree(txn, node_id, max_depth))?;
            if !plan.lock_order().iter().all(|id| guard.covers(id)) {
                debug!(node = %node_id, attempt, planned = draft.len(), current = plan.len(), "Subtree grew while locking; re-planning");
                continue;
            }
            let planned: HashSet<NodeId> = plan.lock_order().iter().copied().collect();
            let plan = plan.with_incoming(self.store.links_into(&planned)?);
            if plan.stray_links() > 0 {
                warn!(node = %node_id, stray = plan.stray_links(), "Subtree has extra incoming links; deleting them too");
            }

            debug!(node = %node_id, nodes = plan.len(), blobs = plan.blob_keys().len(), "Planned subtree delete");
            let result = self.execute_plan(&plan).await;
            drop(guard);
            if result.is_ok() {
                self.locks.forget(plan.lock_order());
            }
            return result.map(|()| plan.root_type());
        }

        Err(ApiError::Busy(format!(
            "subtree under {} kept changing after {} attempts",
            node_id, MAX_PLAN_ATTEMPTS
        )))
    }

    async fn execute_plan(&self, plan: &SubtreePlan) -> Result<(), ApiError> {
        let batch = BatchId::new();
        let root = plan.root().id;
        info!(batch = %batch, node = %root, nodes = plan.len(), "Deleting subtree");

        let mut staged = Vec::new();
        for (key, owner) in plan.blob_keys() {
            match self.blob_op("stage blob", self.blobs.stage(&batch, &key)).await {
                Ok(BlobRemoval::Removed) => staged.push(key),
                Ok(BlobRemoval::Missing) => match owner {
                    ResourceType::File => warn!(batch = %batch, blob = %key, "File blob missing; deleting node anyway"),
                    ResourceType::Folder | ResourceType::Link => debug!(batch = %batch, blob = %key, "No preview image"),
                },
                Err(err) => {
                    error!(batch = %batch, blob = %key, error = %err, "Staging failed; restoring batch");
                    self.rollback_batch(&batch, &staged).await?;
                    return Err(err);
                }
            }
        }
        debug!(batch = %batch, staged = staged.len(), "Staged blobs");

        if let Err(err) = self.store.write(|txn| apply_plan(txn, plan)) {
            error!(batch = %batch, node = %root, error = %err, "Metadata commit failed; restoring batch");
            self.rollback_batch(&batch, &staged).await?;
            return Err(err);
        }
        info!(batch = %batch, node = %root, "Committed subtree delete");

        if let Err(err) = self.blob_op("purge staged blobs", self.blobs.purge(&batch)).await {
            error!(batch = %batch, error = %err, "Could not purge staged blobs; left for recovery");
        }
        Ok(())
    }

    /// Put staged blobs back. Any blob that cannot be restored is unrecoverable.
    async fn rollback_batch(&self, batch: &BatchId, staged: &[BlobKey]) -> Result<(), ApiError> {
        let mut failed = Vec::new();
        for key in staged {
            if let Err(err) = self.blob_op("restore staged blob", self.blobs.restore(batch, key)).await {
                error!(batch = %batch, blob = %key, error = %err, "Could not restore staged blob");
                failed.push(key.to_string());
            }
        }

        if !failed.is_empty() {
            return Err(ApiError::Unrecoverable(format!(
                "batch {}: {} blob(s) could not be restored: {}",
                batch,
                failed.len(),
                failed.join(", ")
            )));
        }

        if let Err(err) = self.blob_op("purge staged blobs", self.blobs.purge(batch)).await {
            warn!(batch = %batch, error = %err, "Could not drop empty staging batch");
        }
        info!(batch = %batch, restored = staged.len(), "Rolled back subtree delete");
        Ok(())
    }

    /// Finish deletes that were interrupted after staging blobs.
    ///
    /// A staged blob whose node still exists belongs to a delete that never
    /// committed and is restored; one whose node is gone is purged.
    pub async fn recover_interrupted_deletions(&self) -> Result<RecoveryReport, ApiError> {
        let mut report = RecoveryReport::default();

        for pending in self.blob_op("list staged blobs", self.blobs.staged_batches()).await? {
            report.batches += 1;
            let mut owners: Vec<NodeId> = pending.keys.iter().map(|k| k.node_id).collect();
            owners.sort();
            owners.dedup();

            let _guard = match self.locks.write_all(&owners).await {
                Ok(guard) => guard,
                Err(ApiError::Busy(reason)) => {
                    warn!(batch = %pending.batch, reason = %reason, "Skipping batch in use");
                    report.skipped.push(pending.batch);
                    continue;
                }
                Err(err) => return Err(err),
            };

            // The delete that owned the batch may have finished while we waited
            let current = self
                .blob_op("list staged blobs", self.blobs.staged_batches())
                .await?
                .into_iter()
                .find(|b| b.batch == pending.batch);
            let Some(batch) = current else {
                continue;
            };

            for key in batch.keys {
                let alive = self.store.read(|txn| Ok(txn.get_node(&key.node_id)?.is_some()))?;
                if alive {
                    self.blob_op("restore staged blob", self.blobs.restore(&batch.batch, &key))
                        .await?;
                    report.restored.push(key);
                } else {
                    report.purged.push(key);
                }
            }
            self.blob_op("purge staged blobs", self.blobs.purge(&batch.batch))
                .await?;
            info!(batch = %batch.batch, "Recovered staging batch");
        }

        info!(
            batches = report.batches,
            restored = report.restored.len(),
            purged = report.purged.len(),
            skipped = report.skipped.len(),
            "Recovery finished"
        );
        Ok(report)
    }
}
