//! Offline invariant checks over a full catalog scan

use super::TreeService;
use crate::blob::{BlobKey, BlobStore};
use crate::error::ApiError;
use crate::store::{NodeKind, ResourceStore, ResourceType};
use crate::types::{LinkId, NodeId};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::{info, warn};

/// A single broken invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    /// No root flag and no unambiguous root folder, or a flag naming a missing node
    MissingRoot { flagged: Option<NodeId> },
    RootHasParent { root: NodeId, link: LinkId },
    /// Non-root node without an incoming link
    Orphan { node: NodeId },
    MultipleParents { node: NodeId, links: Vec<LinkId> },
    /// Link whose parent or child row does not exist
    DanglingLink { link: LinkId, missing: NodeId },
    /// Child or parent index disagrees with the link rows
    IndexMismatch { link: LinkId, detail: String },
    LeafWithChildren { node: NodeId, kind: ResourceType },
    /// Attached, but not reachable from the root
    Unreachable { node: NodeId },
    MissingBlob { node: NodeId, blob: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingRoot { flagged: Some(id) } => {
                write!(f, "root flag names missing node {}", id)
            }
            Violation::MissingRoot { flagged: None } => write!(f, "no root folder"),
            Violation::RootHasParent { root, link } => {
                write!(f, "root {} has incoming link {}", root, link)
            }
            Violation::Orphan { node } => write!(f, "node {} has no parent", node),
            Violation::MultipleParents { node, links } => {
                write!(f, "node {} has {} incoming links", node, links.len())
            }
            Violation::DanglingLink { link, missing } => {
                write!(f, "link {} references missing node {}", link, missing)
            }
            Violation::IndexMismatch { link, detail } => {
                write!(f, "index mismatch for link {}: {}", link, detail)
            }
            Violation::LeafWithChildren { node, kind } => {
                write!(f, "{} {} has children", kind, node)
            }
            Violation::Unreachable { node } => {
                write!(f, "node {} is not reachable from the root", node)
            }
            Violation::MissingBlob { node, blob } => {
                write!(f, "file {} has no blob {}", node, blob)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub nodes: usize,
    pub links: usize,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.violations.is_empty()
    }
}

impl<S: ResourceStore, B: BlobStore> TreeService<S, B> {
    /// Check every structural invariant and every file blob.
    ///
    /// Meant for maintenance: the scan is not isolated from concurrent writes.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, ApiError> {
        let snapshot = self.store.scan()?;
        let mut violations = Vec::new();

        let mut incoming: HashMap<NodeId, Vec<LinkId>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, usize> = HashMap::new();
        let mut link_ids: Vec<&LinkId> = snapshot.links.keys().collect();
        link_ids.sort();
        for id in link_ids {
            let link = &snapshot.links[id];
            for end in [link.parent_id, link.child_id] {
                if !snapshot.nodes.contains_key(&end) {
                    violations.push(Violation::DanglingLink {
                        link: link.id,
                        missing: end,
                    });
                }
            }
            incoming.entry(link.child_id).or_default().push(link.id);
            *outgoing.entry(link.parent_id).or_default() += 1;

            let indexed = snapshot
                .children
                .get(&link.parent_id)
                .map_or(false, |ids| ids.contains(&link.id));
            if !indexed {
                violations.push(Violation::IndexMismatch {
                    link: link.id,
                    detail: format!("not in the child list of {}", link.parent_id),
                });
            }
            if !snapshot.parents.contains_key(&link.child_id) {
                violations.push(Violation::IndexMismatch {
                    link: link.id,
                    detail: format!("child {} has no parent entry", link.child_id),
                });
            }
        }

        for (parent, ids) in &snapshot.children {
            for id in ids {
                match snapshot.links.get(id) {
                    Some(link) if link.parent_id == *parent => {}
                    Some(link) => violations.push(Violation::IndexMismatch {
                        link: *id,
                        detail: format!("listed under {} but points from {}", parent, link.parent_id),
                    }),
                    None => violations.push(Violation::IndexMismatch {
                        link: *id,
                        detail: format!("listed under {} but the row is missing", parent),
                    }),
                }
            }
        }
        for (child, id) in &snapshot.parents {
            match snapshot.links.get(id) {
                Some(link) if link.child_id == *child => {}
                _ => violations.push(Violation::IndexMismatch {
                    link: *id,
                    detail: format!("parent entry of {} does not match a link into it", child),
                }),
            }
        }

        let root = match snapshot.root {
            Some(id) if snapshot.nodes.contains_key(&id) => Some(id),
            Some(id) => {
                violations.push(Violation::MissingRoot { flagged: Some(id) });
                None
            }
            None => match self.root_id() {
                Ok(id) => Some(id),
                Err(ApiError::NotFound(_)) | Err(ApiError::CorruptState(_)) => {
                    violations.push(Violation::MissingRoot { flagged: None });
                    None
                }
                Err(err) => return Err(err),
            },
        };

        let mut node_ids: Vec<&NodeId> = snapshot.nodes.keys().collect();
        node_ids.sort();
        for id in &node_ids {
            let node = &snapshot.nodes[*id];
            let parents = incoming.get(*id).map(Vec::as_slice).unwrap_or_default();
            match (Some(**id) == root, parents) {
                (true, [link, ..]) => violations.push(Violation::RootHasParent {
                    root: node.id,
                    link: *link,
                }),
                (false, []) => violations.push(Violation::Orphan { node: node.id }),
                (_, [_, _, ..]) => violations.push(Violation::MultipleParents {
                    node: node.id,
                    links: parents.to_vec(),
                }),
                _ => {}
            }
            if !node.is_folder() && outgoing.get(*id).copied().unwrap_or(0) > 0 {
                violations.push(Violation::LeafWithChildren {
                    node: node.id,
                    kind: node.resource_type(),
                });
            }
        }

        if let Some(root) = root {
            let mut reached = HashSet::from([root]);
            let mut worklist = VecDeque::from([root]);
            while let Some(id) = worklist.pop_front() {
                for link_id in snapshot.children.get(&id).into_iter().flatten() {
                    if let Some(link) = snapshot.links.get(link_id) {
                        if reached.insert(link.child_id) {
                            worklist.push_back(link.child_id);
                        }
                    }
                }
            }
            for id in &node_ids {
                if !reached.contains(*id) && incoming.contains_key(*id) {
                    violations.push(Violation::Unreachable { node: **id });
                }
            }
        }

        for id in &node_ids {
            let node = &snapshot.nodes[*id];
            if let NodeKind::File { extension } = &node.kind {
                let key = BlobKey::new(node.id, extension.clone());
                if !self.blob_op("check blob", self.blobs.exists(&key)).await? {
                    violations.push(Violation::MissingBlob {
                        node: node.id,
                        blob: key.file_name(),
                    });
                }
            }
        }

        let report = IntegrityReport {
            nodes: snapshot.nodes.len(),
            links: snapshot.links.len(),
            violations,
        };
        if report.is_healthy() {
            info!(nodes = report.nodes, links = report.links, "Catalog is consistent");
        } else {
            warn!(nodes = report.nodes, links = report.links, violations = report.violations.len(), "Catalog has integrity violations");
        }
        Ok(report)
    }
}
