use std::collections::HashMap;
use std::sync::Arc;

use arbor::blob::MemoryBlobStore;
use arbor::config::CatalogSettings;
use arbor::store::{MemoryResourceStore, ResourceStore};
use arbor::tree::TreeService;
use arbor::types::NodeId;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Folder(usize),
    File(usize),
    Link(usize),
    Rename(usize),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<usize>().prop_map(Op::Folder),
        2 => any::<usize>().prop_map(Op::File),
        2 => any::<usize>().prop_map(Op::Link),
        1 => any::<usize>().prop_map(Op::Rename),
        2 => any::<usize>().prop_map(Op::Delete),
    ]
}

fn pick(nodes: &[NodeId], n: usize) -> NodeId {
    nodes[n % nodes.len()]
}

/// Apply `ops` to a fresh catalog, targeting existing nodes by index
async fn run_ops(ops: &[Op]) -> TreeService<MemoryResourceStore, MemoryBlobStore> {
    let tree = TreeService::new(
        Arc::new(MemoryResourceStore::new()),
        Arc::new(MemoryBlobStore::new()),
        CatalogSettings::default(),
    )
    .unwrap();
    let root = tree.initialize_catalog().await.unwrap();
    let mut nodes: Vec<NodeId> = vec![root];

    for (i, op) in ops.iter().enumerate() {
        let live = tree.store().scan().unwrap().nodes;
        nodes.retain(|id| live.contains_key(id));

        match op {
            Op::Folder(n) => {
                if let Ok(id) = tree.add_folder(&pick(&nodes, *n), &format!("folder {i}")).await {
                    nodes.push(id);
                }
            }
            Op::File(n) => {
                if let Ok(id) = tree
                    .add_file(&pick(&nodes, *n), &format!("file{i}.bin"), &[i as u8 + 1])
                    .await
                {
                    nodes.push(id);
                }
            }
            Op::Link(n) => {
                if let Ok(link) = tree
                    .add_link(&pick(&nodes, *n), &format!("link {i}"), "https://example.org")
                    .await
                {
                    nodes.push(link.id);
                }
            }
            Op::Rename(n) => {
                tree.rename_object(&pick(&nodes, *n), &format!("renamed {i}"))
                    .await
                    .unwrap();
            }
            Op::Delete(n) => {
                let _ = tree.delete_subtree(&pick(&nodes, *n)).await;
            }
        }
    }
    tree
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_single_parent_after_any_sequence(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let tree = runtime.block_on(run_ops(&ops));

        let snapshot = tree.store().scan().unwrap();
        let root = tree.root_id().unwrap();
        let mut incoming: HashMap<NodeId, usize> = HashMap::new();
        for link in snapshot.links.values() {
            prop_assert!(snapshot.nodes.contains_key(&link.parent_id));
            prop_assert!(snapshot.nodes.contains_key(&link.child_id));
            *incoming.entry(link.child_id).or_default() += 1;
        }
        for id in snapshot.nodes.keys() {
            let expected = if *id == root { 0 } else { 1 };
            prop_assert_eq!(incoming.get(id).copied().unwrap_or(0), expected);
        }

        let report = runtime.block_on(tree.verify_integrity()).unwrap();
        prop_assert!(report.is_healthy(), "{:?}", report.violations);

        // Every live blob belongs to a live node
        for key in tree.blobs().keys() {
            prop_assert!(snapshot.nodes.contains_key(&key.node_id));
        }
    }
}
