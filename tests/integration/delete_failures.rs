use std::sync::atomic::Ordering;
use std::time::Duration;

use arbor::blob::BlobStore;
use arbor::error::ApiError;
use arbor::store::ResourceStore;
use arbor::types::NodeId;

use crate::integration::support::{faulty_tree, FaultyTree};

/// `docs` folder with two files under the root
async fn docs_folder(tree: &FaultyTree, root: &NodeId) -> NodeId {
    let docs = tree.add_folder(root, "docs").await.unwrap();
    tree.add_file(&docs, "a.txt", b"a").await.unwrap();
    tree.add_file(&docs, "b.pdf", b"b").await.unwrap();
    docs
}

#[tokio::test]
async fn commit_failure_restores_staged_blobs() {
    let (tree, root) = faulty_tree(500).await;
    let docs = docs_folder(&tree, &root).await;
    let counts = tree.store().counts().unwrap();
    let keys = tree.blobs().inner().keys();

    tree.store().fail_writes.store(true, Ordering::SeqCst);
    let result = tree.delete_subtree(&docs).await;
    assert!(matches!(result, Err(ApiError::StorageFailure(_))));

    assert_eq!(tree.store().counts().unwrap(), counts);
    assert_eq!(tree.blobs().inner().keys(), keys);
    assert!(tree.blobs().staged_batches().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_restore_escalates_and_recovery_repairs() {
    let (tree, root) = faulty_tree(500).await;
    let docs = docs_folder(&tree, &root).await;
    let keys = tree.blobs().inner().keys();

    tree.store().fail_writes.store(true, Ordering::SeqCst);
    tree.blobs().fail_restore.store(true, Ordering::SeqCst);
    let result = tree.delete_subtree(&docs).await;
    assert!(matches!(result, Err(ApiError::Unrecoverable(_))));
    assert!(tree.blobs().inner().is_empty());

    tree.store().fail_writes.store(false, Ordering::SeqCst);
    tree.blobs().heal();
    let report = tree.recover_interrupted_deletions().await.unwrap();
    assert_eq!(report.restored.len(), 2);
    assert!(report.purged.is_empty());
    assert_eq!(tree.blobs().inner().keys(), keys);
    assert!(tree.verify_integrity().await.unwrap().is_healthy());
}

#[tokio::test]
async fn staging_failure_rolls_back_earlier_stages() {
    let (tree, root) = faulty_tree(500).await;
    let docs = docs_folder(&tree, &root).await;
    let counts = tree.store().counts().unwrap();
    let keys = tree.blobs().inner().keys();

    *tree.blobs().fail_stage_after.lock() = Some(1);
    let result = tree.delete_subtree(&docs).await;
    assert!(matches!(result, Err(ApiError::StorageFailure(_))));

    assert_eq!(tree.store().counts().unwrap(), counts);
    assert_eq!(tree.blobs().inner().keys(), keys);
    assert!(tree.blobs().staged_batches().await.unwrap().is_empty());
}

#[tokio::test]
async fn purge_failure_still_deletes_and_leaves_batch_for_recovery() {
    let (tree, root) = faulty_tree(500).await;
    let docs = docs_folder(&tree, &root).await;

    tree.blobs().fail_purge.store(true, Ordering::SeqCst);
    tree.delete_subtree(&docs).await.unwrap();
    assert!(matches!(tree.get_node(&docs), Err(ApiError::NotFound(_))));
    assert!(tree.blobs().inner().is_empty());
    assert_eq!(tree.blobs().staged_batches().await.unwrap().len(), 1);

    tree.blobs().heal();
    let report = tree.recover_interrupted_deletions().await.unwrap();
    assert_eq!(report.batches, 1);
    assert_eq!(report.purged.len(), 2);
    assert!(report.restored.is_empty());
    assert!(tree.blobs().staged_batches().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_delete_leaves_a_recoverable_batch() {
    let (tree, root) = faulty_tree(10_000).await;
    let docs = docs_folder(&tree, &root).await;
    let counts = tree.store().counts().unwrap();

    *tree.blobs().stall_stage_after.lock() = Some(1);
    let cancelled = tokio::time::timeout(Duration::from_millis(100), tree.delete_subtree(&docs)).await;
    assert!(cancelled.is_err());

    // Nothing committed; one blob is sitting in staging
    assert_eq!(tree.store().counts().unwrap(), counts);
    assert_eq!(tree.blobs().inner().len(), 1);
    let batches = tree.blobs().staged_batches().await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].keys.len(), 1);

    tree.blobs().heal();
    let report = tree.recover_interrupted_deletions().await.unwrap();
    assert_eq!(report.restored.len(), 1);
    assert_eq!(tree.blobs().inner().len(), 2);

    tree.delete_subtree(&docs).await.unwrap();
    assert!(tree.blobs().inner().is_empty());
    assert!(tree.verify_integrity().await.unwrap().is_healthy());
}
