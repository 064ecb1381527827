use std::sync::atomic::Ordering;

use arbor::error::{ApiError, StorageError};
use arbor::store::ResourceStore;
use arbor::tree::UploadItem;

use crate::integration::support::faulty_tree;

#[tokio::test]
async fn stalled_blob_write_times_out_without_metadata() {
    let (tree, root) = faulty_tree(50).await;
    tree.blobs().stall_put.store(true, Ordering::SeqCst);

    let result = tree.add_file(&root, "slow.bin", b"payload").await;
    assert!(matches!(
        result,
        Err(ApiError::StorageFailure(StorageError::Timeout { .. }))
    ));
    assert_eq!(tree.store().counts().unwrap().nodes, 1);
    assert!(tree.blobs().inner().is_empty());

    // Listings are not held up by the stalled writer
    assert!(tree.get_page(None).unwrap().chunks.is_empty());
}

#[tokio::test]
async fn failed_blob_write_creates_no_node() {
    let (tree, root) = faulty_tree(500).await;
    tree.blobs().fail_put.store(true, Ordering::SeqCst);

    let result = tree.add_file(&root, "a.txt", b"a").await;
    assert!(matches!(result, Err(ApiError::StorageFailure(_))));
    assert_eq!(tree.store().counts().unwrap().nodes, 1);
}

#[tokio::test]
async fn metadata_failure_removes_the_uploaded_blob() {
    let (tree, root) = faulty_tree(500).await;
    tree.store().fail_writes.store(true, Ordering::SeqCst);

    let result = tree.add_file(&root, "a.txt", b"a").await;
    assert!(matches!(result, Err(ApiError::StorageFailure(_))));
    assert!(tree.blobs().inner().is_empty());
}

#[tokio::test]
async fn failed_compensation_is_unrecoverable() {
    let (tree, root) = faulty_tree(500).await;
    tree.store().fail_writes.store(true, Ordering::SeqCst);
    tree.blobs().fail_remove.store(true, Ordering::SeqCst);

    let result = tree.add_file(&root, "a.txt", b"a").await;
    assert!(matches!(result, Err(ApiError::Unrecoverable(_))));

    // The orphan is visible to operators
    assert_eq!(tree.blobs().inner().len(), 1);
}

#[tokio::test]
async fn batch_upload_fails_items_independently() {
    let (tree, root) = faulty_tree(500).await;
    let items = vec![
        UploadItem::new("good.txt", b"ok".to_vec()),
        UploadItem::new("empty.txt", Vec::new()),
        UploadItem::new("also-good.md", b"ok".to_vec()),
    ];

    let results = tree.add_files(&root, &items).await;
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(ApiError::InvalidInput(_))));
    assert!(results[2].is_ok());
    assert_eq!(tree.blobs().inner().len(), 2);
    assert_eq!(tree.get_page(None).unwrap().child_count(), 2);
}
