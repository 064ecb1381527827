use std::fs;
use std::path::Path;

use arbor::blob::{BlobKey, BlobStore};
use arbor::config::CatalogSettings;
use arbor::error::{ApiError, StorageError};
use arbor::store::{CatalogTxn, ResourceLink, ResourceStore, ResourceType};
use arbor::types::{BatchId, NodeId};
use tempfile::TempDir;

use crate::integration::support::{disk_tree, disk_tree_with, test_settings};

/// Live blob file names in the upload directory, staging excluded
fn live_blob_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn catalog_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let (folder, file) = {
        let (tree, root) = disk_tree(temp.path()).await;
        let folder = tree.add_folder(&root, "papers").await.unwrap();
        let file = tree.add_file(&folder, "thesis.pdf", b"%PDF-1.7").await.unwrap();
        tree.store().flush().unwrap();
        (folder, file)
    };

    let store = arbor::store::SledResourceStore::new(temp.path().join("catalog")).unwrap();
    let blobs = arbor::blob::FsBlobStore::new(temp.path().join("uploads")).unwrap();
    let tree = arbor::tree::TreeService::new(
        std::sync::Arc::new(store),
        std::sync::Arc::new(blobs),
        crate::integration::support::test_settings(),
    )
    .unwrap();

    let page = tree.get_page(Some(folder)).unwrap();
    let child = page.children().next().unwrap();
    assert_eq!(child.id, file);
    assert_eq!(child.title, "thesis");
    assert_eq!(child.blob.as_deref(), Some(format!("{}.pdf", file).as_str()));

    let content = tree
        .blobs()
        .get(&BlobKey::new(file, Some("pdf".into())))
        .await
        .unwrap();
    assert_eq!(content, Some(b"%PDF-1.7".to_vec()));
}

#[tokio::test]
async fn cascade_delete_clears_rows_and_files_on_disk() {
    let temp = TempDir::new().unwrap();
    let (tree, root) = disk_tree(temp.path()).await;
    let uploads = temp.path().join("uploads");

    let keep = tree.add_file(&root, "keep.txt", b"keep").await.unwrap();
    let course = tree.add_folder(&root, "course").await.unwrap();
    let week = tree.add_folder(&course, "week 1").await.unwrap();
    tree.add_file(&week, "notes.md", b"# notes").await.unwrap();
    tree.add_file(&week, "Makefile", b"all:").await.unwrap();
    let link = tree
        .add_link(&course, "syllabus", "https://example.org/syllabus")
        .await
        .unwrap();
    tree.change_link_image(&link.id, b"\x89PNG", "png").await.unwrap();
    assert_eq!(live_blob_files(&uploads).len(), 4);

    assert_eq!(
        tree.delete_subtree(&course).await.unwrap(),
        ResourceType::Folder
    );

    assert_eq!(live_blob_files(&uploads), vec![format!("{}.txt", keep)]);
    assert!(tree.blobs().staged_batches().await.unwrap().is_empty());

    let counts = tree.store().counts().unwrap();
    assert_eq!((counts.nodes, counts.links), (2, 1));
    for gone in [course, week, link.id] {
        assert!(matches!(tree.get_node(&gone), Err(ApiError::NotFound(_))));
    }
    assert!(tree.verify_integrity().await.unwrap().is_healthy());
}

#[tokio::test]
async fn cascade_delete_drops_extra_links_from_outside_the_subtree() {
    let temp = TempDir::new().unwrap();
    let (tree, root) = disk_tree(temp.path()).await;
    let course = tree.add_folder(&root, "course").await.unwrap();
    let notes = tree.add_file(&course, "notes.md", b"# notes").await.unwrap();
    let archive = tree.add_folder(&root, "archive").await.unwrap();

    let extra = ResourceLink::new(archive, notes);
    tree.store()
        .write(|txn| {
            txn.put_link(&extra)?;
            txn.put_children(&archive, &[extra.id])
        })
        .unwrap();

    tree.delete_subtree(&course).await.unwrap();

    assert_eq!(tree.store().counts().unwrap().links, 1);
    assert_eq!(tree.get_page(Some(archive)).unwrap().child_count(), 0);
    assert!(tree.verify_integrity().await.unwrap().is_healthy());
}

#[tokio::test]
async fn deleting_unknown_node_leaves_counts_unchanged() {
    let temp = TempDir::new().unwrap();
    let (tree, root) = disk_tree(temp.path()).await;
    tree.add_folder(&root, "a").await.unwrap();
    let before = tree.store().counts().unwrap();

    let result = tree.delete_subtree(&NodeId::new()).await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));
    assert_eq!(tree.store().counts().unwrap(), before);
}

#[tokio::test]
async fn upload_under_unknown_parent_leaves_no_file() {
    let temp = TempDir::new().unwrap();
    let (tree, _) = disk_tree(temp.path()).await;

    let result = tree.add_file(&NodeId::new(), "x.txt", b"x").await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));
    assert!(live_blob_files(&temp.path().join("uploads")).is_empty());
}

#[tokio::test]
async fn timed_out_upload_leaves_no_partial_file() {
    let temp = TempDir::new().unwrap();
    let settings = CatalogSettings {
        blob_timeout_ms: 1,
        ..test_settings()
    };
    let (tree, root) = disk_tree_with(temp.path(), settings).await;
    let uploads = temp.path().join("uploads");

    let result = tree.add_file(&root, "big.bin", &vec![1u8; 64 << 20]).await;
    assert!(matches!(
        result,
        Err(ApiError::StorageFailure(StorageError::Timeout { .. }))
    ));
    assert_eq!(tree.store().counts().unwrap().nodes, 1);

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while !live_blob_files(&uploads).is_empty() && std::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(live_blob_files(&uploads).is_empty(), "{:?}", live_blob_files(&uploads));
}

#[tokio::test]
async fn recovery_on_disk_restores_uncommitted_stage() {
    let temp = TempDir::new().unwrap();
    let (tree, root) = disk_tree(temp.path()).await;
    let file = tree.add_file(&root, "report.docx", b"docx").await.unwrap();
    let key = BlobKey::new(file, Some("docx".into()));

    // A delete that crashed right after staging
    let batch = BatchId::new();
    tree.blobs().stage(&batch, &key).await.unwrap();
    assert!(live_blob_files(&temp.path().join("uploads")).is_empty());

    let report = tree.recover_interrupted_deletions().await.unwrap();
    assert_eq!(report.restored, vec![key.clone()]);
    assert!(tree.blobs().exists(&key).await.unwrap());
    assert!(tree.verify_integrity().await.unwrap().is_healthy());
}

#[tokio::test]
async fn initialize_replaces_existing_catalog() {
    let temp = TempDir::new().unwrap();
    let (tree, root) = disk_tree(temp.path()).await;
    tree.add_folder(&root, "old").await.unwrap();

    let fresh = tree.initialize_catalog().await.unwrap();
    assert_ne!(fresh, root);
    assert_eq!(tree.root_id().unwrap(), fresh);
    assert_eq!(tree.store().counts().unwrap().nodes, 1);
    assert!(tree.get_page(None).unwrap().chunks.is_empty());
}
