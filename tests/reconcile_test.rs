//! Crawl-and-reconcile passes against a pre-populated store.

mod common;

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use common::{ProbeStore, disk_mtime, miner_with, quiesce};
use fsindexd::notifier::NotifierError;
use fsindexd::store::{MemoryStore, Statement, StoreError};
use fsindexd::{EntryKind, Root, RootFlags};

fn monitored() -> RootFlags {
    RootFlags::RECURSE | RootFlags::MONITOR | RootFlags::CHECK_MTIME | RootFlags::CHECK_DELETED
}

#[tokio::test]
async fn test_changed_and_new_files_are_written() {
    let temp_dir = TempDir::new().unwrap();
    let docs = temp_dir.path().join("docs");
    fs::create_dir(&docs).unwrap();
    fs::write(docs.join("a.txt"), "new contents").unwrap();
    fs::write(docs.join("b.txt"), "b").unwrap();

    // The store knows the directory as it is and a stale a.txt
    let store = Arc::new(MemoryStore::new());
    store.insert_record(&docs, EntryKind::Directory, disk_mtime(&docs), None);
    let a_id = store.insert_record(docs.join("a.txt"), EntryKind::File, 100, None);

    let mut miner = miner_with(store.clone());
    miner.add_root(Root::new(&docs, monitored())).await.unwrap();
    miner.start().await.unwrap();
    let report = miner.wait_idle().await.unwrap();

    assert!(report.is_clean());
    let summary = report.finished[0].summary;
    assert_eq!((summary.created, summary.updated, summary.deleted), (1, 1, 0));

    let applied = store.applied();
    assert_eq!(applied.len(), 2);
    assert!(applied.iter().all(|s| matches!(s, Statement::Upsert { .. })));

    let a = store.record(&docs.join("a.txt")).unwrap();
    assert_eq!(a.mtime, disk_mtime(&docs.join("a.txt")));
    assert_eq!(a.id, a_id);
    assert!(store.record(&docs.join("b.txt")).is_some());

    miner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_matching_snapshot_emits_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("tree");
    fs::create_dir_all(root.join("x/y")).unwrap();
    fs::write(root.join("x/y/z.txt"), "z").unwrap();
    fs::write(root.join("top.txt"), "t").unwrap();

    let store = Arc::new(MemoryStore::new());
    let mut miner = miner_with(store.clone());
    miner.add_root(Root::new(&root, monitored())).await.unwrap();
    miner.start().await.unwrap();
    let first = miner.wait_idle().await.unwrap();
    assert_eq!(first.finished[0].summary.created, 5);
    let written = store.applied().len();

    miner.update_root(&root, monitored()).await.unwrap();
    let second = miner.wait_idle().await.unwrap();

    assert_eq!(second.finished[0].summary.events(), 0);
    assert_eq!(store.applied().len(), written);
    miner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_parents_are_written_before_children() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("deep");
    fs::create_dir_all(root.join("a/b/c")).unwrap();
    fs::write(root.join("a/b/c/leaf.txt"), "leaf").unwrap();
    fs::write(root.join("a/sibling.txt"), "s").unwrap();

    let store = Arc::new(MemoryStore::new());
    let mut miner = miner_with(store.clone());
    miner.add_root(Root::new(&root, monitored())).await.unwrap();
    miner.start().await.unwrap();
    miner.wait_idle().await.unwrap();

    let order: Vec<_> = store
        .applied()
        .iter()
        .map(|s| s.path().to_path_buf())
        .collect();
    let position = |p: &std::path::Path| order.iter().position(|o| o == p).unwrap();

    for path in &order {
        if let Some(parent) = path.parent() {
            if parent.starts_with(&root) {
                assert!(position(parent) < position(path), "{path:?} before its parent");
            }
        }
    }

    // Every child carries its parent's identifier
    let leaf = store.record(&root.join("a/b/c/leaf.txt")).unwrap();
    let dir = store.record(&root.join("a/b/c")).unwrap();
    assert!(leaf.id > dir.id);
    miner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_vanished_directory_deleted_once() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("r");
    fs::create_dir(&root).unwrap();

    let store = Arc::new(MemoryStore::new());
    store.insert_record(&root, EntryKind::Directory, disk_mtime(&root), None);
    store.insert_record(root.join("old"), EntryKind::Directory, 5, None);
    store.insert_record(root.join("old/one.txt"), EntryKind::File, 5, None);
    store.insert_record(root.join("old/two.txt"), EntryKind::File, 5, None);

    let mut miner = miner_with(store.clone());
    miner.add_root(Root::new(&root, monitored())).await.unwrap();
    miner.start().await.unwrap();
    let report = miner.wait_idle().await.unwrap();

    let summary = report.finished[0].summary;
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.pruned, 2);
    assert_eq!(
        store.applied(),
        vec![Statement::Delete {
            path: root.join("old"),
            recursive: true
        }]
    );
    assert_eq!(store.len(), 1);
    miner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_without_check_deleted_store_entries_survive() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("r");
    fs::create_dir(&root).unwrap();

    let store = Arc::new(MemoryStore::new());
    store.insert_record(&root, EntryKind::Directory, disk_mtime(&root), None);
    store.insert_record(root.join("gone.txt"), EntryKind::File, 5, None);

    let mut miner = miner_with(store.clone());
    let flags = RootFlags::RECURSE | RootFlags::CHECK_MTIME;
    miner.add_root(Root::new(&root, flags)).await.unwrap();
    miner.start().await.unwrap();
    let report = miner.wait_idle().await.unwrap();

    assert_eq!(report.finished[0].summary.events(), 0);
    assert!(store.record(&root.join("gone.txt")).is_some());
    miner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stale_content_hash_is_redescribed() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("r");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("f.txt"), "f").unwrap();

    let store = Arc::new(MemoryStore::new());
    store.insert_record(&root, EntryKind::Directory, disk_mtime(&root), Some("v2"));
    store.insert_record(
        root.join("f.txt"),
        EntryKind::File,
        disk_mtime(&root.join("f.txt")),
        Some("v1"),
    );

    let mut settings = common::settings();
    settings.indexing.content_hash = Some("v2".to_string());
    let mut miner = fsindexd::Miner::builder()
        .settings(settings)
        .store(store.clone())
        .build()
        .unwrap();
    miner.add_root(Root::new(&root, monitored())).await.unwrap();
    miner.start().await.unwrap();
    let report = miner.wait_idle().await.unwrap();

    assert_eq!(report.finished[0].summary.updated, 1);
    assert_eq!(
        store.record(&root.join("f.txt")).unwrap().content_hash.as_deref(),
        Some("v2")
    );
    miner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_snapshot_failure_only_fails_its_root() {
    let temp_dir = TempDir::new().unwrap();
    let broken = temp_dir.path().join("broken");
    let healthy = temp_dir.path().join("healthy");
    fs::create_dir(&broken).unwrap();
    fs::create_dir(&healthy).unwrap();
    fs::write(healthy.join("ok.txt"), "ok").unwrap();

    let memory = Arc::new(MemoryStore::new());
    let store = Arc::new(ProbeStore::new(memory.clone()));
    store.break_root(&broken);

    let mut miner = miner_with(store);
    miner.add_root(Root::new(&broken, monitored())).await.unwrap();
    miner.add_root(Root::new(&healthy, monitored())).await.unwrap();
    miner.start().await.unwrap();
    let report = miner.wait_idle().await.unwrap();

    assert_eq!(report.finished.len(), 2);
    let failed = report.finished.iter().find(|o| o.path == broken).unwrap();
    assert!(matches!(
        failed.error,
        Some(NotifierError::Store(StoreError::Query { .. }))
    ));
    let ok = report.finished.iter().find(|o| o.path == healthy).unwrap();
    assert!(ok.error.is_none());
    assert!(memory.record(&healthy.join("ok.txt")).is_some());
    miner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_flush_failure_is_per_path() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("r");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("bad.txt"), "x").unwrap();
    fs::write(root.join("good.txt"), "y").unwrap();

    let store = Arc::new(MemoryStore::new());
    store.reject_path(root.join("bad.txt"));

    let mut miner = miner_with(store.clone());
    miner.add_root(Root::new(&root, monitored())).await.unwrap();
    miner.start().await.unwrap();
    let report = miner.wait_idle().await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, root.join("bad.txt"));
    assert!(store.record(&root.join("good.txt")).is_some());
    assert!(store.record(&root.join("bad.txt")).is_none());

    // The failed path stays eligible
    store.accept_path(&root.join("bad.txt"));
    miner.update_root(&root, monitored()).await.unwrap();
    let report = miner.wait_idle().await.unwrap();
    assert!(report.is_clean());
    assert!(store.record(&root.join("bad.txt")).is_some());

    quiesce(miner.scheduler()).await;
    miner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_non_recursive_root_ignores_deeper_records() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("r");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("sub/inner.txt"), "i").unwrap();

    let store = Arc::new(MemoryStore::new());
    // Known deeper entry, absent from disk: out of reach, never deleted
    store.insert_record(root.join("sub/stale.txt"), EntryKind::File, 1, None);

    let mut miner = miner_with(store.clone());
    let flags = RootFlags::CHECK_MTIME | RootFlags::CHECK_DELETED;
    miner.add_root(Root::new(&root, flags)).await.unwrap();
    miner.start().await.unwrap();
    let report = miner.wait_idle().await.unwrap();

    assert_eq!(report.finished[0].summary.created, 2);
    assert!(store.record(&root.join("sub")).is_some());
    assert!(store.record(&root.join("sub/inner.txt")).is_none());
    assert!(store.record(&root.join("sub/stale.txt")).is_some());
    miner.shutdown().await.unwrap();
}
