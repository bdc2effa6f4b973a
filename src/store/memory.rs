//! In-process resource store with optional JSON persistence.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::{StoreError, StoreResult};
use super::statement::Statement;
use super::{ResourceStore, StoreRecord};
use crate::types::{EntryKind, ResourceId, rebase};

#[derive(Debug, Serialize, Deserialize)]
struct Inner {
    next_id: u64,
    records: BTreeMap<PathBuf, StoreRecord>,
    #[serde(skip)]
    history: Vec<Statement>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            next_id: 1,
            records: BTreeMap::new(),
            history: Vec::new(),
        }
    }
}

impl Inner {
    fn allocate_id(&mut self) -> ResourceId {
        let id = ResourceId::new(self.next_id).unwrap_or(ResourceId::MIN);
        self.next_id += 1;
        id
    }

    fn subtree_keys(&self, path: &Path) -> Vec<PathBuf> {
        self.records
            .range(path.to_path_buf()..)
            .take_while(|(p, _)| p.starts_with(path))
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn remove_descendants(&mut self, path: &Path) {
        for key in self.subtree_keys(path) {
            if key != path {
                self.records.remove(&key);
            }
        }
    }

    fn apply(&mut self, statement: &Statement) -> StoreResult<()> {
        match statement {
            Statement::Upsert {
                path,
                kind,
                mtime,
                content_hash,
                attributes_only,
                ..
            } => {
                let existing = self.records.get(path).cloned();
                let record = match existing {
                    Some(old) => {
                        if old.kind.is_dir() && !kind.is_dir() {
                            self.remove_descendants(path);
                        }
                        let content_hash = if *attributes_only {
                            old.content_hash
                        } else {
                            content_hash.clone()
                        };
                        StoreRecord {
                            path: path.clone(),
                            kind: *kind,
                            mtime: *mtime,
                            content_hash,
                            id: old.id,
                        }
                    }
                    None => StoreRecord {
                        path: path.clone(),
                        kind: *kind,
                        mtime: *mtime,
                        content_hash: content_hash.clone(),
                        id: self.allocate_id(),
                    },
                };
                self.records.insert(path.clone(), record);
            }
            Statement::Delete { path, recursive } => {
                if *recursive {
                    for key in self.subtree_keys(path) {
                        self.records.remove(&key);
                    }
                } else {
                    self.records.remove(path);
                }
            }
            Statement::Move {
                from,
                to,
                recursive,
            } => {
                if !self.records.contains_key(from) {
                    return Err(StoreError::Apply {
                        path: to.clone(),
                        reason: format!("move source {} is not stored", from.display()),
                    });
                }

                // Whatever lived at the destination is replaced
                for key in self.subtree_keys(to) {
                    self.records.remove(&key);
                }

                let keys = if *recursive {
                    self.subtree_keys(from)
                } else {
                    vec![from.clone()]
                };
                for key in keys {
                    let Some(mut record) = self.records.remove(&key) else {
                        continue;
                    };
                    let Some(target) = rebase(&key, from, to) else {
                        continue;
                    };
                    record.path = target.clone();
                    self.records.insert(target, record);
                }
            }
        }
        Ok(())
    }
}

/// [`ResourceStore`] keeping every record in memory.
///
/// Used by the binary (persisted with [`MemoryStore::save`]) and as the
/// store double in tests, which can inject latency, per-path failures and
/// connection loss.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    rejected: RwLock<HashSet<PathBuf>>,
    offline: RwLock<bool>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every store round-trip by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Load a store previously written by [`MemoryStore::save`].
    ///
    /// A missing file yields an empty store.
    pub fn load(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        let inner: Inner = serde_json::from_str(&data)?;
        Ok(Self {
            inner: RwLock::new(inner),
            ..Default::default()
        })
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&*self.inner.read())?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Seed a record directly, bypassing statements.
    pub fn insert_record(
        &self,
        path: impl Into<PathBuf>,
        kind: EntryKind,
        mtime: i64,
        content_hash: Option<&str>,
    ) -> ResourceId {
        let path = path.into();
        let mut inner = self.inner.write();
        let id = match inner.records.get(&path) {
            Some(existing) => existing.id,
            None => inner.allocate_id(),
        };
        inner.records.insert(
            path.clone(),
            StoreRecord {
                path,
                kind,
                mtime,
                content_hash: content_hash.map(str::to_string),
                id,
            },
        );
        id
    }

    pub fn record(&self, path: &Path) -> Option<StoreRecord> {
        self.inner.read().records.get(path).cloned()
    }

    /// Every stored record, in path order.
    pub fn records(&self) -> Vec<StoreRecord> {
        self.inner.read().records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Statements applied successfully so far, oldest first.
    pub fn applied(&self) -> Vec<Statement> {
        self.inner.read().history.clone()
    }

    /// Make every statement targeting `path` fail.
    pub fn reject_path(&self, path: impl Into<PathBuf>) {
        self.rejected.write().insert(path.into());
    }

    pub fn accept_path(&self, path: &Path) {
        self.rejected.write().remove(path);
    }

    /// Simulate losing (or regaining) the store connection.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.write() = offline;
    }

    async fn round_trip(&self, cancel: &CancellationToken) -> StoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::select! {
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if *self.offline.read() {
            return Err(StoreError::Connection("store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn query_root_snapshot(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<StoreRecord>> {
        self.round_trip(cancel).await?;
        let inner = self.inner.read();
        Ok(inner
            .records
            .range(root.to_path_buf()..)
            .take_while(|(p, _)| p.starts_with(root))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn lookup_identifier(&self, path: &Path) -> StoreResult<Option<ResourceId>> {
        self.round_trip(&CancellationToken::new()).await?;
        Ok(self.inner.read().records.get(path).map(|r| r.id))
    }

    async fn apply_batch(
        &self,
        statements: &[Statement],
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<StoreResult<()>>> {
        self.round_trip(cancel).await?;

        let rejected = self.rejected.read().clone();
        let mut inner = self.inner.write();
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            if rejected.contains(statement.path()) {
                results.push(Err(StoreError::Apply {
                    path: statement.path().to_path_buf(),
                    reason: "rejected by store".to_string(),
                }));
                continue;
            }
            let result = inner.apply(statement);
            if result.is_ok() {
                inner.history.push(statement.clone());
            }
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn upsert(path: &str, kind: EntryKind, mtime: i64) -> Statement {
        Statement::Upsert {
            path: path.into(),
            kind,
            mtime,
            size: 0,
            content_hash: Some("h1".into()),
            container: None,
            attributes_only: false,
        }
    }

    #[tokio::test]
    async fn test_snapshot_is_scoped_to_root() {
        let store = MemoryStore::new();
        store.insert_record("/docs", EntryKind::Directory, 1, None);
        store.insert_record("/docs/a.txt", EntryKind::File, 2, None);
        store.insert_record("/docs/sub/b.txt", EntryKind::File, 3, None);
        store.insert_record("/docs-old/c.txt", EntryKind::File, 4, None);
        store.insert_record("/other", EntryKind::Directory, 5, None);

        let snapshot = store
            .query_root_snapshot(Path::new("/docs"), &CancellationToken::new())
            .await
            .unwrap();
        let paths: Vec<_> = snapshot.iter().map(|r| r.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/docs"),
                PathBuf::from("/docs/a.txt"),
                PathBuf::from("/docs/sub/b.txt"),
            ]
        );
    }

    #[tokio::test]
    async fn test_upsert_keeps_identifier() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        store
            .apply_batch(&[upsert("/a", EntryKind::File, 1)], &cancel)
            .await
            .unwrap();
        let id = store.record(Path::new("/a")).unwrap().id;

        store
            .apply_batch(&[upsert("/a", EntryKind::File, 2)], &cancel)
            .await
            .unwrap();
        let record = store.record(Path::new("/a")).unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.mtime, 2);
        assert_eq!(
            store.lookup_identifier(Path::new("/a")).await.unwrap(),
            Some(id)
        );
    }

    #[tokio::test]
    async fn test_recursive_delete_and_move() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        store.insert_record("/r/d", EntryKind::Directory, 1, None);
        store.insert_record("/r/d/x", EntryKind::File, 1, None);
        store.insert_record("/r/d/y/z", EntryKind::File, 1, None);
        store.insert_record("/r/e", EntryKind::Directory, 1, None);
        store.insert_record("/r/e/w", EntryKind::File, 1, None);

        let results = store
            .apply_batch(
                &[
                    Statement::Move {
                        from: "/r/d".into(),
                        to: "/r/m".into(),
                        recursive: true,
                    },
                    Statement::Delete {
                        path: "/r/e".into(),
                        recursive: true,
                    },
                    // Deleting something absent is not an error
                    Statement::Delete {
                        path: "/r/gone".into(),
                        recursive: false,
                    },
                ],
                &cancel,
            )
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.is_ok()));

        let paths: Vec<_> = store.records().into_iter().map(|r| r.path).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/r/m"),
                PathBuf::from("/r/m/x"),
                PathBuf::from("/r/m/y/z"),
            ]
        );
        assert_eq!(store.applied().len(), 3);
    }

    #[tokio::test]
    async fn test_per_item_failures() {
        let store = MemoryStore::new();
        store.reject_path("/bad");
        let results = store
            .apply_batch(
                &[
                    upsert("/good", EntryKind::File, 1),
                    upsert("/bad", EntryKind::File, 1),
                    Statement::Move {
                        from: "/missing".into(),
                        to: "/dest".into(),
                        recursive: false,
                    },
                ],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(StoreError::Apply { .. })));
        assert!(matches!(results[2], Err(StoreError::Apply { .. })));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_and_cancelled() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store
            .apply_batch(&[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));

        store.set_offline(false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = store
            .query_root_snapshot(Path::new("/"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_kind_change_drops_children() {
        let store = MemoryStore::new();
        store.insert_record("/p", EntryKind::Directory, 1, None);
        store.insert_record("/p/child", EntryKind::File, 1, None);
        store
            .apply_batch(&[upsert("/p", EntryKind::File, 2)], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.record(Path::new("/p")).unwrap().kind, EntryKind::File);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("state/store.json");

        let store = MemoryStore::new();
        let id = store.insert_record("/a", EntryKind::File, 7, Some("h"));
        store.save(&file).unwrap();

        let loaded = MemoryStore::load(&file).unwrap();
        let record = loaded.record(Path::new("/a")).unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.content_hash.as_deref(), Some("h"));

        // Fresh identifiers continue after the persisted ones
        let next = loaded.insert_record("/b", EntryKind::File, 1, None);
        assert!(next > id);

        let missing = MemoryStore::load(&temp_dir.path().join("none.json")).unwrap();
        assert!(missing.is_empty());
    }
}
