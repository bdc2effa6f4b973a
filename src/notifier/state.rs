//! Per-path reconciliation state for one root pass.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::crawler::CrawlNode;
use crate::store::StoreRecord;
use crate::types::{EntryMetadata, ResourceId};

/// Outcome of comparing disk and store for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    None,
    Create,
    Update,
    Delete,
}

/// Which differences count during reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub check_mtime: bool,
    pub check_deleted: bool,
    /// Hash stored resources must carry to be considered current.
    pub expected_hash: Option<String>,
}

/// Disk truth against store truth for a single path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileState {
    pub in_disk: bool,
    pub in_store: bool,
    pub is_dir_in_disk: bool,
    pub is_dir_in_store: bool,
    pub disk_mtime: i64,
    pub store_mtime: i64,
    pub store_content_hash: Option<String>,
    pub disk_metadata: Option<EntryMetadata>,
    pub store_id: Option<ResourceId>,
}

impl FileState {
    pub fn state(&self, policy: &ReconcilePolicy) -> ReconcileState {
        match (self.in_disk, self.in_store) {
            (true, false) => ReconcileState::Create,
            (false, true) if policy.check_deleted => ReconcileState::Delete,
            (true, true) => {
                let kind_changed = self.is_dir_in_disk != self.is_dir_in_store;
                let mtime_changed = policy.check_mtime && self.disk_mtime != self.store_mtime;
                let hash_changed = policy
                    .expected_hash
                    .as_deref()
                    .is_some_and(|hash| self.store_content_hash.as_deref() != Some(hash));
                if kind_changed || mtime_changed || hash_changed {
                    ReconcileState::Update
                } else {
                    ReconcileState::None
                }
            }
            _ => ReconcileState::None,
        }
    }

    /// Directory-ness that matters for the emitted event.
    pub fn is_dir(&self) -> bool {
        if self.in_disk {
            self.is_dir_in_disk
        } else {
            self.is_dir_in_store
        }
    }
}

/// Path-keyed reconciliation states, oldest first.
#[derive(Debug, Default)]
pub struct FileStateMap {
    entries: IndexMap<PathBuf, FileState>,
}

impl FileStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_store(&mut self, record: &StoreRecord) {
        let state = self.entries.entry(record.path.clone()).or_default();
        state.in_store = true;
        state.is_dir_in_store = record.is_dir();
        state.store_mtime = record.mtime;
        state.store_content_hash = record.content_hash.clone();
        state.store_id = Some(record.id);
    }

    pub fn record_disk(&mut self, node: &CrawlNode) {
        let state = self.entries.entry(node.path.clone()).or_default();
        state.in_disk = true;
        state.is_dir_in_disk = node.is_dir();
        state.disk_mtime = node.metadata.mtime;
        state.disk_metadata = Some(node.metadata);
    }

    pub fn get(&self, path: &Path) -> Option<&FileState> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Retire every entry, oldest first, keeping the ones that need an event.
    pub fn drain_changes(
        &mut self,
        policy: &ReconcilePolicy,
    ) -> Vec<(PathBuf, FileState, ReconcileState)> {
        self.entries
            .drain(..)
            .filter_map(|(path, state)| {
                let verdict = state.state(policy);
                (verdict != ReconcileState::None).then_some((path, state, verdict))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryKind;

    fn policy() -> ReconcilePolicy {
        ReconcilePolicy {
            check_mtime: true,
            check_deleted: true,
            expected_hash: None,
        }
    }

    fn both(disk_mtime: i64, store_mtime: i64) -> FileState {
        FileState {
            in_disk: true,
            in_store: true,
            disk_mtime,
            store_mtime,
            ..Default::default()
        }
    }

    #[test]
    fn test_truth_table() {
        let p = policy();
        let disk_only = FileState {
            in_disk: true,
            ..Default::default()
        };
        let store_only = FileState {
            in_store: true,
            ..Default::default()
        };
        assert_eq!(disk_only.state(&p), ReconcileState::Create);
        assert_eq!(store_only.state(&p), ReconcileState::Delete);
        assert_eq!(both(1, 1).state(&p), ReconcileState::None);
        assert_eq!(both(2, 1).state(&p), ReconcileState::Update);
        assert_eq!(FileState::default().state(&p), ReconcileState::None);
    }

    #[test]
    fn test_policy_switches() {
        let lenient = ReconcilePolicy::default();
        assert_eq!(both(2, 1).state(&lenient), ReconcileState::None);
        let store_only = FileState {
            in_store: true,
            ..Default::default()
        };
        assert_eq!(store_only.state(&lenient), ReconcileState::None);

        // Kind changes always count
        let retyped = FileState {
            is_dir_in_disk: true,
            ..both(1, 1)
        };
        assert_eq!(retyped.state(&lenient), ReconcileState::Update);
    }

    #[test]
    fn test_content_hash_mismatch() {
        let p = ReconcilePolicy {
            expected_hash: Some("v2".into()),
            ..policy()
        };
        let stale = FileState {
            store_content_hash: Some("v1".into()),
            ..both(1, 1)
        };
        let missing = both(1, 1);
        let current = FileState {
            store_content_hash: Some("v2".into()),
            ..both(1, 1)
        };
        assert_eq!(stale.state(&p), ReconcileState::Update);
        assert_eq!(missing.state(&p), ReconcileState::Update);
        assert_eq!(current.state(&p), ReconcileState::None);
    }

    #[test]
    fn test_map_merges_and_drains_in_order() {
        let mut map = FileStateMap::new();
        map.record_store(&StoreRecord {
            path: "/docs/a.txt".into(),
            kind: EntryKind::File,
            mtime: 100,
            content_hash: None,
            id: ResourceId::new(1).unwrap(),
        });
        map.record_disk(&CrawlNode {
            path: "/docs/a.txt".into(),
            metadata: EntryMetadata::file(200, 1),
            parent: None,
            depth: 1,
        });
        map.record_disk(&CrawlNode {
            path: "/docs/b.txt".into(),
            metadata: EntryMetadata::file(50, 1),
            parent: None,
            depth: 1,
        });
        assert_eq!(map.len(), 2);

        let changes: Vec<_> = map
            .drain_changes(&policy())
            .into_iter()
            .map(|(path, _, verdict)| (path, verdict))
            .collect();
        assert_eq!(
            changes,
            vec![
                (PathBuf::from("/docs/a.txt"), ReconcileState::Update),
                (PathBuf::from("/docs/b.txt"), ReconcileState::Create),
            ]
        );
        assert!(map.is_empty());
    }
}
