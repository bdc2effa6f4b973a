//! Indexing roots: configured directories, their flags, and the pending list.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use bitflags::bitflags;

use crate::types::{Priority, RootId};

bitflags! {
    /// Per-root behavior switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RootFlags: u32 {
        /// Descend into subdirectories.
        const RECURSE = 1 << 0;
        /// Install live change monitors on crawled directories.
        const MONITOR = 1 << 1;
        /// Compare modification times of entries known on both sides.
        const CHECK_MTIME = 1 << 2;
        /// Schedule this root's work ahead of normal roots.
        const PRIORITY = 1 << 3;
        /// Keep store content when the root is removed or ignored.
        const PRESERVE = 1 << 4;
        /// Do not crawl; drop store content unless `PRESERVE`.
        const IGNORE = 1 << 5;
        /// Delete store entries that are gone from disk.
        const CHECK_DELETED = 1 << 6;
    }
}

impl Default for RootFlags {
    fn default() -> Self {
        RootFlags::RECURSE | RootFlags::MONITOR | RootFlags::CHECK_MTIME | RootFlags::CHECK_DELETED
    }
}

/// A directory configured for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    pub path: PathBuf,
    pub flags: RootFlags,
}

impl Root {
    pub fn new(path: impl Into<PathBuf>, flags: RootFlags) -> Self {
        Self {
            path: path.into(),
            flags,
        }
    }

    pub fn priority(&self) -> Priority {
        if self.flags.contains(RootFlags::PRIORITY) {
            Priority::High
        } else {
            Priority::Normal
        }
    }

    pub fn is_recursive(&self) -> bool {
        self.flags.contains(RootFlags::RECURSE)
    }

    pub fn is_monitored(&self) -> bool {
        self.flags.contains(RootFlags::MONITOR)
    }

    pub fn is_ignored(&self) -> bool {
        self.flags.contains(RootFlags::IGNORE)
    }

    pub fn is_preserved(&self) -> bool {
        self.flags.contains(RootFlags::PRESERVE)
    }

    /// Whether `path` falls within this root's reach, honoring `RECURSE`.
    pub fn covers(&self, path: &Path) -> bool {
        if path == self.path {
            return true;
        }
        if self.is_recursive() {
            path.starts_with(&self.path)
        } else {
            path.parent() == Some(self.path.as_path())
        }
    }
}

/// One unit of crawl work waiting in the pending list.
///
/// Either a whole registered root or a subtree discovered at runtime
/// (a directory created under a monitored root), which inherits the
/// owning root's flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRoot {
    pub owner: RootId,
    pub path: PathBuf,
    pub flags: RootFlags,
}

impl PendingRoot {
    pub fn is_subtree(&self, owner_path: &Path) -> bool {
        self.path != owner_path
    }

    pub fn priority(&self) -> Priority {
        if self.flags.contains(RootFlags::PRIORITY) {
            Priority::High
        } else {
            Priority::Normal
        }
    }
}

/// Pending crawl work: priority-flagged entries first, FIFO within a class.
#[derive(Debug, Default)]
pub struct RootQueue {
    high: VecDeque<PendingRoot>,
    normal: VecDeque<PendingRoot>,
}

impl RootQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry`, replacing an entry already queued for the same path.
    pub fn push(&mut self, entry: PendingRoot) {
        self.remove_path(&entry.path);
        match entry.priority() {
            Priority::High => self.high.push_back(entry),
            Priority::Normal => self.normal.push_back(entry),
        }
    }

    /// Put `entry` back at the head of its class (used when processing is interrupted).
    pub fn push_front(&mut self, entry: PendingRoot) {
        self.remove_path(&entry.path);
        match entry.priority() {
            Priority::High => self.high.push_front(entry),
            Priority::Normal => self.normal.push_front(entry),
        }
    }

    pub fn pop(&mut self) -> Option<PendingRoot> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.iter().any(|e| e.path == path)
    }

    /// Remove the entry queued for exactly `path`.
    pub fn remove_path(&mut self, path: &Path) -> Option<PendingRoot> {
        if let Some(pos) = self.high.iter().position(|e| e.path == path) {
            return self.high.remove(pos);
        }
        if let Some(pos) = self.normal.iter().position(|e| e.path == path) {
            return self.normal.remove(pos);
        }
        None
    }

    /// Remove every entry whose path is at or under `path`.
    pub fn remove_under(&mut self, path: &Path) -> usize {
        let before = self.len();
        self.high.retain(|e| !e.path.starts_with(path));
        self.normal.retain(|e| !e.path.starts_with(path));
        before - self.len()
    }

    /// Remove every entry owned by `owner`.
    pub fn remove_owner(&mut self, owner: RootId) -> usize {
        let before = self.len();
        self.high.retain(|e| e.owner != owner);
        self.normal.retain(|e| e.owner != owner);
        before - self.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRoot> {
        self.high.iter().chain(self.normal.iter())
    }
}
