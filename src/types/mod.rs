use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

/// Identifier the resource store assigns to an indexed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(NonZeroU64);

/// Identifier of a registered indexing root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RootId(NonZeroU64);

impl ResourceId {
    pub const MIN: ResourceId = ResourceId(NonZeroU64::MIN);

    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    pub fn value(&self) -> u64 {
        self.0.get()
    }
}

impl RootId {
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    pub fn value(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:fsindexd:{}", self.0)
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root#{}", self.0)
    }
}

/// Kind of a filesystem entry as seen by the provider or the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }

    pub fn from_is_dir(is_dir: bool) -> Self {
        if is_dir {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }
}

/// Raw attributes of an entry obtained during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: i64,
    pub size: u64,
}

impl EntryMetadata {
    pub fn new(kind: EntryKind, mtime: i64, size: u64) -> Self {
        Self { kind, mtime, size }
    }

    pub fn directory(mtime: i64) -> Self {
        Self::new(EntryKind::Directory, mtime, 0)
    }

    pub fn file(mtime: i64, size: u64) -> Self {
        Self::new(EntryKind::File, mtime, size)
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Build metadata from `std::fs::Metadata` without following symlinks.
    pub fn from_fs(meta: &std::fs::Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Self {
            kind,
            mtime,
            size: if kind.is_dir() { 0 } else { meta.len() },
        }
    }
}

/// Scheduling priority inherited from the owning root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Roots flagged `priority` are dispatched first.
    High,
    #[default]
    Normal,
}

/// True when `path` equals `ancestor` or lies somewhere below it.
pub fn is_at_or_under(path: &Path, ancestor: &Path) -> bool {
    path.starts_with(ancestor)
}

/// True when `path` lies strictly below `ancestor`.
pub fn is_under(path: &Path, ancestor: &Path) -> bool {
    path != ancestor && path.starts_with(ancestor)
}

/// Re-root `path` from `from` onto `to`. Returns `None` when `path` is not under `from`.
pub fn rebase(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    path.strip_prefix(from).ok().map(|rest| {
        if rest.as_os_str().is_empty() {
            to.to_path_buf()
        } else {
            to.join(rest)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_relations() {
        let root = Path::new("/docs");
        assert!(is_at_or_under(Path::new("/docs"), root));
        assert!(is_at_or_under(Path::new("/docs/a/b.txt"), root));
        assert!(!is_at_or_under(Path::new("/docsx/a"), root));

        assert!(!is_under(Path::new("/docs"), root));
        assert!(is_under(Path::new("/docs/a"), root));
    }

    #[test]
    fn test_rebase() {
        let moved = rebase(Path::new("/a/b/c.txt"), Path::new("/a/b"), Path::new("/x"));
        assert_eq!(moved, Some(PathBuf::from("/x/c.txt")));

        let same = rebase(Path::new("/a/b"), Path::new("/a/b"), Path::new("/x"));
        assert_eq!(same, Some(PathBuf::from("/x")));

        assert_eq!(rebase(Path::new("/z"), Path::new("/a"), Path::new("/x")), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High < Priority::Normal);
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
