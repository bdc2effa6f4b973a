//! Live change monitoring.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::error::MonitorError;

/// A change reported by a monitor, already in pipeline vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Created { path: PathBuf, is_dir: bool },
    Updated { path: PathBuf, is_dir: bool },
    AttributesUpdated { path: PathBuf, is_dir: bool },
    Deleted { path: PathBuf, is_dir: bool },
    Moved { from: PathBuf, to: PathBuf, is_dir: bool },
}

impl MonitorEvent {
    /// The path the event leaves behind (the destination of a move).
    pub fn path(&self) -> &Path {
        match self {
            MonitorEvent::Created { path, .. }
            | MonitorEvent::Updated { path, .. }
            | MonitorEvent::AttributesUpdated { path, .. }
            | MonitorEvent::Deleted { path, .. } => path,
            MonitorEvent::Moved { to, .. } => to,
        }
    }
}

/// Per-directory watch registry.
///
/// Watches are non-recursive: every monitored directory is added on its own.
pub trait ChangeMonitor: Send {
    fn add(&mut self, dir: &Path) -> Result<(), MonitorError>;

    /// Drop the watch on `dir`. Returns false when it was not watched.
    fn remove(&mut self, dir: &Path) -> bool;

    /// Drop every watch at or under `dir`. Returns the number removed.
    fn remove_recursive(&mut self, dir: &Path) -> usize;

    fn is_watched(&self, dir: &Path) -> bool;

    fn watched_count(&self) -> usize;
}

/// Set of watched directories, ordered so subtrees are contiguous.
#[derive(Debug, Default, Clone)]
pub struct WatchSet {
    dirs: BTreeSet<PathBuf>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dir: &Path) -> bool {
        self.dirs.insert(dir.to_path_buf())
    }

    pub fn remove(&mut self, dir: &Path) -> bool {
        self.dirs.remove(dir)
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.dirs.contains(dir)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Remove and return every directory at or under `dir`.
    pub fn take_subtree(&mut self, dir: &Path) -> Vec<PathBuf> {
        let doomed: Vec<PathBuf> = self
            .dirs
            .range(dir.to_path_buf()..)
            .take_while(|p| p.starts_with(dir))
            .cloned()
            .collect();
        for path in &doomed {
            self.dirs.remove(path);
        }
        doomed
    }
}

/// [`ChangeMonitor`] backed by the platform's native watcher.
pub struct NotifyMonitor {
    watcher: RecommendedWatcher,
    watched: WatchSet,
}

impl NotifyMonitor {
    /// Create a monitor delivering translated events into `events`.
    pub fn new(events: mpsc::Sender<MonitorEvent>) -> Result<Self, MonitorError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for translated in translate(event) {
                    let _ = events.blocking_send(translated);
                }
            }
            Err(e) => tracing::warn!("[monitor] watch error: {e}"),
        })?;

        Ok(Self {
            watcher,
            watched: WatchSet::new(),
        })
    }
}

impl ChangeMonitor for NotifyMonitor {
    fn add(&mut self, dir: &Path) -> Result<(), MonitorError> {
        if self.watched.contains(dir) {
            return Ok(());
        }
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| MonitorError::WatchFailed {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;
        self.watched.insert(dir);
        crate::debug_event!("monitor", "watching", "{}", dir.display());
        Ok(())
    }

    fn remove(&mut self, dir: &Path) -> bool {
        if !self.watched.remove(dir) {
            return false;
        }
        // The directory may already be gone, which drops the watch anyway
        let _ = self.watcher.unwatch(dir);
        true
    }

    fn remove_recursive(&mut self, dir: &Path) -> usize {
        let removed = self.watched.take_subtree(dir);
        for path in &removed {
            let _ = self.watcher.unwatch(path);
        }
        removed.len()
    }

    fn is_watched(&self, dir: &Path) -> bool {
        self.watched.contains(dir)
    }

    fn watched_count(&self) -> usize {
        self.watched.len()
    }
}

/// Map a raw notify event onto monitor events.
pub fn translate(event: Event) -> Vec<MonitorEvent> {
    let is_dir = |p: &Path| p.is_dir();
    let mut paths = event.paths.into_iter();

    match event.kind {
        EventKind::Create(kind) => paths
            .map(|path| {
                let is_dir = matches!(kind, notify::event::CreateKind::Folder) || is_dir(&path);
                MonitorEvent::Created { path, is_dir }
            })
            .collect(),

        EventKind::Remove(kind) => paths
            .map(|path| MonitorEvent::Deleted {
                path,
                is_dir: matches!(kind, notify::event::RemoveKind::Folder),
            })
            .collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => {
                    let is_dir = is_dir(&to);
                    vec![MonitorEvent::Moved { from, to, is_dir }]
                }
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .map(|path| MonitorEvent::Deleted {
                path,
                is_dir: false,
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .map(|path| {
                if path.exists() {
                    let is_dir = is_dir(&path);
                    MonitorEvent::Created { path, is_dir }
                } else {
                    MonitorEvent::Deleted {
                        path,
                        is_dir: false,
                    }
                }
            })
            .collect(),

        EventKind::Modify(ModifyKind::Metadata(_)) => paths
            .map(|path| {
                let is_dir = is_dir(&path);
                MonitorEvent::AttributesUpdated { path, is_dir }
            })
            .collect(),
        EventKind::Modify(_) => paths
            .map(|path| {
                let is_dir = is_dir(&path);
                MonitorEvent::Updated { path, is_dir }
            })
            .collect(),

        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}
