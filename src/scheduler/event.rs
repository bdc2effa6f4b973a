//! Scheduled events and the pairwise coalescing table.

use std::path::{Path, PathBuf};

use crate::types::{EntryMetadata, Priority, RootId, is_under};

/// What happened to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated { attributes_only: bool },
    Deleted,
    /// The path now lives at the event's target; `source` is where it was.
    Moved { source: PathBuf },
}

/// A unit of scheduled work for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEvent {
    pub kind: EventKind,
    /// Target path. For moves, the destination.
    pub path: PathBuf,
    pub is_dir: bool,
    pub root: RootId,
    pub priority: Priority,
    /// Attributes already known from a crawl; monitor events leave this empty.
    pub metadata: Option<EntryMetadata>,
}

impl QueueEvent {
    fn new(kind: EventKind, root: RootId, path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            kind,
            path: path.into(),
            is_dir,
            root,
            priority: Priority::Normal,
            metadata: None,
        }
    }

    pub fn created(root: RootId, path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self::new(EventKind::Created, root, path, is_dir)
    }

    pub fn updated(root: RootId, path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self::new(
            EventKind::Updated {
                attributes_only: false,
            },
            root,
            path,
            is_dir,
        )
    }

    pub fn attributes_updated(root: RootId, path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self::new(
            EventKind::Updated {
                attributes_only: true,
            },
            root,
            path,
            is_dir,
        )
    }

    pub fn deleted(root: RootId, path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self::new(EventKind::Deleted, root, path, is_dir)
    }

    pub fn moved(
        root: RootId,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        is_dir: bool,
    ) -> Self {
        Self::new(
            EventKind::Moved {
                source: source.into(),
            },
            root,
            target,
            is_dir,
        )
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn source(&self) -> Option<&Path> {
        match &self.kind {
            EventKind::Moved { source } => Some(source),
            _ => None,
        }
    }

    /// Every path this event reads or writes in the store.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.source())
    }

    pub fn touches(&self, path: &Path) -> bool {
        self.paths().any(|p| p == path)
    }

    /// True when any touched path is at or under `ancestor`.
    pub fn is_at_or_under(&self, ancestor: &Path) -> bool {
        self.paths().any(|p| p.starts_with(ancestor))
    }

    /// Deletes and moves of directories act on whole subtrees.
    pub fn is_recursive(&self) -> bool {
        self.is_dir && matches!(self.kind, EventKind::Deleted | EventKind::Moved { .. })
    }

    pub fn label(&self) -> &'static str {
        match self.kind {
            EventKind::Created => "created",
            EventKind::Updated {
                attributes_only: false,
            } => "updated",
            EventKind::Updated {
                attributes_only: true,
            } => "attributes-updated",
            EventKind::Deleted => "deleted",
            EventKind::Moved { .. } => "moved",
        }
    }

    /// Re-home the parts of this event that live under `from` onto `to`.
    pub(crate) fn rebase(&mut self, from: &Path, to: &Path) {
        if is_under(&self.path, from) {
            if let Some(path) = crate::types::rebase(&self.path, from, to) {
                self.path = path;
            }
        }
        if let EventKind::Moved { source } = &mut self.kind {
            if is_under(source, from) {
                if let Some(rebased) = crate::types::rebase(source, from, to) {
                    *source = rebased;
                }
            }
        }
    }
}

impl std::fmt::Display for QueueEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            EventKind::Moved { source } => write!(
                f,
                "moved({} -> {})",
                source.display(),
                self.path.display()
            ),
            _ => write!(f, "{}({})", self.label(), self.path.display()),
        }
    }
}

/// Result of comparing a newly arriving event with the queued one it follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coalesced {
    /// Both collapse into this event, which takes the queued one's place.
    Merge(QueueEvent),
    /// Both cancel out.
    Annul,
    /// Both stay, in arrival order.
    Separate,
}

/// Apply the coalescing table to `queued` followed by `incoming`.
///
/// For an incoming move, `queued` is the pending event whose target is the
/// move's source; otherwise it shares the incoming event's target.
pub fn coalesce(queued: &QueueEvent, incoming: &QueueEvent) -> Coalesced {
    use EventKind::*;

    match (&queued.kind, &incoming.kind) {
        (Moved { source: first }, Moved { .. }) => {
            if *first == incoming.path {
                Coalesced::Annul
            } else {
                Coalesced::Merge(QueueEvent {
                    kind: Moved {
                        source: first.clone(),
                    },
                    ..incoming.clone()
                })
            }
        }
        (Created, Moved { .. }) => Coalesced::Merge(QueueEvent {
            kind: Created,
            metadata: queued.metadata,
            ..incoming.clone()
        }),
        (_, Moved { .. }) => Coalesced::Separate,

        (Created, Created | Updated { .. }) => Coalesced::Merge(QueueEvent {
            kind: Created,
            metadata: incoming.metadata.or(queued.metadata),
            ..incoming.clone()
        }),
        (Created, Deleted) => Coalesced::Annul,

        (Updated { attributes_only: a }, Updated { attributes_only: b }) => {
            Coalesced::Merge(QueueEvent {
                kind: Updated {
                    attributes_only: *a && *b,
                },
                metadata: incoming.metadata.or(queued.metadata),
                ..incoming.clone()
            })
        }
        (Updated { .. }, Created) => Coalesced::Merge(QueueEvent {
            kind: Updated {
                attributes_only: false,
            },
            ..incoming.clone()
        }),
        (Updated { .. }, Deleted) => Coalesced::Merge(incoming.clone()),

        (Deleted, Deleted) => Coalesced::Merge(QueueEvent {
            is_dir: queued.is_dir || incoming.is_dir,
            ..incoming.clone()
        }),

        (Moved { source }, Deleted) => Coalesced::Merge(QueueEvent {
            kind: Deleted,
            path: source.clone(),
            ..incoming.clone()
        }),

        _ => Coalesced::Separate,
    }
}
