//! Bounded pool of workers turning events into store statements.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::PathError;
use super::event::{EventKind, QueueEvent};
use crate::crawler::DataProvider;
use crate::store::{FileMetadata, ResourceGenerator, ResourceStore, Statement};
use crate::types::{ResourceId, RootId, is_under};

/// Collaborators a worker needs.
#[derive(Clone)]
pub struct WorkContext {
    pub provider: Arc<dyn DataProvider>,
    pub store: Arc<dyn ResourceStore>,
    pub generator: Arc<dyn ResourceGenerator>,
}

/// Where a worker gets the parent directory's identifier from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerHint {
    Known(Option<ResourceId>),
    Lookup(PathBuf),
    NotNeeded,
}

#[derive(Debug)]
pub enum WorkResult {
    Ready(Statement),
    /// The path vanished before it could be described.
    Skipped,
    Failed(PathError),
    Cancelled,
}

#[derive(Debug)]
pub struct WorkOutcome {
    pub task: u64,
    pub event: QueueEvent,
    pub result: WorkResult,
    /// Container identifier fetched from the store, for the caller's cache.
    pub looked_up: Option<(PathBuf, Option<ResourceId>)>,
}

struct InFlight {
    task: u64,
    root: RootId,
    source: Option<PathBuf>,
    cancel: CancellationToken,
}

impl InFlight {
    fn matches(&self, target: &Path, pred: impl Fn(&Path) -> bool) -> bool {
        pred(target) || self.source.as_deref().is_some_and(pred)
    }
}

pub struct WorkPool {
    capacity: usize,
    ctx: WorkContext,
    in_flight: HashMap<PathBuf, InFlight>,
    next_task: u64,
    outcomes: mpsc::UnboundedSender<WorkOutcome>,
    shutdown: CancellationToken,
}

impl WorkPool {
    pub fn new(
        capacity: usize,
        ctx: WorkContext,
        outcomes: mpsc::UnboundedSender<WorkOutcome>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            capacity: capacity.max(1),
            ctx,
            in_flight: HashMap::new(),
            next_task: 0,
            outcomes,
            shutdown,
        }
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.in_flight.len() >= self.capacity
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.in_flight.contains_key(path)
    }

    /// Start describing `event` on a worker task.
    pub fn spawn(&mut self, event: QueueEvent, hint: ContainerHint) -> u64 {
        self.next_task += 1;
        let task = self.next_task;
        let cancel = self.shutdown.child_token();

        self.in_flight.insert(
            event.path.clone(),
            InFlight {
                task,
                root: event.root,
                source: event.source().map(Path::to_path_buf),
                cancel: cancel.clone(),
            },
        );

        let ctx = self.ctx.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let (result, looked_up) = describe(&ctx, &event, hint, &cancel).await;
            let _ = outcomes.send(WorkOutcome {
                task,
                event,
                result,
                looked_up,
            });
        });
        task
    }

    /// Release the slot held by `task`. Returns false for unknown tasks.
    pub fn complete(&mut self, path: &Path, task: u64) -> bool {
        match self.in_flight.get(path) {
            Some(entry) if entry.task == task => {
                self.in_flight.remove(path);
                true
            }
            _ => false,
        }
    }

    /// Cancel every task touching a path at or under `path`.
    ///
    /// Slots stay taken until the cancelled task reports back.
    pub fn cancel_under(&self, path: &Path) -> usize {
        self.cancel_where(|target, entry| entry.matches(target, |p| p.starts_with(path)))
    }

    /// Cancel every task touching a path strictly under `path`.
    pub fn cancel_strictly_under(&self, path: &Path) -> usize {
        self.cancel_where(|target, entry| entry.matches(target, |p| is_under(p, path)))
    }

    pub fn cancel_root(&self, root: RootId) -> usize {
        self.cancel_where(|_, entry| entry.root == root)
    }

    fn cancel_where(&self, pred: impl Fn(&Path, &InFlight) -> bool) -> usize {
        let mut count = 0;
        for (target, entry) in &self.in_flight {
            if pred(target, entry) && !entry.cancel.is_cancelled() {
                entry.cancel.cancel();
                count += 1;
            }
        }
        count
    }
}

async fn describe(
    ctx: &WorkContext,
    event: &QueueEvent,
    hint: ContainerHint,
    cancel: &CancellationToken,
) -> (WorkResult, Option<(PathBuf, Option<ResourceId>)>) {
    if cancel.is_cancelled() {
        return (WorkResult::Cancelled, None);
    }

    let attributes_only = match &event.kind {
        EventKind::Deleted => {
            let stmt = ctx.generator.generate_delete(&event.path, event.is_dir);
            return (WorkResult::Ready(stmt), None);
        }
        EventKind::Moved { source } => {
            let stmt = ctx.generator.generate_move(source, &event.path, event.is_dir);
            return (WorkResult::Ready(stmt), None);
        }
        EventKind::Created => false,
        EventKind::Updated { attributes_only } => *attributes_only,
    };

    let entry = match event.metadata {
        Some(metadata) => metadata,
        None => {
            let queried = tokio::select! {
                _ = cancel.cancelled() => return (WorkResult::Cancelled, None),
                queried = ctx.provider.query_info(&event.path) => queried,
            };
            match queried {
                Ok(metadata) => metadata,
                Err(e) if e.is_not_found() => return (WorkResult::Skipped, None),
                Err(e) if e.is_cancelled() => return (WorkResult::Cancelled, None),
                Err(e) => {
                    return (
                        WorkResult::Failed(PathError::Metadata {
                            path: event.path.clone(),
                            reason: e.to_string(),
                        }),
                        None,
                    );
                }
            }
        }
    };

    let (container, looked_up) = match hint {
        ContainerHint::Known(id) => (id, None),
        ContainerHint::NotNeeded => (None, None),
        ContainerHint::Lookup(parent) => {
            let found = tokio::select! {
                _ = cancel.cancelled() => return (WorkResult::Cancelled, None),
                found = ctx.store.lookup_identifier(&parent) => found,
            };
            match found {
                Ok(id) => (id, Some((parent, id))),
                Err(e) if e.is_cancelled() => return (WorkResult::Cancelled, None),
                Err(e) => {
                    return (
                        WorkResult::Failed(PathError::Lookup {
                            path: event.path.clone(),
                            reason: e.to_string(),
                        }),
                        None,
                    );
                }
            }
        }
    };

    if cancel.is_cancelled() {
        return (WorkResult::Cancelled, looked_up);
    }

    let metadata = FileMetadata {
        entry,
        container,
        attributes_only,
    };
    match ctx
        .generator
        .generate_create_or_update(&event.path, &metadata)
    {
        Ok(stmt) => (WorkResult::Ready(stmt), looked_up),
        Err(e) => (
            WorkResult::Failed(PathError::Generate {
                path: event.path.clone(),
                reason: e.to_string(),
            }),
            looked_up,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::LocalProvider;
    use crate::store::{DefaultGenerator, MemoryStore};
    use crate::types::{EntryKind, EntryMetadata};
    use std::time::Duration;
    use tempfile::TempDir;

    fn root() -> RootId {
        RootId::new(1).unwrap()
    }

    fn pool(
        capacity: usize,
        store: Arc<MemoryStore>,
    ) -> (WorkPool, mpsc::UnboundedReceiver<WorkOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = WorkContext {
            provider: Arc::new(LocalProvider::new()),
            store,
            generator: Arc::new(DefaultGenerator::new()),
        };
        (WorkPool::new(capacity, ctx, tx, CancellationToken::new()), rx)
    }

    #[tokio::test]
    async fn test_create_reads_disk_and_looks_up_container() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        std::fs::write(&file, "hello").unwrap();

        let store = Arc::new(MemoryStore::new());
        let parent_id = store.insert_record(temp_dir.path(), EntryKind::Directory, 1, None);
        let (mut pool, mut rx) = pool(2, store);

        let task = pool.spawn(
            QueueEvent::created(root(), &file, false),
            ContainerHint::Lookup(temp_dir.path().to_path_buf()),
        );
        assert!(pool.contains(&file));

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.task, task);
        assert_eq!(
            outcome.looked_up,
            Some((temp_dir.path().to_path_buf(), Some(parent_id)))
        );
        match outcome.result {
            WorkResult::Ready(Statement::Upsert {
                size, container, ..
            }) => {
                assert_eq!(size, 5);
                assert_eq!(container, Some(parent_id));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(pool.complete(&file, task));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_path_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (mut pool, mut rx) = pool(1, Arc::new(MemoryStore::new()));
        pool.spawn(
            QueueEvent::updated(root(), temp_dir.path().join("gone"), false),
            ContainerHint::Known(None),
        );
        assert!(pool.is_full());
        assert!(matches!(rx.recv().await.unwrap().result, WorkResult::Skipped));
    }

    #[tokio::test]
    async fn test_crawl_metadata_skips_disk() {
        let (mut pool, mut rx) = pool(1, Arc::new(MemoryStore::new()));
        pool.spawn(
            QueueEvent::created(root(), "/not/on/disk", false)
                .with_metadata(EntryMetadata::file(9, 3)),
            ContainerHint::Known(ResourceId::new(4)),
        );
        match rx.recv().await.unwrap().result {
            WorkResult::Ready(Statement::Upsert { mtime, container, .. }) => {
                assert_eq!(mtime, 9);
                assert_eq!(container, ResourceId::new(4));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_under_stops_lookup() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_secs(30)));
        let (mut pool, mut rx) = pool(4, store);
        pool.spawn(
            QueueEvent::created(root(), "/r/d/f", false).with_metadata(EntryMetadata::file(1, 1)),
            ContainerHint::Lookup("/r/d".into()),
        );
        pool.spawn(
            QueueEvent::deleted(root(), "/other", false),
            ContainerHint::NotNeeded,
        );

        assert_eq!(pool.cancel_under(Path::new("/r/d")), 1);
        // Cancelling again reports nothing new
        assert_eq!(pool.cancel_under(Path::new("/r/d")), 0);

        let mut results = Vec::new();
        for _ in 0..2 {
            let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            results.push((outcome.event.path.clone(), outcome.result));
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        assert!(matches!(results[0].1, WorkResult::Ready(Statement::Delete { .. })));
        assert!(matches!(results[1].1, WorkResult::Cancelled));
    }
}
