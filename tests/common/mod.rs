//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fsindexd::config::Settings;
use fsindexd::notifier::{ChangeMonitor, MonitorError, MonitorEvent, MonitorParts, WatchSet};
use fsindexd::scheduler::SchedulerHandle;
use fsindexd::store::{MemoryStore, ResourceStore, Statement, StoreError, StoreRecord, StoreResult};
use fsindexd::{Miner, ResourceId};

/// Monitor double: records watches, events are injected by the test.
pub struct FakeMonitor {
    watched: Arc<Mutex<WatchSet>>,
}

impl ChangeMonitor for FakeMonitor {
    fn add(&mut self, dir: &Path) -> Result<(), MonitorError> {
        self.watched.lock().insert(dir);
        Ok(())
    }

    fn remove(&mut self, dir: &Path) -> bool {
        self.watched.lock().remove(dir)
    }

    fn remove_recursive(&mut self, dir: &Path) -> usize {
        self.watched.lock().take_subtree(dir).len()
    }

    fn is_watched(&self, dir: &Path) -> bool {
        self.watched.lock().contains(dir)
    }

    fn watched_count(&self) -> usize {
        self.watched.lock().len()
    }
}

/// Test-side view of a [`FakeMonitor`].
#[derive(Clone)]
pub struct MonitorProbe {
    pub events: mpsc::Sender<MonitorEvent>,
    watched: Arc<Mutex<WatchSet>>,
}

impl MonitorProbe {
    pub async fn send(&self, event: MonitorEvent) {
        self.events.send(event).await.unwrap();
    }

    pub fn is_watched(&self, dir: &Path) -> bool {
        self.watched.lock().contains(dir)
    }
}

pub fn fake_monitor() -> (MonitorParts, MonitorProbe) {
    let watched = Arc::new(Mutex::new(WatchSet::new()));
    let (tx, rx) = mpsc::channel(64);
    let parts = MonitorParts {
        monitor: Box::new(FakeMonitor {
            watched: Arc::clone(&watched),
        }),
        events: rx,
    };
    (
        parts,
        MonitorProbe {
            events: tx,
            watched,
        },
    )
}

pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.indexing.work_pool_size = 4;
    settings.indexing.writeback_batch_size = 8;
    settings.indexing.event_channel_size = 32;
    settings
}

pub fn miner_with(store: Arc<dyn ResourceStore>) -> Miner {
    Miner::builder()
        .settings(settings())
        .store(store)
        .build()
        .unwrap()
}

pub fn watching_miner(store: Arc<dyn ResourceStore>) -> (Miner, MonitorProbe) {
    let (parts, probe) = fake_monitor();
    let miner = Miner::builder()
        .settings(settings())
        .store(store)
        .monitor(parts)
        .build()
        .unwrap();
    (miner, probe)
}

pub fn disk_mtime(path: &Path) -> i64 {
    let meta = std::fs::symlink_metadata(path).unwrap();
    fsindexd::EntryMetadata::from_fs(&meta).mtime
}

/// Wait until the scheduler holds no work for a few consecutive polls.
pub async fn quiesce(scheduler: &SchedulerHandle) {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut calm = 0;
        while calm < 3 {
            scheduler.flush().await.unwrap();
            let stats = scheduler.stats().await.unwrap();
            if stats.queued + stats.in_flight + stats.buffered + stats.flushing == 0 {
                calm += 1;
            } else {
                calm = 0;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("scheduler did not settle");
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Store wrapper failing snapshot queries for chosen roots and counting
/// concurrent writes per path.
pub struct ProbeStore {
    pub inner: Arc<MemoryStore>,
    broken_roots: Mutex<HashSet<PathBuf>>,
    writing: Mutex<HashSet<PathBuf>>,
    overlaps: AtomicUsize,
    write_delay: Option<Duration>,
}

impl ProbeStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            broken_roots: Mutex::new(HashSet::new()),
            writing: Mutex::new(HashSet::new()),
            overlaps: AtomicUsize::new(0),
            write_delay: None,
        }
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn break_root(&self, root: impl Into<PathBuf>) {
        self.broken_roots.lock().insert(root.into());
    }

    /// Times a path was written while a write for it was still outstanding.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for ProbeStore {
    async fn query_root_snapshot(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<StoreRecord>> {
        if self.broken_roots.lock().contains(root) {
            return Err(StoreError::Query {
                root: root.to_path_buf(),
                reason: "index corrupted".to_string(),
            });
        }
        self.inner.query_root_snapshot(root, cancel).await
    }

    async fn lookup_identifier(&self, path: &Path) -> StoreResult<Option<ResourceId>> {
        self.inner.lookup_identifier(path).await
    }

    async fn apply_batch(
        &self,
        statements: &[Statement],
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<StoreResult<()>>> {
        {
            let mut writing = self.writing.lock();
            for statement in statements {
                if !writing.insert(statement.path().to_path_buf()) {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.inner.apply_batch(statements, cancel).await;
        {
            let mut writing = self.writing.lock();
            for statement in statements {
                writing.remove(statement.path());
            }
        }
        result
    }
}
