//! Event queue and work scheduler.
//!
//! # Architecture
//!
//! ```text
//! SchedulerHandle ──intake (bounded)──┐
//!                 ──control──────────┐│
//!                                    ▼▼
//!                        Scheduler actor loop (single writer)
//!                          EventQueue  ── coalesce, order
//!                          LruCache    ── container identifiers
//!                             │ pop_ready
//!                             ▼
//!                          WorkPool    ── N workers: event ──> Statement
//!                             │ outcomes
//!                             ▼
//!                          WriteBackBuffer ── batches ──> ResourceStore::apply_batch
//!                             │ reports
//!                             ▼
//!                          notices: RootDrained / PathFailed / Flushed / RescanNeeded
//! ```
//!
//! Queue (busy paths included) and cache are only ever touched by the actor.
//! Workers and flushes report back over channels. While the number of
//! outstanding flushes is at its limit, the intake channel is not polled,
//! so producers block on `push`.

mod error;
mod event;
mod pool;
mod queue;
mod writeback;

pub use error::{PathError, SchedulerError};
pub use event::{Coalesced, EventKind, QueueEvent, coalesce};
pub use pool::{ContainerHint, WorkContext, WorkOutcome, WorkPool, WorkResult};
pub use queue::{EventQueue, PushOutcome, PushResult};
pub use writeback::{FlushReport, PendingWrite, WriteBackBuffer, WriteResult};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::cache::LruCache;
use crate::config::IndexingConfig;
use crate::types::{ResourceId, RootId};

/// Tunables of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub pool_size: usize,
    pub batch_size: usize,
    pub max_concurrent_flushes: usize,
    pub cache_capacity: usize,
    pub channel_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&IndexingConfig::default())
    }
}

impl From<&IndexingConfig> for SchedulerConfig {
    fn from(config: &IndexingConfig) -> Self {
        Self {
            pool_size: config.work_pool_size.max(1),
            batch_size: config.writeback_batch_size.max(1),
            max_concurrent_flushes: config.max_concurrent_flushes.max(1),
            cache_capacity: config.cache_capacity.max(1),
            channel_size: config.event_channel_size.max(1),
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub in_flight: usize,
    pub buffered: usize,
    pub flushing: usize,
    pub flushed: u64,
    pub failed: u64,
    pub coalesced: u64,
    pub cancelled: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Asynchronous reports from the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerNotice {
    /// A sealed root has nothing left queued, in flight or unflushed.
    RootDrained(RootId),
    /// One path's mutation failed. Later events for it proceed normally.
    PathFailed {
        path: PathBuf,
        root: RootId,
        error: PathError,
    },
    /// A batch was acknowledged by the store.
    Flushed { written: usize, failed: usize },
    /// A directory moved out of a superseded subtree before its move ran.
    /// It is queued as created; its contents need a fresh crawl.
    RescanNeeded { root: RootId, path: PathBuf },
}

/// Messages ordered with respect to pushed events.
enum Intake {
    Event(QueueEvent),
    Seal(RootId),
    CancelUnder {
        path: PathBuf,
        reply: oneshot::Sender<usize>,
    },
    PurgeRoot {
        root: RootId,
        reply: oneshot::Sender<usize>,
    },
}

enum Control {
    PrimeCache(Vec<(PathBuf, Option<ResourceId>)>),
    Flush(oneshot::Sender<()>),
    Stats(oneshot::Sender<SchedulerStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable front end of a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    intake: mpsc::Sender<Intake>,
    control: mpsc::UnboundedSender<Control>,
    roots: Arc<RwLock<HashSet<RootId>>>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("roots", &self.roots.read().len())
            .finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    /// Allow events for `root`.
    pub fn register_root(&self, root: RootId) -> Result<(), SchedulerError> {
        if self.roots.write().insert(root) {
            Ok(())
        } else {
            Err(SchedulerError::RootAlreadyRegistered(root))
        }
    }

    pub fn is_registered(&self, root: RootId) -> bool {
        self.roots.read().contains(&root)
    }

    /// Stop accepting events for `root` and drop whatever is still queued for it.
    pub async fn unregister_root(&self, root: RootId) -> Result<usize, SchedulerError> {
        if !self.roots.write().remove(&root) {
            return Err(SchedulerError::UnknownRoot(root));
        }
        self.purge_root(root).await
    }

    /// Queue `event`. Waits while the scheduler applies backpressure.
    pub async fn push(&self, event: QueueEvent) -> Result<(), SchedulerError> {
        if !self.is_registered(event.root) {
            return Err(SchedulerError::UnknownRoot(event.root));
        }
        self.intake
            .send(Intake::Event(event))
            .await
            .map_err(|_| SchedulerError::Closed)
    }

    /// Mark every event of `root` as pushed.
    ///
    /// [`SchedulerNotice::RootDrained`] follows once they are all settled.
    pub async fn seal_root(&self, root: RootId) -> Result<(), SchedulerError> {
        if !self.is_registered(root) {
            return Err(SchedulerError::UnknownRoot(root));
        }
        self.intake
            .send(Intake::Seal(root))
            .await
            .map_err(|_| SchedulerError::Closed)
    }

    /// Drop queued events at or under `path` and cancel matching workers.
    pub async fn cancel_under(&self, path: &Path) -> Result<usize, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.intake
            .send(Intake::CancelUnder {
                path: path.to_path_buf(),
                reply,
            })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Drop queued events of `root` and cancel its workers.
    pub async fn purge_root(&self, root: RootId) -> Result<usize, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.intake
            .send(Intake::PurgeRoot { root, reply })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Seed the container-identifier cache.
    pub fn prime_cache(
        &self,
        entries: Vec<(PathBuf, Option<ResourceId>)>,
    ) -> Result<(), SchedulerError> {
        self.control
            .send(Control::PrimeCache(entries))
            .map_err(|_| SchedulerError::Closed)
    }

    /// Flush the write-back buffer and wait until it is empty.
    pub async fn flush(&self) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(Control::Flush(reply))
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    pub async fn stats(&self) -> Result<SchedulerStats, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(Control::Stats(reply))
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Cancel all work and stop the actor.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(Control::Shutdown(reply))
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }
}

/// The single-writer coordination loop.
pub struct Scheduler {
    queue: EventQueue,
    pool: WorkPool,
    writeback: WriteBackBuffer,
    cache: LruCache<PathBuf, Option<ResourceId>>,
    roots: Arc<RwLock<HashSet<RootId>>>,
    outstanding: HashMap<RootId, usize>,
    sealed: HashSet<RootId>,
    flush_waiters: Vec<oneshot::Sender<()>>,
    notices: mpsc::UnboundedSender<SchedulerNotice>,
    stats: SchedulerStats,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Start the actor on the current tokio runtime.
    pub fn spawn(
        config: SchedulerConfig,
        ctx: WorkContext,
    ) -> (SchedulerHandle, mpsc::UnboundedReceiver<SchedulerNotice>) {
        let (intake_tx, intake_rx) = mpsc::channel(config.channel_size);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let roots = Arc::new(RwLock::new(HashSet::new()));
        let shutdown = CancellationToken::new();
        let store = Arc::clone(&ctx.store);

        let scheduler = Scheduler {
            queue: EventQueue::new(),
            pool: WorkPool::new(config.pool_size, ctx, work_tx, shutdown.clone()),
            writeback: WriteBackBuffer::new(
                store,
                config.batch_size,
                config.max_concurrent_flushes,
                flush_tx,
                shutdown.clone(),
            ),
            cache: LruCache::new(config.cache_capacity),
            roots: Arc::clone(&roots),
            outstanding: HashMap::new(),
            sealed: HashSet::new(),
            flush_waiters: Vec::new(),
            notices: notice_tx,
            stats: SchedulerStats::default(),
            shutdown,
        };

        tokio::spawn(scheduler.run(intake_rx, control_rx, work_rx, flush_rx));

        let handle = SchedulerHandle {
            intake: intake_tx,
            control: control_tx,
            roots,
        };
        (handle, notice_rx)
    }

    async fn run(
        mut self,
        mut intake_rx: mpsc::Receiver<Intake>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut work_rx: mpsc::UnboundedReceiver<WorkOutcome>,
        mut flush_rx: mpsc::UnboundedReceiver<FlushReport>,
    ) {
        crate::debug_event!("scheduler", "started");
        let mut intake_open = true;

        loop {
            let exhausted = self.dispatch();
            let idle = exhausted && (self.pool.is_empty() || !self.queue.is_empty());
            self.flush_if_needed(idle);
            self.answer_flush_waiters();

            let accepting = intake_open && !self.writeback.is_saturated();

            tokio::select! {
                biased;

                control = control_rx.recv() => match control {
                    Some(control) => {
                        if !self.on_control(control) {
                            break;
                        }
                    }
                    None => {
                        self.stop();
                        break;
                    }
                },

                Some(report) = flush_rx.recv() => self.on_flushed(report),

                Some(outcome) = work_rx.recv() => self.on_work_done(outcome),

                message = intake_rx.recv(), if accepting => match message {
                    Some(message) => self.on_intake(message),
                    None => intake_open = false,
                },
            }
        }

        crate::debug_event!("scheduler", "stopped");
    }

    fn stop(&mut self) {
        self.shutdown.cancel();
        let dropped = self.queue.len();
        if dropped > 0 {
            crate::log_event!("scheduler", "shutdown", "{dropped} queued events dropped");
        }
    }

    /// Start every ready event the pool has room for.
    ///
    /// Returns true when dispatch stopped because nothing else was ready.
    fn dispatch(&mut self) -> bool {
        while !self.pool.is_full() {
            match self.queue.pop_ready() {
                Some(event) => self.start(event),
                None => return true,
            }
        }
        false
    }

    fn start(&mut self, event: QueueEvent) {
        let hint = match event.kind {
            EventKind::Created | EventKind::Updated { .. } => match event.path.parent() {
                Some(parent) => match self.cache.get(parent) {
                    Some(id) => ContainerHint::Known(*id),
                    None => ContainerHint::Lookup(parent.to_path_buf()),
                },
                None => ContainerHint::Known(None),
            },
            EventKind::Deleted | EventKind::Moved { .. } => ContainerHint::NotNeeded,
        };

        for path in event.paths() {
            self.queue.mark_busy(path);
        }
        crate::debug_event!("scheduler", "dispatch", "{event}");
        self.pool.spawn(event, hint);
    }

    fn flush_if_needed(&mut self, idle: bool) {
        let requested = !self.flush_waiters.is_empty();
        while !self.writeback.is_empty() && !self.writeback.is_saturated() {
            if !(self.writeback.is_full() || idle || requested) {
                break;
            }
            match self.writeback.flush() {
                Some(batch) => crate::debug_event!("scheduler", "flush", "batch {batch}"),
                None => break,
            }
        }
    }

    fn answer_flush_waiters(&mut self) {
        if self.writeback.is_idle() {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    /// Returns false once the loop should stop.
    fn on_control(&mut self, control: Control) -> bool {
        match control {
            Control::PrimeCache(entries) => {
                let count = entries.len();
                for (path, id) in entries {
                    self.cache.put(path, id);
                }
                crate::debug_event!("scheduler", "cache primed", "{count} entries");
            }
            Control::Flush(reply) => self.flush_waiters.push(reply),
            Control::Stats(reply) => {
                let _ = reply.send(self.snapshot_stats());
            }
            Control::Shutdown(reply) => {
                self.stop();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn on_intake(&mut self, message: Intake) {
        match message {
            Intake::Event(event) => {
                if !self.roots.read().contains(&event.root) {
                    crate::debug_event!("scheduler", "dropped", "{event}: root unregistered");
                    return;
                }
                let root = event.root;
                let mut affected = vec![root];
                self.enqueue(event, &mut affected);
                for root in affected {
                    self.check_drained(root);
                }
            }
            Intake::Seal(root) => {
                if self.roots.read().contains(&root) {
                    self.sealed.insert(root);
                    self.check_drained(root);
                }
            }
            Intake::CancelUnder { path, reply } => {
                let removed = self.queue.remove_under(&path);
                let cancelled = self.pool.cancel_under(&path);
                self.cache.remove_matching(|k| k.starts_with(&path));
                let count = removed.len();
                self.settle_removed(removed);
                crate::debug_event!(
                    "scheduler",
                    "cancelled",
                    "{}: {count} queued, {cancelled} in flight",
                    path.display()
                );
                let _ = reply.send(count);
            }
            Intake::PurgeRoot { root, reply } => {
                // A purge abandons the root's pass, seal included
                self.sealed.remove(&root);
                let removed = self.queue.remove_root(root);
                self.pool.cancel_root(root);
                let count = removed.len();
                self.settle_removed(removed);
                let _ = reply.send(count);
            }
        }
    }

    fn enqueue(&mut self, event: QueueEvent, affected: &mut Vec<RootId>) {
        self.invalidate(&event);
        match &event.kind {
            EventKind::Deleted => {
                self.pool.cancel_under(&event.path);
            }
            EventKind::Moved { .. } if event.is_dir => {
                self.pool.cancel_strictly_under(&event.path);
            }
            _ => {}
        }

        crate::debug_event!("scheduler", "queued", "{event}");
        let result = self.queue.push(event);
        let compensations = result.compensations();
        if let Some(root) = result.inserted {
            *self.outstanding.entry(root).or_default() += 1;
        }
        self.stats.coalesced += result.coalesced.len() as u64;
        for old in &result.coalesced {
            self.release_count(old.root);
            affected.push(old.root);
        }

        self.stats.cancelled += result.purged.len() as u64;
        for purged in &result.purged {
            self.release_count(purged.root);
            affected.push(purged.root);
        }

        for event in compensations {
            if event.is_dir && event.kind == EventKind::Created {
                let _ = self.notices.send(SchedulerNotice::RescanNeeded {
                    root: event.root,
                    path: event.path.clone(),
                });
            }
            self.enqueue(event, affected);
        }
    }

    fn invalidate(&mut self, event: &QueueEvent) {
        for path in event.paths() {
            self.cache.remove(path);
        }
        if event.is_recursive() {
            for path in event.paths() {
                self.cache.remove_matching(|k| k.starts_with(path));
            }
        }
    }

    fn on_work_done(&mut self, outcome: WorkOutcome) {
        let WorkOutcome {
            task,
            event,
            result,
            looked_up,
        } = outcome;
        self.pool.complete(&event.path, task);

        match result {
            WorkResult::Ready(statement) => {
                if let Some((parent, id)) = looked_up {
                    if !self.queue.is_busy(&parent) && !self.queue.contains_path(&parent) {
                        self.cache.put(parent, id);
                    }
                }
                self.writeback.push(PendingWrite { event, statement });
            }
            WorkResult::Skipped => {
                crate::debug_event!("scheduler", "skipped", "{event}: path vanished");
                self.settle(&event);
            }
            WorkResult::Failed(error) => {
                self.stats.failed += 1;
                tracing::warn!("[scheduler] {event} failed: {error}");
                let _ = self.notices.send(SchedulerNotice::PathFailed {
                    path: event.path.clone(),
                    root: event.root,
                    error,
                });
                self.settle(&event);
            }
            WorkResult::Cancelled => {
                self.stats.cancelled += 1;
                crate::debug_event!("scheduler", "cancelled", "{event}");
                self.settle(&event);
            }
        }
    }

    fn on_flushed(&mut self, report: FlushReport) {
        let mut written = 0;
        let mut failed = 0;
        for (write, verdict) in self.writeback.complete(report) {
            match verdict {
                WriteResult::Written => {
                    written += 1;
                    self.stats.flushed += 1;
                    crate::debug_event!("scheduler", "written", "{}", write.statement.render());
                }
                WriteResult::Failed(error) => {
                    failed += 1;
                    self.stats.failed += 1;
                    tracing::warn!("[scheduler] {} not written: {error}", write.event);
                    let _ = self.notices.send(SchedulerNotice::PathFailed {
                        path: write.event.path.clone(),
                        root: write.event.root,
                        error,
                    });
                }
                WriteResult::Cancelled => {
                    self.stats.cancelled += 1;
                }
            }
            self.settle(&write.event);
        }

        if written + failed > 0 {
            let _ = self
                .notices
                .send(SchedulerNotice::Flushed { written, failed });
        }
    }

    /// An event left the pipeline: free its paths and its root's count.
    fn settle(&mut self, event: &QueueEvent) {
        for path in event.paths() {
            self.queue.release(path);
        }
        self.release_count(event.root);
        self.check_drained(event.root);
    }

    fn settle_removed(&mut self, removed: Vec<QueueEvent>) {
        self.stats.cancelled += removed.len() as u64;
        let mut roots = HashSet::new();
        for event in removed {
            self.release_count(event.root);
            roots.insert(event.root);
        }
        for root in roots {
            self.check_drained(root);
        }
    }

    fn release_count(&mut self, root: RootId) {
        if let Some(count) = self.outstanding.get_mut(&root) {
            *count = count.saturating_sub(1);
        }
    }

    fn check_drained(&mut self, root: RootId) {
        let pending = self.outstanding.get(&root).copied().unwrap_or(0);
        if pending == 0 && self.sealed.remove(&root) {
            self.outstanding.remove(&root);
            crate::debug_event!("scheduler", "drained", "{root}");
            let _ = self.notices.send(SchedulerNotice::RootDrained(root));
        }
    }

    fn snapshot_stats(&self) -> SchedulerStats {
        let (cache_hits, cache_misses) = self.cache.hit_stats();
        SchedulerStats {
            queued: self.queue.len(),
            in_flight: self.pool.len(),
            buffered: self.writeback.len(),
            flushing: self.writeback.in_flight(),
            cache_hits,
            cache_misses,
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::LocalProvider;
    use crate::store::{
        DefaultGenerator, MemoryStore, ResourceStore, Statement, StoreRecord, StoreResult,
    };
    use crate::types::{EntryKind, EntryMetadata};
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    fn root() -> RootId {
        RootId::new(1).unwrap()
    }

    /// Holds any batch that writes `held` for a while; everything else is
    /// applied immediately.
    struct HoldingStore {
        inner: MemoryStore,
        held: PathBuf,
        hold: Duration,
    }

    #[async_trait]
    impl ResourceStore for HoldingStore {
        async fn query_root_snapshot(
            &self,
            root: &Path,
            cancel: &CancellationToken,
        ) -> StoreResult<Vec<StoreRecord>> {
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
            if statements.iter().any(|s| s.path() == self.held.as_path()) {
                tokio::time::sleep(self.hold).await;
            }
            self.inner.apply_batch(statements, cancel).await
        }
    }

    fn spawn(
        store: Arc<dyn ResourceStore>,
        config: SchedulerConfig,
    ) -> (SchedulerHandle, mpsc::UnboundedReceiver<SchedulerNotice>) {
        let ctx = WorkContext {
            provider: Arc::new(LocalProvider::new()),
            store,
            generator: Arc::new(DefaultGenerator::new()),
        };
        Scheduler::spawn(config, ctx)
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            pool_size: 4,
            batch_size: 8,
            max_concurrent_flushes: 2,
            cache_capacity: 16,
            channel_size: 16,
        }
    }

    async fn wait_drained(notices: &mut mpsc::UnboundedReceiver<SchedulerNotice>, root: RootId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(notice) = notices.recv().await {
                if notice == SchedulerNotice::RootDrained(root) {
                    return;
                }
            }
            panic!("notice channel closed");
        })
        .await
        .unwrap();
    }

    fn file(path: &str, mtime: i64) -> QueueEvent {
        QueueEvent::created(root(), path, false).with_metadata(EntryMetadata::file(mtime, 1))
    }

    fn dir(path: &str) -> QueueEvent {
        QueueEvent::created(root(), path, true).with_metadata(EntryMetadata::directory(1))
    }

    #[tokio::test]
    async fn test_unknown_root_rejected() {
        let (handle, _notices) = spawn(Arc::new(MemoryStore::new()), config());
        let err = handle.push(file("/r/a", 1)).await.unwrap_err();
        assert_eq!(err, SchedulerError::UnknownRoot(root()));

        handle.register_root(root()).unwrap();
        assert_eq!(
            handle.register_root(root()),
            Err(SchedulerError::RootAlreadyRegistered(root()))
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_reach_store_parent_first() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(20)));
        let (handle, mut notices) = spawn(Arc::<MemoryStore>::clone(&store), config());
        handle.register_root(root()).unwrap();

        // `/r` is in flight while the rest queue up deepest-first
        handle.push(dir("/r")).await.unwrap();
        handle.push(file("/r/d/e/f.txt", 3)).await.unwrap();
        handle.push(dir("/r/d/e")).await.unwrap();
        handle.push(dir("/r/d")).await.unwrap();
        handle.seal_root(root()).await.unwrap();
        wait_drained(&mut notices, root()).await;

        let order: Vec<PathBuf> = store
            .applied()
            .iter()
            .map(|s| s.path().to_path_buf())
            .collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/r"),
                PathBuf::from("/r/d"),
                PathBuf::from("/r/d/e"),
                PathBuf::from("/r/d/e/f.txt"),
            ]
        );

        // Every child was attached to its parent's identifier
        let parent = store.record(Path::new("/r/d/e")).unwrap().id;
        match store.applied().last().unwrap() {
            Statement::Upsert { container, .. } => assert_eq!(*container, Some(parent)),
            other => panic!("unexpected {other:?}"),
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_seal_on_empty_root_drains_immediately() {
        let (handle, mut notices) = spawn(Arc::new(MemoryStore::new()), config());
        handle.register_root(root()).unwrap();
        handle.seal_root(root()).await.unwrap();
        wait_drained(&mut notices, root()).await;
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_failure_is_per_path() {
        let store = Arc::new(MemoryStore::new());
        store.reject_path("/r/bad");
        let (handle, mut notices) = spawn(Arc::<MemoryStore>::clone(&store), config());
        handle.register_root(root()).unwrap();

        handle.push(file("/r/bad", 1)).await.unwrap();
        handle.push(file("/r/good", 1)).await.unwrap();
        handle.seal_root(root()).await.unwrap();

        let mut failures = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(notice) = notices.recv().await {
                match notice {
                    SchedulerNotice::PathFailed { path, .. } => failures.push(path),
                    SchedulerNotice::RootDrained(_) => break,
                    SchedulerNotice::Flushed { .. } | SchedulerNotice::RescanNeeded { .. } => {}
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(failures, vec![PathBuf::from("/r/bad")]);
        assert!(store.record(Path::new("/r/good")).is_some());

        // The failed path stays eligible
        store.accept_path(Path::new("/r/bad"));
        handle.push(file("/r/bad", 2)).await.unwrap();
        handle.seal_root(root()).await.unwrap();
        wait_drained(&mut notices, root()).await;
        assert_eq!(store.record(Path::new("/r/bad")).unwrap().mtime, 2);

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.flushed, 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_created_then_deleted_never_reaches_store() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(50)));
        let (handle, mut notices) = spawn(Arc::<MemoryStore>::clone(&store), config());
        handle.register_root(root()).unwrap();

        // `/r` stays in flight, so both events for `/r/c` meet in the queue
        handle.push(dir("/r")).await.unwrap();
        handle.push(dir("/r/c")).await.unwrap();
        handle
            .push(QueueEvent::deleted(root(), "/r/c", true))
            .await
            .unwrap();
        handle.seal_root(root()).await.unwrap();
        wait_drained(&mut notices, root()).await;

        assert!(store.record(Path::new("/r")).is_some());
        assert!(store.applied().iter().all(|s| s.path() != Path::new("/r/c")));
        assert_eq!(handle.stats().await.unwrap().coalesced, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_under_is_idempotent() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(50)));
        let (handle, mut notices) = spawn(Arc::<MemoryStore>::clone(&store), config());
        handle.register_root(root()).unwrap();

        handle.push(dir("/r")).await.unwrap();
        for i in 0..5 {
            handle.push(file(&format!("/r/f{i}"), 1)).await.unwrap();
        }
        handle.cancel_under(Path::new("/r")).await.unwrap();
        assert_eq!(handle.cancel_under(Path::new("/r")).await.unwrap(), 0);

        handle.seal_root(root()).await.unwrap();
        wait_drained(&mut notices, root()).await;
        assert_eq!(handle.stats().await.unwrap().queued, 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_waits_for_buffer() {
        let store = Arc::new(MemoryStore::new());
        let mut config = config();
        config.batch_size = 100;
        let (handle, _notices) = spawn(Arc::<MemoryStore>::clone(&store), config);
        handle.register_root(root()).unwrap();

        handle.push(file("/r/a", 1)).await.unwrap();
        // Give the worker time to produce its statement
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.flush().await.unwrap();
        assert!(store.record(Path::new("/r/a")).is_some());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_move_out_of_deleted_directory_keeps_target() {
        let tmp = tempfile::tempdir().unwrap();
        let r = tmp.path().join("r");
        std::fs::create_dir_all(r.join("b")).unwrap();
        std::fs::write(r.join("b/x"), b"moved").unwrap();

        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(100)));
        store.insert_record(&r, EntryKind::Directory, 1, None);
        store.insert_record(r.join("a"), EntryKind::Directory, 1, None);
        store.insert_record(r.join("a/x"), EntryKind::File, 1, None);
        store.insert_record(r.join("b"), EntryKind::Directory, 1, None);

        let (handle, mut notices) = spawn(Arc::<MemoryStore>::clone(&store), config());
        handle.register_root(root()).unwrap();

        // `r` stays in flight so the move is still queued when `r/a` goes
        handle
            .push(QueueEvent::updated(root(), &r, true).with_metadata(EntryMetadata::directory(2)))
            .await
            .unwrap();
        handle
            .push(QueueEvent::moved(root(), r.join("a/x"), r.join("b/x"), false))
            .await
            .unwrap();
        handle
            .push(QueueEvent::deleted(root(), r.join("a"), true))
            .await
            .unwrap();
        handle.seal_root(root()).await.unwrap();
        wait_drained(&mut notices, root()).await;

        assert!(store.record(&r.join("b/x")).is_some());
        assert!(store.record(&r.join("a")).is_none());
        assert!(store.record(&r.join("a/x")).is_none());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_backlog_behind_busy_parent_drains() {
        let store = Arc::new(HoldingStore {
            inner: MemoryStore::new(),
            held: PathBuf::from("/r"),
            hold: Duration::from_millis(300),
        });
        let mut config = config();
        config.batch_size = 64;
        let (handle, mut notices) = spawn(Arc::clone(&store) as Arc<dyn ResourceStore>, config);
        handle.register_root(root()).unwrap();

        let started = Instant::now();
        handle.push(dir("/r")).await.unwrap();
        for i in 0..5000 {
            handle.push(file(&format!("/r/f{i}"), 1)).await.unwrap();
        }
        handle.seal_root(root()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(notice) = notices.recv().await {
                if notice == SchedulerNotice::RootDrained(root()) {
                    return;
                }
            }
        })
        .await
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        assert_eq!(store.inner.len(), 5001);
        handle.shutdown().await.unwrap();
    }
}
