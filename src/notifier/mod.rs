//! File notifier: drives crawls root by root, reconciles them against the
//! store, and translates live monitor events.
//!
//! # Architecture
//!
//! ```text
//! NotifierHandle ──commands──> FileNotifier actor
//!                                 pending: RootQueue (priority, FIFO)
//!                                 current pass:
//!                                   Scanning  ── task: snapshot ─> crawl ─> reconcile ─> push ─> seal
//!                                   Draining  ── waits for SchedulerNotice::RootDrained
//!                                 ChangeMonitor events ──filters──> SchedulerHandle::push
//!                              ──notices──> RootStarted / RootFinished / PathFailed / Idle
//! ```
//!
//! A pass runs on its own task and owns its [`FileStateMap`]. Everything
//! else (roots, pending list, monitors) belongs to the actor.

mod error;
mod indexing_tree;
mod monitor;
mod state;

pub use error::{MonitorError, NotifierError};
pub use indexing_tree::IndexingTree;
pub use monitor::{ChangeMonitor, MonitorEvent, NotifyMonitor, WatchSet, translate};
pub use state::{FileState, FileStateMap, ReconcilePolicy, ReconcileState};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::crawler::{CrawlError, CrawlStats, Crawler};
use crate::root::{PendingRoot, Root, RootFlags, RootQueue};
use crate::scheduler::{PathError, QueueEvent, SchedulerHandle, SchedulerNotice};
use crate::store::ResourceStore;
use crate::types::{RootId, is_under};

/// Outcome counters of one root pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootSummary {
    pub stats: CrawlStats,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Deletions dropped because an ancestor's recursive delete covers them.
    pub pruned: usize,
    pub elapsed: Duration,
}

impl RootSummary {
    pub fn events(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

#[derive(Debug)]
pub enum NotifierNotice {
    RootStarted {
        root: RootId,
        path: PathBuf,
    },
    /// Every event of the pass has settled in the store, or the pass failed.
    RootFinished {
        root: RootId,
        path: PathBuf,
        summary: RootSummary,
        error: Option<NotifierError>,
    },
    RootCancelled {
        root: RootId,
        path: PathBuf,
    },
    PathFailed {
        root: RootId,
        path: PathBuf,
        error: PathError,
    },
    /// The pending list ran empty.
    Idle,
}

/// Snapshot of the notifier's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierStatus {
    pub running: bool,
    pub current: Option<PathBuf>,
    pub pending: usize,
    pub roots: usize,
    pub watched: usize,
}

/// A change monitor together with the stream of events it produces.
pub struct MonitorParts {
    pub monitor: Box<dyn ChangeMonitor>,
    pub events: mpsc::Receiver<MonitorEvent>,
}

/// Collaborators of a [`FileNotifier`].
pub struct NotifierParts {
    pub crawler: Crawler,
    pub store: Arc<dyn ResourceStore>,
    pub scheduler: SchedulerHandle,
    pub scheduler_notices: mpsc::UnboundedReceiver<SchedulerNotice>,
    pub monitor: Option<MonitorParts>,
    /// Hash stored resources must carry to be considered current.
    pub content_hash: Option<String>,
}

enum Command {
    AddRoot {
        root: Root,
        reply: oneshot::Sender<Result<RootId, NotifierError>>,
    },
    UpdateRoot {
        id: RootId,
        flags: RootFlags,
        reply: oneshot::Sender<Result<(), NotifierError>>,
    },
    RemoveRoot {
        id: RootId,
        reply: oneshot::Sender<Result<(), NotifierError>>,
    },
    CancelRoot {
        id: RootId,
        reply: oneshot::Sender<Result<bool, NotifierError>>,
    },
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Status(oneshot::Sender<NotifierStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable front end of a running [`FileNotifier`].
#[derive(Clone, Debug)]
pub struct NotifierHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl NotifierHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NotifierError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| NotifierError::Closed)?;
        rx.await.map_err(|_| NotifierError::Closed)
    }

    /// Register a root and queue its first pass.
    pub async fn add_root(&self, root: Root) -> Result<RootId, NotifierError> {
        self.request(|reply| Command::AddRoot { root, reply }).await?
    }

    /// Change a root's flags and queue a fresh pass.
    pub async fn update_root(&self, id: RootId, flags: RootFlags) -> Result<(), NotifierError> {
        self.request(|reply| Command::UpdateRoot { id, flags, reply })
            .await?
    }

    /// Unregister a root, deleting its store content unless it is preserved.
    pub async fn remove_root(&self, id: RootId) -> Result<(), NotifierError> {
        self.request(|reply| Command::RemoveRoot { id, reply }).await?
    }

    /// Abandon the root's current or pending pass.
    ///
    /// Returns false when there was nothing to cancel.
    pub async fn cancel_root(&self, id: RootId) -> Result<bool, NotifierError> {
        self.request(|reply| Command::CancelRoot { id, reply }).await?
    }

    /// Begin processing the pending list.
    pub async fn start(&self) -> Result<(), NotifierError> {
        self.request(Command::Start).await
    }

    /// Halt processing. The current root goes back to the head of the list.
    pub async fn stop(&self) -> Result<(), NotifierError> {
        self.request(Command::Stop).await
    }

    pub async fn status(&self) -> Result<NotifierStatus, NotifierError> {
        self.request(Command::Status).await
    }

    pub async fn shutdown(&self) -> Result<(), NotifierError> {
        self.request(Command::Shutdown).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scanning,
    Draining,
}

struct CurrentPass {
    job: PendingRoot,
    generation: u64,
    phase: Phase,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    summary: RootSummary,
    started: Instant,
}

enum PassMessage {
    Crawled {
        generation: u64,
        directories: Vec<PathBuf>,
    },
    Finished {
        generation: u64,
        result: Result<RootSummary, NotifierError>,
    },
}

#[derive(Clone)]
struct PassContext {
    crawler: Crawler,
    store: Arc<dyn ResourceStore>,
    scheduler: SchedulerHandle,
    content_hash: Option<String>,
}

/// The reconciliation actor.
pub struct FileNotifier {
    ctx: PassContext,
    monitor: Option<Box<dyn ChangeMonitor>>,
    tree: IndexingTree,
    pending: RootQueue,
    current: Option<CurrentPass>,
    /// Removed roots whose final deletion is still settling.
    retiring: Vec<RootId>,
    running: bool,
    announced_idle: bool,
    next_root: u64,
    next_generation: u64,
    passes: mpsc::UnboundedSender<PassMessage>,
    notices: mpsc::UnboundedSender<NotifierNotice>,
}

impl FileNotifier {
    /// Start the actor on the current tokio runtime.
    pub fn spawn(parts: NotifierParts) -> (NotifierHandle, mpsc::UnboundedReceiver<NotifierNotice>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (pass_tx, pass_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let (monitor, monitor_rx) = match parts.monitor {
            Some(MonitorParts { monitor, events }) => (Some(monitor), Some(events)),
            None => (None, None),
        };

        let notifier = FileNotifier {
            ctx: PassContext {
                crawler: parts.crawler,
                store: parts.store,
                scheduler: parts.scheduler,
                content_hash: parts.content_hash,
            },
            monitor,
            tree: IndexingTree::new(),
            pending: RootQueue::new(),
            current: None,
            retiring: Vec::new(),
            running: false,
            announced_idle: true,
            next_root: 0,
            next_generation: 0,
            passes: pass_tx,
            notices: notice_tx,
        };

        tokio::spawn(notifier.run(command_rx, pass_rx, parts.scheduler_notices, monitor_rx));

        (
            NotifierHandle {
                commands: command_tx,
            },
            notice_rx,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut passes: mpsc::UnboundedReceiver<PassMessage>,
        mut scheduler_notices: mpsc::UnboundedReceiver<SchedulerNotice>,
        mut monitor_events: Option<mpsc::Receiver<MonitorEvent>>,
    ) {
        crate::debug_event!("notifier", "started");

        loop {
            self.advance().await;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command).await {
                            break;
                        }
                    }
                    None => {
                        self.halt().await;
                        break;
                    }
                },

                Some(message) = passes.recv() => self.on_pass(message),

                Some(notice) = scheduler_notices.recv() => self.on_scheduler_notice(notice).await,

                Some(event) = recv_optional(&mut monitor_events) => self.on_monitor_event(event).await,
            }
        }

        crate::debug_event!("notifier", "stopped");
    }

    /// Returns false once the loop should stop.
    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::AddRoot { root, reply } => {
                let _ = reply.send(self.add_root(root));
            }
            Command::UpdateRoot { id, flags, reply } => {
                let _ = reply.send(self.update_root(id, flags).await);
            }
            Command::RemoveRoot { id, reply } => {
                let _ = reply.send(self.remove_root(id).await);
            }
            Command::CancelRoot { id, reply } => {
                let _ = reply.send(self.cancel_root(id).await);
            }
            Command::Start(reply) => {
                self.running = true;
                crate::debug_event!("notifier", "processing", "{} roots pending", self.pending.len());
                let _ = reply.send(());
            }
            Command::Stop(reply) => {
                self.running = false;
                if let Some(pass) = self.cancel_current().await {
                    crate::debug_event!("notifier", "paused", "{}", pass.job.path.display());
                    self.pending.push_front(pass.job);
                }
                let _ = reply.send(());
            }
            Command::Status(reply) => {
                let _ = reply.send(NotifierStatus {
                    running: self.running,
                    current: self.current.as_ref().map(|c| c.job.path.clone()),
                    pending: self.pending.len(),
                    roots: self.tree.len(),
                    watched: self.monitor.as_ref().map_or(0, |m| m.watched_count()),
                });
            }
            Command::Shutdown(reply) => {
                self.halt().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn add_root(&mut self, root: Root) -> Result<RootId, NotifierError> {
        if self.tree.find_by_path(&root.path).is_some() {
            return Err(NotifierError::RootAlreadyRegistered { path: root.path });
        }

        let id = allocate_root_id(&mut self.next_root)?;
        self.ctx.scheduler.register_root(id)?;

        crate::log_event!("notifier", "root added", "{} ({id})", root.path.display());
        self.pending.push(PendingRoot {
            owner: id,
            path: root.path.clone(),
            flags: root.flags,
        });
        self.tree.insert(id, root);
        Ok(id)
    }

    async fn update_root(&mut self, id: RootId, flags: RootFlags) -> Result<(), NotifierError> {
        let Some(root) = self.tree.get(id).cloned() else {
            return Err(NotifierError::UnknownRoot(id));
        };

        if self.current.as_ref().is_some_and(|c| c.job.owner == id) {
            self.cancel_current().await;
        }
        self.pending.remove_owner(id);

        if !flags.contains(RootFlags::MONITOR) {
            if let Some(monitor) = self.monitor.as_mut() {
                monitor.remove_recursive(&root.path);
            }
        }

        crate::log_event!("notifier", "root updated", "{}", root.path.display());
        self.pending.push(PendingRoot {
            owner: id,
            path: root.path.clone(),
            flags,
        });
        self.tree.insert(id, Root::new(root.path, flags));
        Ok(())
    }

    async fn remove_root(&mut self, id: RootId) -> Result<(), NotifierError> {
        let Some(root) = self.tree.remove(id) else {
            return Err(NotifierError::UnknownRoot(id));
        };

        if self.current.as_ref().is_some_and(|c| c.job.owner == id) {
            self.cancel_current().await;
        }
        self.pending.remove_owner(id);
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.remove_recursive(&root.path);
        }

        let scheduler = &self.ctx.scheduler;
        scheduler.purge_root(id).await?;

        if root.is_preserved() {
            scheduler.unregister_root(id).await?;
        } else {
            let event = QueueEvent::deleted(id, &root.path, true).with_priority(root.priority());
            scheduler.push(event).await?;
            scheduler.seal_root(id).await?;
            self.retiring.push(id);
        }

        crate::log_event!("notifier", "root removed", "{}", root.path.display());
        Ok(())
    }

    async fn cancel_root(&mut self, id: RootId) -> Result<bool, NotifierError> {
        let mut cancelled = false;
        let mut path = self.tree.get(id).map(|r| r.path.clone());

        if self.current.as_ref().is_some_and(|c| c.job.owner == id) {
            if let Some(pass) = self.cancel_current().await {
                path.get_or_insert(pass.job.path);
                cancelled = true;
            }
        }
        cancelled |= self.pending.remove_owner(id) > 0;

        if cancelled {
            if self.ctx.scheduler.is_registered(id) {
                self.ctx.scheduler.purge_root(id).await?;
            }
            let path = path.unwrap_or_default();
            crate::log_event!("notifier", "cancelled", "{}", path.display());
            let _ = self
                .notices
                .send(NotifierNotice::RootCancelled { root: id, path });
        }
        Ok(cancelled)
    }

    /// Cancel the current pass and wait for its task to wind down.
    async fn cancel_current(&mut self) -> Option<CurrentPass> {
        let mut pass = self.current.take()?;
        pass.cancel.cancel();
        if let Some(task) = pass.task.take() {
            let _ = task.await;
        }
        Some(pass)
    }

    async fn halt(&mut self) {
        self.running = false;
        self.cancel_current().await;
    }

    /// Start the next pending pass when idle.
    async fn advance(&mut self) {
        while self.running && self.current.is_none() {
            let Some(job) = self.pending.pop() else {
                if !self.announced_idle {
                    self.announced_idle = true;
                    crate::debug_event!("notifier", "idle");
                    let _ = self.notices.send(NotifierNotice::Idle);
                }
                return;
            };
            self.announced_idle = false;
            self.begin(job).await;
        }
    }

    async fn begin(&mut self, job: PendingRoot) {
        let Some(root) = self.tree.get(job.owner).cloned() else {
            return;
        };

        crate::log_event!("notifier", "processing", "{}", job.path.display());
        let _ = self.notices.send(NotifierNotice::RootStarted {
            root: job.owner,
            path: job.path.clone(),
        });

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        let mut pass = CurrentPass {
            job: job.clone(),
            generation,
            phase: Phase::Scanning,
            cancel: cancel.clone(),
            task: None,
            summary: RootSummary::default(),
            started: Instant::now(),
        };

        if job.flags.contains(RootFlags::IGNORE) {
            if let Some(monitor) = self.monitor.as_mut() {
                monitor.remove_recursive(&job.path);
            }
            match retire_ignored(&self.ctx.scheduler, &job, &root).await {
                Ok(deleted) => {
                    pass.summary.deleted = deleted;
                    pass.phase = Phase::Draining;
                    self.current = Some(pass);
                }
                Err(error) => {
                    self.current = Some(pass);
                    self.finish(Some(error));
                }
            }
            return;
        }

        let ctx = self.ctx.clone();
        let passes = self.passes.clone();
        pass.task = Some(tokio::spawn(async move {
            let result = run_pass(&ctx, &job, generation, &passes, &cancel).await;
            let _ = passes.send(PassMessage::Finished { generation, result });
        }));
        self.current = Some(pass);
    }

    fn on_pass(&mut self, message: PassMessage) {
        match message {
            PassMessage::Crawled {
                generation,
                directories,
            } => {
                let Some(pass) = self.current.as_ref().filter(|c| c.generation == generation)
                else {
                    return;
                };
                if !pass.job.flags.contains(RootFlags::MONITOR) {
                    return;
                }
                let recursive = pass.job.flags.contains(RootFlags::RECURSE);
                let root_path = pass.job.path.clone();
                let Some(monitor) = self.monitor.as_mut() else {
                    return;
                };
                for dir in directories {
                    if !recursive && dir != root_path {
                        continue;
                    }
                    if let Err(e) = monitor.add(&dir) {
                        tracing::warn!("[notifier] {e}");
                    }
                }
            }
            PassMessage::Finished { generation, result } => {
                let Some(pass) = self.current.as_mut().filter(|c| c.generation == generation)
                else {
                    return;
                };
                pass.task = None;
                match result {
                    Ok(summary) => {
                        pass.summary = summary;
                        pass.phase = Phase::Draining;
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        tracing::warn!("[notifier] {} failed: {e}", pass.job.path.display());
                        self.finish(Some(e));
                    }
                }
            }
        }
    }

    fn finish(&mut self, error: Option<NotifierError>) {
        let Some(pass) = self.current.take() else {
            return;
        };
        let summary = RootSummary {
            elapsed: pass.started.elapsed(),
            ..pass.summary
        };
        crate::log_event!(
            "notifier",
            "finished",
            "{}: {} created, {} updated, {} deleted in {:?}",
            pass.job.path.display(),
            summary.created,
            summary.updated,
            summary.deleted,
            summary.elapsed
        );
        let _ = self.notices.send(NotifierNotice::RootFinished {
            root: pass.job.owner,
            path: pass.job.path,
            summary,
            error,
        });
    }

    async fn on_scheduler_notice(&mut self, notice: SchedulerNotice) {
        match notice {
            SchedulerNotice::RootDrained(id) => {
                if let Some(pos) = self.retiring.iter().position(|r| *r == id) {
                    self.retiring.swap_remove(pos);
                    if let Err(e) = self.ctx.scheduler.unregister_root(id).await {
                        crate::debug_event!("notifier", "unregister", "{e}");
                    }
                    return;
                }
                let draining = self
                    .current
                    .as_ref()
                    .is_some_and(|c| c.job.owner == id && c.phase == Phase::Draining);
                if draining {
                    self.finish(None);
                }
            }
            SchedulerNotice::PathFailed { path, root, error } => {
                let _ = self
                    .notices
                    .send(NotifierNotice::PathFailed { root, path, error });
            }
            SchedulerNotice::Flushed { written, failed } => {
                crate::debug_event!("notifier", "flushed", "{written} written, {failed} failed");
            }
            SchedulerNotice::RescanNeeded { root: id, path } => {
                if let Some(root) = self.tree.get(id).cloned() {
                    if root.is_recursive() {
                        self.queue_subtree(id, &root, path);
                    }
                }
            }
        }
    }

    async fn on_monitor_event(&mut self, event: MonitorEvent) {
        crate::debug_event!("notifier", "monitor", "{event:?}");
        match event {
            MonitorEvent::Created { path, is_dir } => {
                let Some((id, root)) = self.monitored_owner(&path, is_dir) else {
                    return;
                };
                let event = QueueEvent::created(id, &path, is_dir).with_priority(root.priority());
                push_live(&self.ctx.scheduler, event).await;
                if is_dir && root.is_recursive() {
                    self.queue_subtree(id, &root, path);
                }
            }
            MonitorEvent::Updated { path, is_dir } => {
                if let Some((id, root)) = self.monitored_owner(&path, is_dir) {
                    let event = QueueEvent::updated(id, &path, is_dir).with_priority(root.priority());
                    push_live(&self.ctx.scheduler, event).await;
                }
            }
            MonitorEvent::AttributesUpdated { path, is_dir } => {
                if let Some((id, root)) = self.monitored_owner(&path, is_dir) {
                    let event = QueueEvent::attributes_updated(id, &path, is_dir)
                        .with_priority(root.priority());
                    push_live(&self.ctx.scheduler, event).await;
                }
            }
            MonitorEvent::Deleted { path, is_dir } => {
                let is_dir = is_dir || self.is_watched(&path);
                if is_dir {
                    self.forget_subtree(&path);
                }
                if let Some((id, root)) = self.monitored_owner(&path, is_dir) {
                    let event = QueueEvent::deleted(id, &path, is_dir).with_priority(root.priority());
                    push_live(&self.ctx.scheduler, event).await;
                }
            }
            MonitorEvent::Moved { from, to, is_dir } => {
                self.on_moved(from, to, is_dir).await;
            }
        }
    }

    async fn on_moved(&mut self, from: PathBuf, to: PathBuf, is_dir: bool) {
        let source = self.monitored_owner(&from, is_dir);
        let target = self.monitored_owner(&to, is_dir);
        if is_dir {
            self.forget_subtree(&from);
        }

        match (source, target) {
            (Some(_), Some((id, root))) => {
                let event = QueueEvent::moved(id, &from, &to, is_dir).with_priority(root.priority());
                push_live(&self.ctx.scheduler, event).await;
                if is_dir && root.is_recursive() {
                    // Re-registers monitors and picks up anything the move changed
                    self.queue_subtree(id, &root, to);
                }
            }
            (None, Some((id, root))) => {
                let event = QueueEvent::created(id, &to, is_dir).with_priority(root.priority());
                push_live(&self.ctx.scheduler, event).await;
                if is_dir && root.is_recursive() {
                    self.queue_subtree(id, &root, to);
                }
            }
            (Some((id, root)), None) => {
                let event = QueueEvent::deleted(id, &from, is_dir).with_priority(root.priority());
                push_live(&self.ctx.scheduler, event).await;
            }
            (None, None) => {}
        }
    }

    /// Owning root of `path` when live events for it should be queued.
    fn monitored_owner(&self, path: &Path, is_dir: bool) -> Option<(RootId, Root)> {
        let (id, root) = self.tree.owner_of(path)?;
        if !root.is_monitored() {
            return None;
        }
        let filter = self.ctx.crawler.filter();
        if !self.tree.is_indexable(path, is_dir, filter.as_ref()) {
            crate::debug_event!("notifier", "filtered", "{}", path.display());
            return None;
        }
        Some((id, root.clone()))
    }

    fn is_watched(&self, path: &Path) -> bool {
        self.monitor.as_ref().is_some_and(|m| m.is_watched(path))
    }

    /// Drop monitors and pending subtree passes at or under `path`.
    fn forget_subtree(&mut self, path: &Path) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.remove_recursive(path);
        }
        let tree = &self.tree;
        let pending: Vec<PendingRoot> = self
            .pending
            .iter()
            .filter(|p| p.path.starts_with(path))
            .filter(|p| tree.get(p.owner).is_some_and(|root| p.is_subtree(&root.path)))
            .cloned()
            .collect();
        for entry in pending {
            self.pending.remove_path(&entry.path);
        }
    }

    fn queue_subtree(&mut self, owner: RootId, root: &Root, path: PathBuf) {
        crate::debug_event!("notifier", "subtree queued", "{}", path.display());
        self.pending.push(PendingRoot {
            owner,
            path,
            flags: root.flags,
        });
    }

}

fn allocate_root_id(counter: &mut u64) -> Result<RootId, NotifierError> {
    let next = counter
        .checked_add(1)
        .ok_or(NotifierError::RootIdsExhausted)?;
    let id = RootId::new(next).ok_or(NotifierError::RootIdsExhausted)?;
    *counter = next;
    Ok(id)
}

/// An ignored root is never crawled; its content goes unless preserved.
async fn retire_ignored(
    scheduler: &SchedulerHandle,
    job: &PendingRoot,
    root: &Root,
) -> Result<usize, NotifierError> {
    let mut deleted = 0;
    if !root.is_preserved() {
        let event = QueueEvent::deleted(job.owner, &job.path, true).with_priority(job.priority());
        scheduler.push(event).await?;
        deleted = 1;
    }
    scheduler.seal_root(job.owner).await?;
    Ok(deleted)
}

async fn push_live(scheduler: &SchedulerHandle, event: QueueEvent) {
    if let Err(e) = scheduler.push(event).await {
        tracing::warn!("[notifier] live event dropped: {e}");
    }
}

async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Snapshot, crawl, reconcile and emit one pending root.
async fn run_pass(
    ctx: &PassContext,
    job: &PendingRoot,
    generation: u64,
    passes: &mpsc::UnboundedSender<PassMessage>,
    cancel: &CancellationToken,
) -> Result<RootSummary, NotifierError> {
    let recursive = job.flags.contains(RootFlags::RECURSE);

    let snapshot = ctx.store.query_root_snapshot(&job.path, cancel).await?;
    let mut states = FileStateMap::new();
    let mut known_dirs = Vec::new();
    for record in &snapshot {
        let in_reach = recursive
            || record.path == job.path
            || record.path.parent() == Some(job.path.as_path());
        if !in_reach {
            continue;
        }
        if record.is_dir() {
            known_dirs.push((record.path.clone(), Some(record.id)));
        }
        states.record_store(record);
    }
    ctx.scheduler.prime_cache(known_dirs)?;

    let output = ctx.crawler.crawl(&job.path, job.flags, cancel).await?;
    let _ = passes.send(PassMessage::Crawled {
        generation,
        directories: output.tree.directories().map(|n| n.path.clone()).collect(),
    });
    for node in output.tree.iter() {
        states.record_disk(node);
    }

    let policy = ReconcilePolicy {
        check_mtime: job.flags.contains(RootFlags::CHECK_MTIME),
        check_deleted: job.flags.contains(RootFlags::CHECK_DELETED),
        expected_hash: ctx.content_hash.clone(),
    };

    let mut summary = RootSummary {
        stats: output.stats,
        ..Default::default()
    };
    let mut deleted_dirs: Vec<PathBuf> = Vec::new();

    for (path, state, verdict) in states.drain_changes(&policy) {
        let is_dir = state.is_dir();
        let event = match verdict {
            ReconcileState::Create => {
                summary.created += 1;
                QueueEvent::created(job.owner, path, is_dir)
            }
            ReconcileState::Update => {
                summary.updated += 1;
                QueueEvent::updated(job.owner, path, is_dir)
            }
            ReconcileState::Delete => {
                if output.is_unknown(&path) {
                    continue;
                }
                if deleted_dirs.iter().any(|d| is_under(&path, d)) {
                    summary.pruned += 1;
                    continue;
                }
                if is_dir {
                    deleted_dirs.push(path.clone());
                }
                summary.deleted += 1;
                QueueEvent::deleted(job.owner, path, is_dir)
            }
            ReconcileState::None => continue,
        };

        let mut event = event.with_priority(job.priority());
        if let Some(metadata) = state.disk_metadata {
            event = event.with_metadata(metadata);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CrawlError::Cancelled { root: job.path.clone() }.into());
            }
            pushed = ctx.scheduler.push(event) => pushed?,
        }
    }

    ctx.scheduler.seal_root(job.owner).await?;
    crate::debug_event!(
        "notifier",
        "emitted",
        "{}: {} events, {} pruned",
        job.path.display(),
        summary.events(),
        summary.pruned
    );
    Ok(summary)
}
