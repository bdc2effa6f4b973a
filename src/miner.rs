//! Daemon facade wiring the crawler, scheduler, notifier and monitor together.
//!
//! ```text
//! MinerBuilder ──build()──> Scheduler actor  <── WorkContext (provider, store, generator)
//!                           FileNotifier actor <── Crawler, store, SchedulerHandle, monitor
//! Miner: add_root / remove_root / start / wait_idle / shutdown
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Settings;
use crate::crawler::{Crawler, DataProvider, IndexingFilter, LocalProvider, PatternFilter};
use crate::error::{IndexerError, IndexerResult};
use crate::notifier::{
    FileNotifier, MonitorParts, NotifierError, NotifierHandle, NotifierNotice, NotifierParts,
    NotifyMonitor, RootSummary,
};
use crate::root::{Root, RootFlags};
use crate::scheduler::{PathError, Scheduler, SchedulerConfig, SchedulerHandle, WorkContext};
use crate::store::{DefaultGenerator, MemoryStore, ResourceGenerator, ResourceStore};
use crate::types::RootId;

const MONITOR_CHANNEL_SIZE: usize = 1024;

/// How one root pass ended.
#[derive(Debug)]
pub struct RootOutcome {
    pub root: RootId,
    pub path: PathBuf,
    pub summary: RootSummary,
    pub error: Option<NotifierError>,
}

/// Everything reported while waiting for the notifier to go idle.
#[derive(Debug, Default)]
pub struct MinerReport {
    pub finished: Vec<RootOutcome>,
    pub cancelled: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, PathError)>,
}

impl MinerReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.finished.iter().all(|o| o.error.is_none())
    }
}

/// A running indexer.
pub struct Miner {
    scheduler: SchedulerHandle,
    notifier: NotifierHandle,
    notices: mpsc::UnboundedReceiver<NotifierNotice>,
    roots: HashMap<PathBuf, RootId>,
}

impl Miner {
    /// Create a builder for configuring the miner.
    pub fn builder() -> MinerBuilder {
        MinerBuilder::new()
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn notifier(&self) -> &NotifierHandle {
        &self.notifier
    }

    /// Raw notice stream, for callers that outlive a single [`Miner::wait_idle`].
    pub fn notices(&mut self) -> &mut mpsc::UnboundedReceiver<NotifierNotice> {
        &mut self.notices
    }

    pub async fn add_root(&mut self, root: Root) -> IndexerResult<RootId> {
        let path = root.path.clone();
        let id = self.notifier.add_root(root).await?;
        self.roots.insert(path, id);
        Ok(id)
    }

    /// Register every root listed in `settings`.
    pub async fn add_configured_roots(&mut self, settings: &Settings) -> IndexerResult<Vec<RootId>> {
        let mut ids = Vec::with_capacity(settings.roots.len());
        for root in settings.root_list() {
            ids.push(self.add_root(root).await?);
        }
        Ok(ids)
    }

    pub fn root_id(&self, path: &Path) -> Option<RootId> {
        self.roots.get(path).copied()
    }

    pub async fn update_root(&self, path: &Path, flags: RootFlags) -> IndexerResult<()> {
        let id = self.lookup(path)?;
        Ok(self.notifier.update_root(id, flags).await?)
    }

    pub async fn remove_root(&mut self, path: &Path) -> IndexerResult<()> {
        let id = self.lookup(path)?;
        self.notifier.remove_root(id).await?;
        self.roots.remove(path);
        Ok(())
    }

    pub async fn cancel_root(&self, path: &Path) -> IndexerResult<bool> {
        let id = self.lookup(path)?;
        Ok(self.notifier.cancel_root(id).await?)
    }

    fn lookup(&self, path: &Path) -> Result<RootId, NotifierError> {
        self.root_id(path)
            .ok_or_else(|| NotifierError::UnknownRootPath {
                path: path.to_path_buf(),
            })
    }

    pub async fn start(&self) -> IndexerResult<()> {
        Ok(self.notifier.start().await?)
    }

    pub async fn stop(&self) -> IndexerResult<()> {
        Ok(self.notifier.stop().await?)
    }

    /// Collect notices until the pending list runs empty, then flush.
    pub async fn wait_idle(&mut self) -> IndexerResult<MinerReport> {
        let mut report = MinerReport::default();

        let status = self.notifier.status().await?;
        let busy = status.current.is_some() || (status.running && status.pending > 0);

        if busy {
            loop {
                let Some(notice) = self.notices.recv().await else {
                    return Err(NotifierError::Closed.into());
                };
                if Self::record(&mut report, notice) {
                    break;
                }
            }
        } else {
            while let Ok(notice) = self.notices.try_recv() {
                Self::record(&mut report, notice);
            }
        }

        self.scheduler.flush().await?;
        Ok(report)
    }

    /// Returns true on [`NotifierNotice::Idle`].
    fn record(report: &mut MinerReport, notice: NotifierNotice) -> bool {
        match notice {
            NotifierNotice::RootFinished {
                root,
                path,
                summary,
                error,
            } => {
                report.finished.push(RootOutcome {
                    root,
                    path,
                    summary,
                    error,
                });
            }
            NotifierNotice::RootCancelled { path, .. } => report.cancelled.push(path),
            NotifierNotice::PathFailed { path, error, .. } => report.failures.push((path, error)),
            NotifierNotice::RootStarted { .. } => {}
            NotifierNotice::Idle => return true,
        }
        false
    }

    /// Stop crawling, write what is buffered and stop both actors.
    pub async fn shutdown(self) -> IndexerResult<()> {
        self.notifier.shutdown().await?;
        self.scheduler.flush().await?;
        self.scheduler.shutdown().await?;
        crate::log_event!("miner", "stopped");
        Ok(())
    }
}

/// Builder for [`Miner`].
pub struct MinerBuilder {
    settings: Settings,
    provider: Option<Arc<dyn DataProvider>>,
    store: Option<Arc<dyn ResourceStore>>,
    generator: Option<Arc<dyn ResourceGenerator>>,
    filter: Option<Arc<dyn IndexingFilter>>,
    monitor: Option<MonitorParts>,
    watch: bool,
}

impl MinerBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            provider: None,
            store: None,
            generator: None,
            filter: None,
            monitor: None,
            watch: false,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn ResourceGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replace the filter built from `settings.filters`.
    pub fn filter(mut self, filter: Arc<dyn IndexingFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Use a specific change monitor instead of the platform one.
    pub fn monitor(mut self, monitor: MonitorParts) -> Self {
        self.monitor = Some(monitor);
        self.watch = true;
        self
    }

    /// Install live monitors on crawled directories.
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Spawn the actors. Must run inside a tokio runtime.
    pub fn build(self) -> IndexerResult<Miner> {
        let settings = self.settings;

        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(LocalProvider::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let generator = self.generator.unwrap_or_else(|| {
            let generator = match &settings.indexing.content_hash {
                Some(hash) => DefaultGenerator::new().with_content_hash(hash.clone()),
                None => DefaultGenerator::new(),
            };
            Arc::new(generator)
        });
        let filter = self
            .filter
            .unwrap_or_else(|| Arc::new(PatternFilter::from_config(&settings.filters)));

        let monitor = match (self.monitor, self.watch) {
            (Some(parts), _) => Some(parts),
            (None, true) => {
                let (tx, rx) = mpsc::channel(MONITOR_CHANNEL_SIZE);
                let monitor = NotifyMonitor::new(tx)?;
                Some(MonitorParts {
                    monitor: Box::new(monitor),
                    events: rx,
                })
            }
            (None, false) => None,
        };

        let content_hash = generator.content_hash().map(str::to_string);
        let crawler = Crawler::new(Arc::clone(&provider), filter)
            .with_batch_size(settings.indexing.enumeration_batch_size);

        let (scheduler, scheduler_notices) = Scheduler::spawn(
            SchedulerConfig::from(&settings.indexing),
            WorkContext {
                provider,
                store: Arc::clone(&store),
                generator,
            },
        );

        let (notifier, notices) = FileNotifier::spawn(NotifierParts {
            crawler,
            store,
            scheduler: scheduler.clone(),
            scheduler_notices,
            monitor,
            content_hash,
        });

        crate::log_event!("miner", "started");
        Ok(Miner {
            scheduler,
            notifier,
            notices,
            roots: HashMap::new(),
        })
    }
}

impl Default for MinerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
