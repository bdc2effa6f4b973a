pub mod cache;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod logging;
pub mod miner;
pub mod notifier;
pub mod root;
pub mod scheduler;
pub mod store;
pub mod types;

pub use cache::LruCache;
pub use config::Settings;
pub use crawler::{Crawler, DataProvider, IndexingFilter, LocalProvider, PatternFilter};
pub use error::{IndexerError, IndexerResult};
pub use miner::{Miner, MinerBuilder, MinerReport, RootOutcome};
pub use notifier::{FileNotifier, NotifierHandle, NotifierNotice, RootSummary};
pub use root::{Root, RootFlags};
pub use scheduler::{QueueEvent, Scheduler, SchedulerHandle, SchedulerNotice};
pub use store::{DefaultGenerator, MemoryStore, ResourceGenerator, ResourceStore, Statement};
pub use types::*;
