//! Crate-level error aggregating every component's failures.

use thiserror::Error;

use crate::crawler::CrawlError;
use crate::notifier::{MonitorError, NotifierError};
use crate::scheduler::SchedulerError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Failed to start indexer: {reason}")]
    InitFailed { reason: String },
}

impl IndexerError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            IndexerError::Crawl(e) => e.is_cancelled(),
            IndexerError::Store(e) => e.is_cancelled(),
            IndexerError::Notifier(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

pub type IndexerResult<T> = Result<T, IndexerError>;
