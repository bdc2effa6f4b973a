use std::path::PathBuf;
use thiserror::Error;

use crate::crawler::CrawlError;
use crate::scheduler::SchedulerError;
use crate::store::StoreError;
use crate::types::RootId;

/// Errors from change monitors.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to initialize monitor: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch {path}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },
}

impl From<notify::Error> for MonitorError {
    fn from(e: notify::Error) -> Self {
        MonitorError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Errors from the file notifier.
#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("Root {path} is already registered")]
    RootAlreadyRegistered { path: PathBuf },

    #[error("Unknown root {0}")]
    UnknownRoot(RootId),

    #[error("No root registered at {path}")]
    UnknownRootPath { path: PathBuf },

    #[error("Crawl failed: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler failed: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("No root identifiers left")]
    RootIdsExhausted,

    #[error("Notifier has shut down")]
    Closed,
}

impl NotifierError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            NotifierError::Crawl(e) => e.is_cancelled(),
            NotifierError::Store(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
