use std::path::PathBuf;
use thiserror::Error;

use crate::types::RootId;

/// Contract and lifecycle errors surfaced by [`SchedulerHandle`](super::SchedulerHandle).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Root {0} is already registered with the scheduler")]
    RootAlreadyRegistered(RootId),

    #[error("Event for unregistered root {0}")]
    UnknownRoot(RootId),

    #[error("Scheduler has shut down")]
    Closed,
}

/// Why one path's mutation did not reach the store.
///
/// Reported per path; never fatal to the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Failed to read attributes of {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("Failed to look up container of {path}: {reason}")]
    Lookup { path: PathBuf, reason: String },

    #[error("Failed to describe {path}: {reason}")]
    Generate { path: PathBuf, reason: String },

    #[error("Failed to write {path}: {reason}")]
    Flush { path: PathBuf, reason: String },
}

impl PathError {
    pub fn path(&self) -> &PathBuf {
        match self {
            PathError::Metadata { path, .. }
            | PathError::Lookup { path, .. }
            | PathError::Generate { path, .. }
            | PathError::Flush { path, .. } => path,
        }
    }
}
