use std::path::PathBuf;
use thiserror::Error;

/// Errors from the resource store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Snapshot query for {root} failed: {reason}")]
    Query { root: PathBuf, reason: String },

    #[error("Failed to apply update for {path}: {reason}")]
    Apply { path: PathBuf, reason: String },

    #[error("Store unavailable: {0}")]
    Connection(String),

    #[error("Store operation was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

/// Errors from the resource-graph generator.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Path {path} is not absolute")]
    RelativePath { path: PathBuf },
}

pub type StoreResult<T> = Result<T, StoreError>;
