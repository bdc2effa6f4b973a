//! Error types for the crawler and its data provider.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the data provider collaborator.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Enumeration of {path} was cancelled")]
    Cancelled { path: PathBuf },
}

impl ProviderError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ProviderError::Io {
            path: path.into(),
            source,
        }
    }

    /// Not-found, permission-denied and temporarily-unavailable failures.
    ///
    /// These are tolerated: the affected subtree is skipped, not reported.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound
                    | io::ErrorKind::PermissionDenied
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
            ),
            ProviderError::Cancelled { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled { .. })
    }
}

/// Errors from a crawl pass.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Crawl of {root} was cancelled")]
    Cancelled { root: PathBuf },

    #[error("Crawl root {root} is not a directory")]
    NotADirectory { root: PathBuf },

    #[error("Enumeration failed: {0}")]
    Provider(#[from] ProviderError),
}

impl CrawlError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            CrawlError::Cancelled { .. } => true,
            CrawlError::Provider(e) => e.is_cancelled(),
            CrawlError::NotADirectory { .. } => false,
        }
    }
}
