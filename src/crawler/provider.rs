//! Data provider boundary and the local filesystem implementation.
//!
//! The crawler never touches the filesystem directly. It asks a
//! [`DataProvider`] for a paged [`Enumerator`] per directory so memory and
//! concurrent I/O stay bounded by the batch size.

use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::ProviderError;
use crate::types::EntryMetadata;

/// One child returned by an enumeration round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: OsString,
    pub path: PathBuf,
    pub metadata: EntryMetadata,
}

impl DirEntryInfo {
    pub fn new(parent: &Path, name: impl Into<OsString>, metadata: EntryMetadata) -> Self {
        let name = name.into();
        Self {
            path: parent.join(&name),
            name,
            metadata,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }

    pub fn name_lossy(&self) -> Cow<'_, str> {
        self.name.to_string_lossy()
    }
}

/// Paged iterator over the children of one directory.
#[async_trait]
pub trait Enumerator: Send {
    /// Next batch of children, `None` once the directory is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<DirEntryInfo>>, ProviderError>;

    /// Release provider resources early. Dropping also closes.
    fn close(&mut self) {}
}

/// Source of directory listings and entry attributes.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Start enumerating `dir`, returning at most `batch_size` entries per round-trip.
    async fn begin(
        &self,
        dir: &Path,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Enumerator>, ProviderError>;

    /// Attributes of a single path, without following symlinks.
    async fn query_info(&self, path: &Path) -> Result<EntryMetadata, ProviderError>;
}

/// [`DataProvider`] backed by `tokio::fs`.
#[derive(Debug, Default, Clone)]
pub struct LocalProvider;

impl LocalProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DataProvider for LocalProvider {
    async fn begin(
        &self,
        dir: &Path,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Enumerator>, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled {
                path: dir.to_path_buf(),
            });
        }

        let read_dir = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| ProviderError::io(dir, e))?;

        Ok(Box::new(LocalEnumerator {
            dir: dir.to_path_buf(),
            read_dir: Some(read_dir),
            batch_size: batch_size.max(1),
            cancel: cancel.clone(),
        }))
    }

    async fn query_info(&self, path: &Path) -> Result<EntryMetadata, ProviderError> {
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        Ok(EntryMetadata::from_fs(&meta))
    }
}

struct LocalEnumerator {
    dir: PathBuf,
    read_dir: Option<tokio::fs::ReadDir>,
    batch_size: usize,
    cancel: CancellationToken,
}

#[async_trait]
impl Enumerator for LocalEnumerator {
    async fn next_batch(&mut self) -> Result<Option<Vec<DirEntryInfo>>, ProviderError> {
        let Some(read_dir) = self.read_dir.as_mut() else {
            return Ok(None);
        };

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut exhausted = false;
        while batch.len() < self.batch_size {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(ProviderError::Cancelled { path: self.dir.clone() });
                }
                next = read_dir.next_entry() => next,
            };

            let entry = match next {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    exhausted = true;
                    break;
                }
                Err(e) => return Err(ProviderError::io(&self.dir, e)),
            };

            // DirEntry::metadata does not traverse symlinks
            match entry.metadata().await {
                Ok(meta) => batch.push(DirEntryInfo {
                    name: entry.file_name(),
                    path: entry.path(),
                    metadata: EntryMetadata::from_fs(&meta),
                }),
                // Removed between listing and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ProviderError::io(entry.path(), e)),
            }
        }

        if exhausted {
            self.read_dir = None;
        }

        if batch.is_empty() && exhausted {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }

    fn close(&mut self) {
        self.read_dir = None;
    }
}
