//! Breadth-first directory crawler.
//!
//! # Architecture
//!
//! ```text
//! Crawler::crawl(root)
//!   queue: [root]
//!     pop dir ──> DataProvider::begin(dir) ──> next_batch()* ──> children
//!                 file / directory filter per child
//!                 directory-content filter over all children
//!                 accepted files ──> tree
//!                 accepted dirs  ──> queue (recurse) | tree (no recurse)
//! ```
//!
//! The result is handed over whole: a cancelled or failed crawl never
//! reports a partial tree.

mod error;
mod filter;
mod provider;
mod tree;

pub use error::{CrawlError, ProviderError};
pub use filter::{AcceptAll, IndexingFilter, PatternFilter};
pub use provider::{DataProvider, DirEntryInfo, Enumerator, LocalProvider};
pub use tree::{CrawlNode, CrawlOutput, CrawlStats, CrawlTree, NodeId};

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::root::RootFlags;
use crate::types::EntryMetadata;

/// Default number of entries requested per enumeration round-trip.
pub const DEFAULT_BATCH_SIZE: usize = 64;

struct PendingDir {
    path: PathBuf,
    metadata: EntryMetadata,
    parent: Option<NodeId>,
}

/// Enumerates a directory tree through a [`DataProvider`], applying an
/// [`IndexingFilter`].
#[derive(Clone)]
pub struct Crawler {
    provider: Arc<dyn DataProvider>,
    filter: Arc<dyn IndexingFilter>,
    batch_size: usize,
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl Crawler {
    pub fn new(provider: Arc<dyn DataProvider>, filter: Arc<dyn IndexingFilter>) -> Self {
        Self {
            provider,
            filter,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Entries requested per enumeration round-trip.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn filter(&self) -> &Arc<dyn IndexingFilter> {
        &self.filter
    }

    pub fn provider(&self) -> &Arc<dyn DataProvider> {
        &self.provider
    }

    /// Crawl `root` once.
    ///
    /// Without [`RootFlags::RECURSE`] only the root's immediate children are
    /// visited. A missing root yields an empty tree; an unreadable root is
    /// reported in [`CrawlOutput::skipped`].
    pub async fn crawl(
        &self,
        root: &Path,
        flags: RootFlags,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutput, CrawlError> {
        let recurse = flags.contains(RootFlags::RECURSE);
        let mut output = CrawlOutput {
            root: root.to_path_buf(),
            ..Default::default()
        };

        if cancel.is_cancelled() {
            return Err(CrawlError::Cancelled {
                root: root.to_path_buf(),
            });
        }

        let root_meta = match self.provider.query_info(root).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => {
                crate::debug_event!("crawler", "root missing", "{}", root.display());
                return Ok(output);
            }
            Err(e) if e.is_transient() => {
                crate::debug_event!("crawler", "root unreadable", "{}: {e}", root.display());
                output.stats.directories_ignored += 1;
                output.skipped.push(root.to_path_buf());
                return Ok(output);
            }
            Err(e) => return Err(e.into()),
        };
        if !root_meta.is_dir() {
            return Err(CrawlError::NotADirectory {
                root: root.to_path_buf(),
            });
        }

        let mut queue = VecDeque::new();
        queue.push_back(PendingDir {
            path: root.to_path_buf(),
            metadata: root_meta,
            parent: None,
        });

        while let Some(dir) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled {
                    root: root.to_path_buf(),
                });
            }

            let children = match self.list_children(&dir.path, cancel).await {
                Ok(children) => children,
                Err(e) if e.is_cancelled() => {
                    return Err(CrawlError::Cancelled {
                        root: root.to_path_buf(),
                    });
                }
                Err(e) if e.is_transient() => {
                    crate::debug_event!("crawler", "skipped", "{}: {e}", dir.path.display());
                    Self::reclassify_ignored(&mut output.stats, dir.parent.is_some());
                    output.skipped.push(dir.path);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if !self.filter.accept_directory_contents(&dir.path, &children) {
                crate::debug_event!("crawler", "rejected by contents", "{}", dir.path.display());
                Self::reclassify_ignored(&mut output.stats, dir.parent.is_some());
                continue;
            }

            let node = output.tree.insert(dir.path, dir.metadata, dir.parent);

            for child in children {
                if child.is_dir() {
                    if !self.filter.accept_directory(&child.path) {
                        output.stats.directories_ignored += 1;
                        continue;
                    }
                    output.stats.directories_found += 1;
                    if recurse {
                        queue.push_back(PendingDir {
                            path: child.path,
                            metadata: child.metadata,
                            parent: Some(node),
                        });
                    } else {
                        output.tree.insert(child.path, child.metadata, Some(node));
                    }
                } else {
                    if !self.filter.accept_file(&child.path) {
                        output.stats.files_ignored += 1;
                        continue;
                    }
                    output.stats.files_found += 1;
                    output.tree.insert(child.path, child.metadata, Some(node));
                }
            }
        }

        crate::debug_event!(
            "crawler",
            "finished",
            "{}: {} dirs ({} ignored), {} files ({} ignored)",
            root.display(),
            output.stats.directories_found,
            output.stats.directories_ignored,
            output.stats.files_found,
            output.stats.files_ignored
        );

        Ok(output)
    }

    /// Enumerate every child of `dir` through bounded batches.
    async fn list_children(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirEntryInfo>, ProviderError> {
        let mut enumerator = self.provider.begin(dir, self.batch_size, cancel).await?;
        let mut children = Vec::new();

        loop {
            match enumerator.next_batch().await {
                Ok(Some(batch)) => children.extend(batch),
                Ok(None) => break,
                Err(e) => {
                    enumerator.close();
                    return Err(e);
                }
            }
        }

        enumerator.close();
        Ok(children)
    }

    /// A directory counted as found while listing its parent turned out to be ignored.
    fn reclassify_ignored(stats: &mut CrawlStats, counted_as_found: bool) {
        if counted_as_found {
            stats.directories_found = stats.directories_found.saturating_sub(1);
        }
        stats.directories_ignored += 1;
    }
}
