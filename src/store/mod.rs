//! Resource store boundary.
//!
//! The pipeline reads what the store knows about a root through
//! [`ResourceStore::query_root_snapshot`] and writes batched
//! [`Statement`]s through [`ResourceStore::apply_batch`].

mod error;
mod generator;
mod memory;
mod statement;

pub use error::{GenerateError, StoreError, StoreResult};
pub use generator::{DefaultGenerator, FileMetadata, ResourceGenerator};
pub use memory::MemoryStore;
pub use statement::Statement;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::types::{EntryKind, ResourceId};

/// What the store knows about one indexed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub mtime: i64,
    pub content_hash: Option<String>,
    pub id: ResourceId,
}

impl StoreRecord {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Every record at or under `root`, in path order.
    async fn query_root_snapshot(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<StoreRecord>>;

    /// Identifier of the resource stored for `path`, if any.
    async fn lookup_identifier(&self, path: &Path) -> StoreResult<Option<ResourceId>>;

    /// Apply `statements` as one combined update.
    ///
    /// The outer error fails the whole batch; otherwise one result per
    /// statement, in order.
    async fn apply_batch(
        &self,
        statements: &[Statement],
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<StoreResult<()>>>;
}
