//! Resource-graph generator: turns a path plus metadata into a [`Statement`].

use std::path::Path;

use super::error::GenerateError;
use super::statement::Statement;
use crate::types::{EntryMetadata, ResourceId};

/// Everything the generator needs to describe one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub entry: EntryMetadata,
    /// Store identifier of the parent directory, when it is indexed.
    pub container: Option<ResourceId>,
    /// Only attributes changed; content need not be re-described.
    pub attributes_only: bool,
}

/// Produces store statements for scheduled events.
pub trait ResourceGenerator: Send + Sync {
    fn generate_create_or_update(
        &self,
        path: &Path,
        metadata: &FileMetadata,
    ) -> Result<Statement, GenerateError>;

    fn generate_delete(&self, path: &Path, is_dir: bool) -> Statement;

    fn generate_move(&self, old_path: &Path, new_path: &Path, recursive: bool) -> Statement;

    /// Hash stamped on every described resource.
    ///
    /// Stored resources carrying a different hash are stale and get
    /// re-described on the next crawl.
    fn content_hash(&self) -> Option<&str> {
        None
    }
}

/// Generator producing typed [`Statement`]s.
#[derive(Debug, Clone, Default)]
pub struct DefaultGenerator {
    content_hash: Option<String>,
}

impl DefaultGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

impl ResourceGenerator for DefaultGenerator {
    fn generate_create_or_update(
        &self,
        path: &Path,
        metadata: &FileMetadata,
    ) -> Result<Statement, GenerateError> {
        if !path.is_absolute() {
            return Err(GenerateError::RelativePath {
                path: path.to_path_buf(),
            });
        }

        Ok(Statement::Upsert {
            path: path.to_path_buf(),
            kind: metadata.entry.kind,
            mtime: metadata.entry.mtime,
            size: metadata.entry.size,
            content_hash: self.content_hash.clone(),
            container: metadata.container,
            attributes_only: metadata.attributes_only,
        })
    }

    fn generate_delete(&self, path: &Path, is_dir: bool) -> Statement {
        Statement::Delete {
            path: path.to_path_buf(),
            recursive: is_dir,
        }
    }

    fn generate_move(&self, old_path: &Path, new_path: &Path, recursive: bool) -> Statement {
        Statement::Move {
            from: old_path.to_path_buf(),
            to: new_path.to_path_buf(),
            recursive,
        }
    }

    fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }
}
