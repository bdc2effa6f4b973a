//! Store mutations produced by the resource-graph generator.
//!
//! The scheduler treats statements as opaque payloads: it batches them and
//! hands them to [`ResourceStore::apply_batch`](super::ResourceStore::apply_batch).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{EntryKind, ResourceId};

/// One pending store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Statement {
    /// Insert a resource or refresh an existing one.
    Upsert {
        path: PathBuf,
        kind: EntryKind,
        mtime: i64,
        size: u64,
        content_hash: Option<String>,
        container: Option<ResourceId>,
        attributes_only: bool,
    },
    /// Remove a resource, and everything below it when `recursive`.
    Delete { path: PathBuf, recursive: bool },
    /// Re-home a resource, and everything below it when `recursive`.
    Move {
        from: PathBuf,
        to: PathBuf,
        recursive: bool,
    },
}

impl Statement {
    /// The path this statement leaves behind in the store.
    pub fn path(&self) -> &Path {
        match self {
            Statement::Upsert { path, .. } | Statement::Delete { path, .. } => path,
            Statement::Move { to, .. } => to,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Statement::Delete { .. })
    }

    /// SPARQL-like update text, for logging.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            Statement::Upsert {
                path,
                kind,
                mtime,
                size,
                content_hash,
                container,
                attributes_only,
            } => {
                let class = match kind {
                    EntryKind::Directory => "nfo:Folder",
                    EntryKind::File | EntryKind::Symlink => "nfo:FileDataObject",
                };
                let verb = if *attributes_only {
                    "UPDATE ATTRIBUTES"
                } else {
                    "INSERT OR REPLACE"
                };
                let _ = write!(
                    out,
                    "{verb} {{ <{}> a {class} ; nfo:fileLastModified {mtime} ; nfo:fileSize {size}",
                    file_url(path)
                );
                if let Some(container) = container {
                    let _ = write!(out, " ; nfo:belongsToContainer <{container}>");
                }
                if let Some(hash) = content_hash {
                    let _ = write!(out, " ; fsi:contentHash \"{hash}\"");
                }
                out.push_str(" }");
            }
            Statement::Delete { path, recursive } => {
                let url = file_url(path);
                if *recursive {
                    let _ = write!(
                        out,
                        "DELETE {{ ?r a rdfs:Resource }} WHERE {{ ?r nie:url ?u . \
                         FILTER (?u = \"{url}\" || STRSTARTS(?u, \"{url}/\")) }}"
                    );
                } else {
                    let _ = write!(out, "DELETE {{ <{url}> a rdfs:Resource }}");
                }
            }
            Statement::Move {
                from,
                to,
                recursive,
            } => {
                let (from, to) = (file_url(from), file_url(to));
                let scope = if *recursive { "SUBTREE" } else { "RESOURCE" };
                let _ = write!(out, "MOVE {scope} <{from}> TO <{to}>");
            }
        }
        out
    }
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}
