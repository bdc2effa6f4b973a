//! Arena-backed result tree of a single crawl pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::{EntryKind, EntryMetadata};

/// Index of a node inside its [`CrawlTree`].
pub type NodeId = usize;

/// One accepted entry produced by a crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlNode {
    pub path: PathBuf,
    pub metadata: EntryMetadata,
    pub parent: Option<NodeId>,
    pub depth: usize,
}

impl CrawlNode {
    pub fn kind(&self) -> EntryKind {
        self.metadata.kind
    }

    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }
}

/// Accepted entries of one crawl, in breadth-first insertion order.
///
/// Parents are always inserted before their children.
#[derive(Debug, Default, Clone)]
pub struct CrawlTree {
    nodes: Vec<CrawlNode>,
    index: HashMap<PathBuf, NodeId>,
}

impl CrawlTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. Re-inserting a known path returns the existing id.
    pub fn insert(
        &mut self,
        path: PathBuf,
        metadata: EntryMetadata,
        parent: Option<NodeId>,
    ) -> NodeId {
        if let Some(&id) = self.index.get(&path) {
            return id;
        }
        let depth = parent.map(|p| self.nodes[p].depth + 1).unwrap_or(0);
        let id = self.nodes.len();
        self.index.insert(path.clone(), id);
        self.nodes.push(CrawlNode {
            path,
            metadata,
            parent,
            depth,
        });
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&CrawlNode> {
        self.nodes.get(id)
    }

    pub fn find(&self, path: &Path) -> Option<&CrawlNode> {
        self.index.get(path).map(|&id| &self.nodes[id])
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CrawlNode> {
        self.nodes.iter()
    }

    /// Directories in insertion order.
    pub fn directories(&self) -> impl Iterator<Item = &CrawlNode> {
        self.nodes.iter().filter(|n| n.is_dir())
    }

    /// Children of `id`, in insertion order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &CrawlNode> {
        self.nodes.iter().filter(move |n| n.parent == Some(id))
    }

    pub fn into_nodes(self) -> Vec<CrawlNode> {
        self.nodes
    }
}

impl IntoIterator for CrawlTree {
    type Item = CrawlNode;
    type IntoIter = std::vec::IntoIter<CrawlNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

/// Aggregate counters of one crawl.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStats {
    pub directories_found: usize,
    pub directories_ignored: usize,
    pub files_found: usize,
    pub files_ignored: usize,
}

impl CrawlStats {
    pub fn merge(&mut self, other: &CrawlStats) {
        self.directories_found += other.directories_found;
        self.directories_ignored += other.directories_ignored;
        self.files_found += other.files_found;
        self.files_ignored += other.files_ignored;
    }
}

/// Complete result of a successful crawl.
#[derive(Debug, Default, Clone)]
pub struct CrawlOutput {
    pub root: PathBuf,
    pub tree: CrawlTree,
    pub stats: CrawlStats,
    /// Directories whose contents could not be listed (transient errors).
    ///
    /// Nothing is known about what lives under them on disk.
    pub skipped: Vec<PathBuf>,
}

impl CrawlOutput {
    /// True when `path` is at or under a skipped directory.
    pub fn is_unknown(&self, path: &Path) -> bool {
        self.skipped.iter().any(|s| path.starts_with(s))
    }
}
