//! Registered roots and the "is this path indexable?" question.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::crawler::IndexingFilter;
use crate::root::Root;
use crate::types::RootId;

#[derive(Debug, Default)]
pub struct IndexingTree {
    roots: HashMap<RootId, Root>,
}

impl IndexingTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: RootId, root: Root) -> Option<Root> {
        self.roots.insert(id, root)
    }

    pub fn remove(&mut self, id: RootId) -> Option<Root> {
        self.roots.remove(&id)
    }

    pub fn get(&self, id: RootId) -> Option<&Root> {
        self.roots.get(&id)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<(RootId, &Root)> {
        self.roots
            .iter()
            .find(|(_, root)| root.path == path)
            .map(|(id, root)| (*id, root))
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RootId, &Root)> {
        self.roots.iter().map(|(id, root)| (*id, root))
    }

    /// The deepest root covering `path`.
    pub fn owner_of(&self, path: &Path) -> Option<(RootId, &Root)> {
        self.roots
            .iter()
            .filter(|(_, root)| root.covers(path))
            .max_by_key(|(_, root)| root.path.components().count())
            .map(|(id, root)| (*id, root))
    }

    /// Whether `path` belongs in the store under the current roots and filter.
    ///
    /// The path itself and every directory between it and its root must pass
    /// the filter. Paths under ignored roots are never indexable.
    pub fn is_indexable(&self, path: &Path, is_dir: bool, filter: &dyn IndexingFilter) -> bool {
        let Some((_, root)) = self.owner_of(path) else {
            return false;
        };
        if root.is_ignored() {
            return false;
        }
        if path == root.path {
            return true;
        }
        if !filter.accept(path, is_dir) {
            return false;
        }

        let mut between: Vec<PathBuf> = Vec::new();
        for ancestor in path.ancestors().skip(1) {
            if ancestor == root.path {
                break;
            }
            between.push(ancestor.to_path_buf());
        }
        between.iter().all(|dir| filter.accept_directory(dir))
    }
}
