//! Inclusion filters applied during crawling and to live monitor events.

use std::collections::HashSet;
use std::path::Path;

use glob::Pattern;

use super::provider::DirEntryInfo;
use crate::config::FilterConfig;

/// Pluggable inclusion rules, evaluated at three granularities.
///
/// Implementations must be cheap and side-effect free: the crawler calls
/// them for every enumerated entry and the notifier for every live event.
pub trait IndexingFilter: Send + Sync {
    /// Whether a regular file (or symlink) should be indexed.
    fn accept_file(&self, path: &Path) -> bool;

    /// Whether a directory should be indexed and descended into.
    fn accept_directory(&self, path: &Path) -> bool;

    /// Whether a directory should be kept once all its children are known.
    ///
    /// Returning `false` rejects the whole directory, including the children
    /// already listed.
    fn accept_directory_contents(&self, _dir: &Path, _children: &[DirEntryInfo]) -> bool {
        true
    }

    /// Dispatch to the file or directory rule.
    fn accept(&self, path: &Path, is_dir: bool) -> bool {
        if is_dir {
            self.accept_directory(path)
        } else {
            self.accept_file(path)
        }
    }
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl IndexingFilter for AcceptAll {
    fn accept_file(&self, _path: &Path) -> bool {
        true
    }

    fn accept_directory(&self, _path: &Path) -> bool {
        true
    }
}

/// Name-based filter: hidden entries, glob rules, and sentinel files.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    ignore_hidden: bool,
    ignored_files: Vec<Pattern>,
    ignored_directories: Vec<Pattern>,
    ignored_with_content: HashSet<String>,
}

impl PatternFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from configuration, skipping invalid glob patterns.
    pub fn from_config(config: &FilterConfig) -> Self {
        let mut filter = Self::new().ignore_hidden(config.ignore_hidden);
        for pattern in &config.ignored_files {
            filter = filter.ignore_file_pattern(pattern);
        }
        for pattern in &config.ignored_directories {
            filter = filter.ignore_directory_pattern(pattern);
        }
        for name in &config.ignored_directories_with_content {
            filter = filter.ignore_directories_with(name);
        }
        filter
    }

    pub fn ignore_hidden(mut self, ignore: bool) -> Self {
        self.ignore_hidden = ignore;
        self
    }

    /// Reject files whose name matches `pattern`.
    pub fn ignore_file_pattern(mut self, pattern: &str) -> Self {
        match Pattern::new(pattern) {
            Ok(p) => self.ignored_files.push(p),
            Err(e) => tracing::warn!("[filter] invalid file pattern '{pattern}': {e}"),
        }
        self
    }

    /// Reject directories whose name matches `pattern`.
    pub fn ignore_directory_pattern(mut self, pattern: &str) -> Self {
        match Pattern::new(pattern) {
            Ok(p) => self.ignored_directories.push(p),
            Err(e) => tracing::warn!("[filter] invalid directory pattern '{pattern}': {e}"),
        }
        self
    }

    /// Reject any directory containing a child named `name`.
    pub fn ignore_directories_with(mut self, name: &str) -> Self {
        self.ignored_with_content.insert(name.to_string());
        self
    }

    fn is_hidden(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
    }

    fn matches_any(patterns: &[Pattern], path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        patterns.iter().any(|p| p.matches(name))
    }
}

impl IndexingFilter for PatternFilter {
    fn accept_file(&self, path: &Path) -> bool {
        if self.ignore_hidden && Self::is_hidden(path) {
            return false;
        }
        !Self::matches_any(&self.ignored_files, path)
    }

    fn accept_directory(&self, path: &Path) -> bool {
        if self.ignore_hidden && Self::is_hidden(path) {
            return false;
        }
        !Self::matches_any(&self.ignored_directories, path)
    }

    fn accept_directory_contents(&self, _dir: &Path, children: &[DirEntryInfo]) -> bool {
        if self.ignored_with_content.is_empty() {
            return true;
        }
        !children
            .iter()
            .any(|child| self.ignored_with_content.contains(&*child.name_lossy()))
    }
}
