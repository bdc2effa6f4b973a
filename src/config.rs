//! Layered configuration for the indexing daemon.
//!
//! Sources, later ones overriding earlier ones:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `FSINDEXD_` and use double
//! underscores to separate nested levels:
//! - `FSINDEXD_INDEXING__WORK_POOL_SIZE=8` sets `indexing.work_pool_size`
//! - `FSINDEXD_FILTERS__IGNORE_HIDDEN=false` sets `filters.ignore_hidden`
//! - `FSINDEXD_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::root::{Root, RootFlags};

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "FSINDEXD_CONFIG";

const ENV_PREFIX: &str = "FSINDEXD_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directories to index
    #[serde(default)]
    pub roots: Vec<RootConfig>,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub filters: FilterConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One configured root and its behavior switches.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RootConfig {
    pub path: PathBuf,

    #[serde(default = "default_true")]
    pub recurse: bool,

    /// Watch for live changes after the initial crawl
    #[serde(default = "default_true")]
    pub monitor: bool,

    #[serde(default = "default_true")]
    pub check_mtime: bool,

    #[serde(default = "default_true")]
    pub check_deleted: bool,

    #[serde(default)]
    pub priority: bool,

    /// Keep indexed content when the root is removed or ignored
    #[serde(default)]
    pub preserve: bool,

    #[serde(default)]
    pub ignore: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct IndexingConfig {
    /// Directory entries requested per enumeration round-trip
    #[serde(default = "default_enumeration_batch_size")]
    pub enumeration_batch_size: usize,

    /// Maximum number of events being processed at once
    #[serde(default = "default_work_pool_size")]
    pub work_pool_size: usize,

    /// Statements per store round-trip
    #[serde(default = "default_writeback_batch_size")]
    pub writeback_batch_size: usize,

    /// Store round-trips allowed in flight before intake pauses
    #[serde(default = "default_max_concurrent_flushes")]
    pub max_concurrent_flushes: usize,

    /// Entries in the container-identifier cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Capacity of the scheduler's intake channel
    #[serde(default = "default_event_channel_size")]
    pub event_channel_size: usize,

    /// Hash stamped on every described resource. Stored resources carrying
    /// another hash are described again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Skip entries whose name starts with a dot
    #[serde(default = "default_true")]
    pub ignore_hidden: bool,

    /// Glob patterns matched against file names
    #[serde(default = "default_ignored_files")]
    pub ignored_files: Vec<String>,

    /// Glob patterns matched against directory names
    #[serde(default = "default_ignored_directories")]
    pub ignored_directories: Vec<String>,

    /// Directories containing any of these names are skipped whole
    #[serde(default = "default_ignored_directories_with_content")]
    pub ignored_directories_with_content: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// JSON file backing the resource store
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level applied to every module without an override
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module levels, e.g. `scheduler = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_enumeration_batch_size() -> usize {
    crate::crawler::DEFAULT_BATCH_SIZE
}
fn default_work_pool_size() -> usize {
    num_cpus::get().clamp(2, 16)
}
fn default_writeback_batch_size() -> usize {
    100
}
fn default_max_concurrent_flushes() -> usize {
    2
}
fn default_cache_capacity() -> usize {
    1024
}
fn default_event_channel_size() -> usize {
    256
}
fn default_ignored_files() -> Vec<String> {
    vec!["*~".to_string(), "*.tmp".to_string(), "*.swp".to_string()]
}
fn default_ignored_directories() -> Vec<String> {
    vec!["node_modules".to_string(), "target".to_string(), "lost+found".to_string()]
}
fn default_ignored_directories_with_content() -> Vec<String> {
    vec![".nomedia".to_string(), "backup.metadata".to_string()]
}
fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fsindexd")
        .join("store.json")
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            roots: Vec::new(),
            indexing: IndexingConfig::default(),
            filters: FilterConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            enumeration_batch_size: default_enumeration_batch_size(),
            work_pool_size: default_work_pool_size(),
            writeback_batch_size: default_writeback_batch_size(),
            max_concurrent_flushes: default_max_concurrent_flushes(),
            cache_capacity: default_cache_capacity(),
            event_channel_size: default_event_channel_size(),
            content_hash: None,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ignore_hidden: true,
            ignored_files: default_ignored_files(),
            ignored_directories: default_ignored_directories(),
            ignored_directories_with_content: default_ignored_directories_with_content(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl RootConfig {
    /// A root with default switches.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::from_root(&Root::new(path, RootFlags::default()))
    }

    pub fn flags(&self) -> RootFlags {
        let mut flags = RootFlags::empty();
        flags.set(RootFlags::RECURSE, self.recurse);
        flags.set(RootFlags::MONITOR, self.monitor);
        flags.set(RootFlags::CHECK_MTIME, self.check_mtime);
        flags.set(RootFlags::CHECK_DELETED, self.check_deleted);
        flags.set(RootFlags::PRIORITY, self.priority);
        flags.set(RootFlags::PRESERVE, self.preserve);
        flags.set(RootFlags::IGNORE, self.ignore);
        flags
    }

    pub fn from_root(root: &Root) -> Self {
        let flags = root.flags;
        Self {
            path: root.path.clone(),
            recurse: flags.contains(RootFlags::RECURSE),
            monitor: flags.contains(RootFlags::MONITOR),
            check_mtime: flags.contains(RootFlags::CHECK_MTIME),
            check_deleted: flags.contains(RootFlags::CHECK_DELETED),
            priority: flags.contains(RootFlags::PRIORITY),
            preserve: flags.contains(RootFlags::PRESERVE),
            ignore: flags.contains(RootFlags::IGNORE),
        }
    }
}

impl From<&RootConfig> for Root {
    fn from(config: &RootConfig) -> Self {
        Root::new(config.path.clone(), config.flags())
    }
}

impl Settings {
    /// Load configuration from all sources.
    ///
    /// The file is `$FSINDEXD_CONFIG` when set, else
    /// `<config dir>/fsindexd/settings.toml`. A missing file is not an error.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from a specific file, still honoring environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting levels; single ones stay in field names
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["config"])
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }

    /// Where [`Settings::load`] reads from.
    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fsindexd")
            .join("settings.toml")
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = self.to_toml()?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Configured roots, ready for registration.
    pub fn root_list(&self) -> Vec<Root> {
        self.roots.iter().map(Root::from).collect()
    }
}
