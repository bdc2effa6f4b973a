//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Filesystem indexing daemon
#[derive(Parser, Debug)]
#[command(
    name = "fsindexd",
    version = env!("CARGO_PKG_VERSION"),
    about = "Keep a resource store in sync with directory trees",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "FSINDEXD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl roots and bring the store up to date
    #[command(
        about = "Index directories into the store",
        after_help = "Examples:\n  fsindexd index ~/Documents ~/Music\n  fsindexd index --watch\n  fsindexd index --no-recurse --priority ~/Downloads"
    )]
    Index {
        /// Directories to index (defaults to the configured roots)
        #[arg(value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Keep running and follow live changes until Ctrl-C
        #[arg(short, long)]
        watch: bool,

        /// Only index the immediate children of each path
        #[arg(long)]
        no_recurse: bool,

        /// Schedule these paths ahead of configured roots
        #[arg(long)]
        priority: bool,

        /// Store file to use (overrides store.state_path)
        #[arg(long, value_name = "FILE")]
        store: Option<PathBuf>,
    },

    /// Show current configuration settings
    #[command(about = "Print the effective settings as TOML")]
    Config,
}
