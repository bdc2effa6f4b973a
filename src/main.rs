use clap::Parser;

use fsindexd::cli::commands::{self, index::IndexArgs};
use fsindexd::cli::{Cli, Commands};
use fsindexd::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    fsindexd::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Index {
            paths,
            watch,
            no_recurse,
            priority,
            store,
        } => {
            let args = IndexArgs {
                paths,
                watch,
                no_recurse,
                priority,
                store,
            };
            commands::index::run(args, settings).await
        }
        Commands::Config => commands::config::run(&settings),
    }
}
