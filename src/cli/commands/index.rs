//! Index command - crawl roots once, optionally keep following changes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};

use crate::config::Settings;
use crate::miner::{Miner, MinerReport, RootOutcome};
use crate::notifier::NotifierNotice;
use crate::root::{Root, RootFlags};
use crate::store::MemoryStore;

/// Arguments for the index command.
pub struct IndexArgs {
    pub paths: Vec<PathBuf>,
    pub watch: bool,
    pub no_recurse: bool,
    pub priority: bool,
    pub store: Option<PathBuf>,
}

/// Roots named on the command line, or the configured ones.
pub fn resolve_roots(args: &IndexArgs, settings: &Settings) -> anyhow::Result<Vec<Root>> {
    if args.paths.is_empty() {
        return Ok(settings.root_list());
    }

    let mut flags = RootFlags::default();
    flags.set(RootFlags::RECURSE, !args.no_recurse);
    flags.set(RootFlags::PRIORITY, args.priority);

    args.paths
        .iter()
        .map(|path| {
            let path = path
                .canonicalize()
                .with_context(|| format!("Cannot resolve {}", path.display()))?;
            Ok(Root::new(path, flags))
        })
        .collect()
}

/// Run the index command.
pub async fn run(args: IndexArgs, settings: Settings) -> anyhow::Result<()> {
    let roots = resolve_roots(&args, &settings)?;
    if roots.is_empty() {
        bail!("No roots to index. Pass paths or add [[roots]] entries to settings.toml");
    }

    let state_path = args
        .store
        .clone()
        .unwrap_or_else(|| settings.store.state_path.clone());
    let store = Arc::new(
        MemoryStore::load(&state_path)
            .with_context(|| format!("Cannot load store from {}", state_path.display()))?,
    );
    let before = store.len();

    let mut miner = Miner::builder()
        .settings(settings)
        .store(store.clone())
        .watch(args.watch)
        .build()?;

    for root in roots {
        miner.add_root(root).await?;
    }
    miner.start().await?;

    let report = miner.wait_idle().await?;
    print_report(&report);
    store
        .save(&state_path)
        .with_context(|| format!("Cannot save store to {}", state_path.display()))?;
    eprintln!(
        "Store: {} resources ({:+})",
        store.len(),
        store.len() as i64 - before as i64
    );

    if args.watch {
        eprintln!("Watching for changes. Press Ctrl-C to stop.");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                notice = miner.notices().recv() => match notice {
                    Some(NotifierNotice::RootFinished { root, path, summary, error }) => {
                        print_outcome(&RootOutcome { root, path, summary, error });
                        store.save(&state_path)?;
                    }
                    Some(NotifierNotice::PathFailed { path, error, .. }) => {
                        eprintln!("  failed {}: {error}", path.display());
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    }

    miner.shutdown().await?;
    store.save(&state_path)?;

    if report.is_clean() {
        Ok(())
    } else {
        bail!("Indexing finished with errors")
    }
}

fn print_report(report: &MinerReport) {
    for outcome in &report.finished {
        print_outcome(outcome);
    }
    for path in &report.cancelled {
        println!("{}: cancelled", path.display());
    }
    for (path, error) in &report.failures {
        eprintln!("  failed {}: {error}", path.display());
    }
}

fn print_outcome(outcome: &RootOutcome) {
    let summary = &outcome.summary;
    match &outcome.error {
        Some(error) => eprintln!("{}: {error}", outcome.path.display()),
        None => println!(
            "{}: {} created, {} updated, {} deleted ({} dirs, {} files seen) in {:.2?}",
            outcome.path.display(),
            summary.created,
            summary.updated,
            summary.deleted,
            summary.stats.directories_found,
            summary.stats.files_found,
            summary.elapsed
        ),
    }
}
