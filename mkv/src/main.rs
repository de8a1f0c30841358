//! `mkv` — maintenance CLI wrapping the reconciler's four passes. Shares
//! `--db`/`--volumes`/`--replicas` with the coordinator; exits non-zero if
//! the chosen pass reports any error.

use clap::Parser;
use clap_blocks::ClusterConfig;
use index::Index;
use observability_deps::tracing::info;
use reconciler::Reconciler;
use trogging::LoggingConfig;

/// Errors surfaced at the CLI boundary.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("could not open index: {0}")]
    OpenIndex(#[from] index::Error),

    #[error("maintenance pass failed: {0}")]
    Reconciler(#[from] reconciler::Error),
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Reconstruct index rows from volume inventories after index loss.
    Rebuild,
    /// Fill in replicas missing from the ring's currently desired placement.
    Rebalance,
    /// Read-only check for under-replication and missing replicas.
    Verify,
    /// Delete volume files not referenced by the index.
    Compact,
}

#[derive(Debug, Parser)]
struct Config {
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    cluster: ClusterConfig,

    #[clap(flatten)]
    logging: LoggingConfig,
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    config.logging.init();

    if let Err(err) = run(config).await {
        observability_deps::tracing::error!(%err, "maintenance pass errored");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), CliError> {
    let index = Index::open(&config.cluster.db)?;
    let ring = config.cluster.build_ring();
    let reconciler = Reconciler::new(&index, &ring, config.cluster.volumes.clone(), config.cluster.replicas);

    let errors = match config.command {
        Command::Rebuild => {
            let report = reconciler.rebuild().await?;
            info!(?report, "rebuild summary");
            println!(
                "scanned {} volumes ({} errors), added {} locators",
                report.volumes_scanned, report.volume_errors, report.locators_added
            );
            report.volume_errors
        }
        Command::Rebalance => {
            let report = reconciler.rebalance().await?;
            info!(?report, "rebalance summary");
            println!(
                "checked {} keys, added {} locators, {} errors",
                report.keys_checked, report.locators_added, report.errors
            );
            report.errors
        }
        Command::Verify => {
            let report = reconciler.verify().await?;
            info!(?report, "verify summary");
            if report.passed() {
                println!("verification passed: checked {} keys", report.keys_checked);
            } else {
                println!("verification failed with {} errors ({} keys checked)", report.errors, report.keys_checked);
            }
            report.errors
        }
        Command::Compact => {
            let report = reconciler.compact().await?;
            info!(?report, "compact summary");
            println!(
                "known digests: {}, deleted {} orphans, {} errors",
                report.known_digests, report.deleted, report.errors
            );
            report.errors
        }
    };

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
