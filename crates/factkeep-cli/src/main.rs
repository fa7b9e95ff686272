use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use factkeep_sync::{Collector, CollectorConfig, CorruptArchivePolicy, CycleOutcome, TextMatch};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "factkeep")]
#[command(about = "Collect random facts into a local JSON archive")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Endpoint returning a JSON object with a `text` field.
    #[arg(long, global = true)]
    url: Option<String>,

    /// Archive file path.
    #[arg(long, global = true)]
    archive: Option<PathBuf>,

    /// Seconds to wait between cycles.
    #[arg(long, global = true)]
    interval_secs: Option<u64>,

    /// abort | reset
    #[arg(long, global = true)]
    on_corrupt: Option<CorruptArchivePolicy>,

    /// exact | normalized
    #[arg(long, global = true)]
    text_match: Option<TextMatch>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect on a fixed interval until Ctrl-C (default).
    Run,
    /// Run a single collection cycle and exit.
    Once,
}

impl Cli {
    fn resolve_config(&self, mut config: CollectorConfig) -> CollectorConfig {
        if let Some(url) = &self.url {
            config.endpoint_url = url.clone();
        }
        if let Some(archive) = &self.archive {
            config.archive_path = archive.clone();
        }
        if let Some(secs) = self.interval_secs {
            config.interval = Duration::from_secs(secs);
        }
        if let Some(policy) = self.on_corrupt {
            config.on_corrupt = policy;
        }
        if let Some(text_match) = self.text_match {
            config.text_match = text_match;
        }
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "factkeep=info,factkeep_sync=info,factkeep_storage=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.resolve_config(CollectorConfig::from_env());
    let collector = Collector::new(config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                info!("interrupt received; stopping (Ctrl-C again to force exit)");
                let _ = stop_tx.send(true);

                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("second interrupt; exiting immediately");
                    std::process::exit(130);
                }
            });

            info!("press Ctrl-C to stop");
            let summary = collector.run_until_stopped(stop_rx).await?;
            println!(
                "collection stopped after {}s: cycles={} added={} duplicates={} fetch_failures={}",
                (summary.finished_at - summary.started_at).num_seconds(),
                summary.cycles,
                summary.added,
                summary.duplicates,
                summary.fetch_failures
            );
        }
        Commands::Once => match collector.run_cycle().await? {
            CycleOutcome::Added { id, text, total } => {
                println!("FACT #{id}: {text}");
                println!("added to archive; archive now holds {total}");
            }
            CycleOutcome::Duplicate { text, total } => {
                println!("FACT: {text}");
                println!("already archived; archive holds {total}");
            }
            CycleOutcome::FetchFailed { reason } => {
                warn!(%reason, "no fact collected this run");
            }
        },
    }

    Ok(())
}
