//! fleetform: reconcile a declared cluster.
//!
//! The binary drives the in-process provider, so every run is a dry run of
//! the full protocol: the resulting cluster (with provider identifiers
//! filled in) and a per-resource report are printed or written out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetform::provider::InMemoryProvider;
use fleetform::{Catalog, Cluster, Config, ProviderClient, Reconciler, Report, StaticCatalog};

/// fleetform - cluster reconciliation
#[derive(Parser, Debug)]
#[command(name = "fleetform", version, about)]
struct Args {
    /// Cluster configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the provider completion timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Write the resulting cluster to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which resources would change
    Plan,
    /// Converge every resource
    Apply,
    /// Tear every resource down
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetform=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.reconcile.operation_timeout());

    info!("Cluster {} ({} server pools)", config.cluster.name, config.cluster.server_pools.len());

    let provider: Arc<dyn ProviderClient> = Arc::new(InMemoryProvider::new());
    let catalog: Arc<dyn Catalog> = Arc::new(StaticCatalog::default().merged(&config.catalog));
    let reconciler = Reconciler::for_cluster(&config.cluster, provider, catalog, timeout);

    match args.command {
        Command::Plan => {
            let report = reconciler
                .plan(&config.cluster)
                .await
                .context("Plan failed")?;
            print_report(&report);
        }
        Command::Apply => {
            let (cluster, report) = reconciler
                .reconcile(&config.cluster)
                .await
                .context("Apply failed")?;
            print_report(&report);
            write_cluster(&cluster, args.output.as_ref())?;
        }
        Command::Delete => {
            let (cluster, report) = reconciler
                .destroy(&config.cluster)
                .await
                .context("Delete failed")?;
            print_report(&report);
            write_cluster(&cluster, args.output.as_ref())?;
        }
    }

    Ok(())
}

fn print_report(report: &Report) {
    for entry in &report.entries {
        let drift = if entry.drift.is_empty() {
            String::new()
        } else {
            format!(" [{}]", entry.drift.join(", "))
        };
        eprintln!("{:<16} {:<24} {:?}{}", entry.kind.to_string(), entry.name, entry.state, drift);
    }
}

fn write_cluster(cluster: &Cluster, output: Option<&PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(cluster).context("Failed to serialize cluster")?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}
