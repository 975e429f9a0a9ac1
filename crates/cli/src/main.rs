mod commands;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtgc_core::{
    load_config, metrics, validate_config, Config, GarbageCollector, ProblemType, SanitizedConfig,
    ScanReport, Tally,
};

use commands::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let print_metrics = cli.metrics;
    let outcome = tokio::select! {
        result = run(cli) => result,
        _ = shutdown_signal() => Err(anyhow::anyhow!("Interrupted")),
    };

    if print_metrics {
        if let Err(e) = dump_metrics() {
            warn!("Failed to render metrics: {:#}", e);
        }
    }

    if let Err(e) = outcome {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Loading configuration from {:?}", cli.config);
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    match cli.command {
        Commands::Config => print_json(&SanitizedConfig::from(&config)),
        Commands::Scan { types } => {
            let gc = collector(&config)?;
            let report = gc.scan().await.context("Scan failed")?;
            print_json(&filter_report(report, &types))
        }
        Commands::Cleanup {
            paths,
            types,
            execute,
        } => cleanup(&config, paths, &types, execute).await,
        Commands::RemoveTorrents { ids } => {
            let gc = collector(&config)?;
            let outcome = gc
                .remove_torrents(&ids)
                .await
                .context("Failed to remove torrents")?;
            print_json(&outcome)
        }
    }
}

fn collector(config: &Config) -> Result<GarbageCollector> {
    let gc = GarbageCollector::from_config(config).context("Failed to create rTorrent client")?;
    info!(
        "Using {} with {} data directories",
        gc.directory().name(),
        config.data_dirs.len()
    );
    Ok(gc)
}

fn filter_report(report: ScanReport, types: &[ProblemType]) -> ScanReport {
    if types.is_empty() {
        return report;
    }
    let torrents = report.summary.torrents;
    let items = report
        .items
        .into_iter()
        .filter(|item| types.contains(&item.problem))
        .collect();
    ScanReport::new(torrents, items)
}

#[derive(Serialize)]
struct DryRun<'a> {
    dry_run: bool,
    targets: &'a [PathBuf],
    selection: Tally,
}

async fn cleanup(
    config: &Config,
    mut targets: Vec<PathBuf>,
    types: &[ProblemType],
    execute: bool,
) -> Result<()> {
    let gc = collector(config)?;

    let report = if !types.is_empty() || !execute {
        Some(gc.scan().await.context("Scan failed")?)
    } else {
        None
    };
    if let Some(report) = &report {
        for path in report.paths_of(types) {
            if !targets.contains(&path) {
                targets.push(path);
            }
        }
    }

    if targets.is_empty() {
        info!("Nothing to clean up");
        return Ok(());
    }

    gc.coordinator()
        .check_containment(&targets)
        .await
        .context("Refusing to touch paths outside the data directories")?;

    if !execute {
        let selection = report
            .as_ref()
            .map(|r| r.selection(&targets))
            .unwrap_or_default();
        info!(
            "Dry run: would remove {} paths ({} bytes reported by scan). Pass --execute to remove.",
            targets.len(),
            selection.size
        );
        return print_json(&DryRun {
            dry_run: true,
            targets: &targets,
            selection,
        });
    }

    let result = gc.cleanup(&targets).await.context("Cleanup failed")?;
    print_json(&result)?;
    if !result.is_complete() {
        bail!("{} of {} targets failed", result.failures.len(), targets.len());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{out}");
    Ok(())
}

fn dump_metrics() -> Result<()> {
    let registry = Registry::new();
    metrics::register_all(&registry)?;
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    eprint!("{}", String::from_utf8_lossy(&buffer));
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("Shutdown signal received, aborting; completed deletions are not rolled back");
}
