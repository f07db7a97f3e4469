// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! mediasort: classify a folder of photos and videos and file them by category and date

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use mediasort::client::{ClassificationClient, ReqwestTransport};
use mediasort::config::{AppConfig, BackendKind};
use mediasort::db::FingerprintStore;
use mediasort::organizer::Operation;
use mediasort::pipeline::{FileStatus, PipelineEvent, RunSummary, Scheduler, SchedulerHandle};
use mediasort::{Result, SortError};

/// mediasort CLI - AI media classifier and organizer
#[derive(Parser, Debug)]
#[command(name = "mediasort")]
#[command(version)]
#[command(about = "Classify images and videos with a vision model and organize them", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "mediasort.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify everything under SOURCE and organize it into TARGET
    Run {
        source: PathBuf,
        target: PathBuf,

        /// Copy files instead of moving them
        #[arg(long)]
        copy: bool,

        /// Descend into subdirectories
        #[arg(short, long, conflicts_with = "flat")]
        recursive: bool,

        /// Only look at files directly inside SOURCE
        #[arg(long)]
        flat: bool,

        /// Skip image files
        #[arg(long)]
        no_images: bool,

        /// Skip video files
        #[arg(long)]
        no_videos: bool,

        /// Worker count (overrides the backend's max_concurrent)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Skip the backend health check on startup
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Show backend health, models and ledger size
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "mediasort.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

/// Per-run overrides from the command line
#[derive(Debug, Default)]
struct RunOverrides {
    copy: bool,
    recursive: Option<bool>,
    no_images: bool,
    no_videos: bool,
    concurrency: Option<usize>,
}

impl RunOverrides {
    fn apply(&self, config: &mut AppConfig) {
        if self.copy {
            config.organize.operation = Operation::Copy;
        }
        if let Some(recursive) = self.recursive {
            config.media.recursive = recursive;
        }
        if self.no_images {
            config.media.process_images = false;
        }
        if self.no_videos {
            config.media.process_videos = false;
        }
        if let Some(n) = self.concurrency {
            match config.backend {
                BackendKind::Local => config.local.max_concurrent = n,
                BackendKind::Remote => config.remote.max_concurrent = n,
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            source,
            target,
            copy,
            recursive,
            flat,
            no_images,
            no_videos,
            concurrency,
            skip_health_check,
        } => {
            let overrides = RunOverrides {
                copy,
                recursive: match (recursive, flat) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                no_images,
                no_videos,
                concurrency,
            };
            run_sort(config, overrides, &source, &target, skip_health_check, &cli.format, cli.quiet).await
        }
        Commands::Status => run_status(config).await,
        Commands::Config { action } => run_config_command(config, action, &cli.config),
    }
}

async fn run_sort(
    mut config: AppConfig,
    overrides: RunOverrides,
    source: &Path,
    target: &Path,
    skip_health_check: bool,
    format: &str,
    quiet: bool,
) -> Result<()> {
    overrides.apply(&mut config);
    config.validate()?;

    if config.backend == BackendKind::Remote && config.remote.api_key.trim().is_empty() {
        return Err(SortError::AuthMissing);
    }

    if !skip_health_check {
        let client = ClassificationClient::from_config(&config, Arc::new(ReqwestTransport::new()))?;
        info!("Checking {} backend...", client.backend_name());
        client.health_check().await?;
        info!("Backend is reachable");
    }

    let store = FingerprintStore::open(&config.database.path)?;
    let mut scheduler = Scheduler::from_config(config, store)?;
    let handle = scheduler.handle();
    let events = scheduler.take_events();

    let signals = tokio::spawn(stop_on_signal(handle));
    let printer = events.map(|rx| tokio::spawn(print_events(rx, quiet || format == "json")));

    let result = scheduler.run(source, target).await;
    // The listener owns a handle, and with it an event sender.
    signals.abort();
    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(printer) = printer {
                printer.abort();
            }
            return Err(e);
        }
    };
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    print_summary(&summary, format)?;
    if summary.failed > 0 {
        warn!("{} files failed; see the log above", summary.failed);
    }
    Ok(())
}

/// Ctrl+C or SIGTERM asks the run to finish in-flight files and stop
async fn stop_on_signal(handle: SchedulerHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, finishing in-flight files..."),
        _ = terminate => info!("Received SIGTERM, finishing in-flight files..."),
    }

    handle.stop();
}

/// Print per-file lines until the run reports `Finished`; returns the files seen
async fn print_events(mut rx: tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>, silent: bool) -> usize {
    let mut done = 0;
    let mut total = 0;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Progress { total: t, .. } => total = t,
            PipelineEvent::FileDone(outcome) => {
                done += 1;
                if silent {
                    continue;
                }
                let name = outcome.path.display();
                match outcome.status {
                    FileStatus::Organized { category, dest } => {
                        println!("[{}/{}] {} -> {} ({})", done, total, name, category, dest.display())
                    }
                    FileStatus::Skipped { reason } => println!("[{}/{}] {} skipped: {}", done, total, name, reason),
                    FileStatus::Failed { kind, message } => {
                        println!("[{}/{}] {} FAILED [{}]: {}", done, total, name, kind, message)
                    }
                }
            }
            PipelineEvent::Finished(_) => break,
            _ => {}
        }
    }
    done
}

fn print_summary(summary: &RunSummary, format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!();
    println!("Files:     {}", summary.total);
    println!("Organized: {}", summary.succeeded);
    println!("Skipped:   {}", summary.skipped);
    println!("Failed:    {}", summary.failed);
    if summary.stopped_early {
        println!("Stopped early; run again to continue.");
    }
    Ok(())
}

async fn run_status(config: AppConfig) -> Result<()> {
    println!("mediasort v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    let client = ClassificationClient::from_config(&config, Arc::new(ReqwestTransport::new()))?;
    println!("Backend: {}", client.backend_name());
    match client.health_check().await {
        Ok(()) => println!("Health:  OK"),
        Err(e) => println!("Health:  Error - {}", e),
    }

    match client.list_models().await {
        Ok(models) => {
            println!("\nModels:");
            let active = match config.backend {
                BackendKind::Local => vec![config.local.model.clone()],
                BackendKind::Remote => config.remote.models.clone(),
            };
            for m in &models {
                let marker = if active.contains(m) { "→" } else { " " };
                println!("  {} {}", marker, m);
            }
        }
        Err(e) => println!("  Error listing models: {}", e),
    }

    match FingerprintStore::open(&config.database.path) {
        Ok(store) => {
            let stats = store.stats()?;
            println!("\nLedger ({}):", config.database.path);
            println!("  Records: {}", stats.record_count);
        }
        Err(e) => println!("\nLedger: Error - {}", e),
    }

    println!("\nConcurrency: {}", config.max_concurrent());
    Ok(())
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let mut shown = config;
            if !shown.remote.api_key.is_empty() {
                shown.remote.api_key = "********".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Backend: {:?}", config.backend);
            println!("  Categories: {}", config.classify.categories.join(", "));
            println!("  Concurrency: {}", config.max_concurrent());
            println!("  Database: {}", config.database.path);
        }
    }

    Ok(())
}
