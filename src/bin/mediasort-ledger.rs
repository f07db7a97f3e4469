// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! mediasort ledger utility
//!
//! Inspects and maintains the processed-file ledger.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mediasort::config::AppConfig;
use mediasort::db::FingerprintStore;

#[derive(Parser, Debug)]
#[command(name = "mediasort-ledger")]
#[command(version)]
#[command(about = "Inspect and maintain the mediasort processed-file ledger")]
struct Args {
    /// Path to configuration file; its database.path is used
    #[arg(short, long, default_value = "mediasort.json")]
    config: PathBuf,

    /// Ledger database (overrides the configuration)
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: LedgerCommand,
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// List recorded files, newest first
    List {
        /// Maximum number to show (0 for all)
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Record count and per-category totals
    Stats,
    /// Drop records whose file no longer exists
    Purge,
    /// Forget everything so all files are processed again
    Clear {
        /// Required; there is no undo
        #[arg(long)]
        force: bool,
    },
    /// Write all records to a JSON file
    Export { output: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_target(false)
        .init();

    let db_path = match args.database {
        Some(path) => path,
        None => PathBuf::from(AppConfig::load(&args.config)?.database.path),
    };
    if !db_path.exists() {
        eprintln!("Ledger not found: {:?}", db_path);
        eprintln!("Nothing has been processed yet.");
        return Ok(());
    }
    let store = FingerprintStore::open(&db_path)?;

    match args.command {
        LedgerCommand::List { limit } => {
            let records = store.all_records()?;
            let shown = if limit == 0 { records.len() } else { limit.min(records.len()) };
            println!("Ledger ({} records, showing {}):", records.len(), shown);
            println!("{:-<80}", "");
            for (i, record) in records.iter().take(shown).enumerate() {
                println!(
                    "{:3}. [{}] {} ({})",
                    i + 1,
                    record.processed_at.format("%Y-%m-%d %H:%M:%S"),
                    record.path,
                    record.category.as_deref().unwrap_or("-")
                );
            }
        }
        LedgerCommand::Stats => {
            let stats = store.stats()?;
            println!("Records: {}", stats.record_count);
            for (category, count) in &stats.categories {
                println!("  {:<16} {}", category, count);
            }
        }
        LedgerCommand::Purge => {
            let purged = store.purge_missing()?;
            println!("Removed {} stale record(s)", purged);
        }
        LedgerCommand::Clear { force } => {
            if !force {
                eprintln!("Refusing to clear the ledger without --force");
                std::process::exit(2);
            }
            let cleared = store.clear_all()?;
            println!("Cleared {} record(s)", cleared);
        }
        LedgerCommand::Export { output } => {
            let records = store.all_records()?;
            std::fs::write(&output, serde_json::to_string_pretty(&records)?)?;
            println!("Exported {} record(s) to {:?}", records.len(), output);
        }
    }

    Ok(())
}
