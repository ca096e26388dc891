//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod helpers;
mod init;
mod reconcile;
mod scrape;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::models::ProcessingStatus;

#[derive(Parser)]
#[command(name = "scrapeledger")]
#[command(about = "Processing-state ledger and archive/index reconciliation for document scrapers")]
#[command(version)]
pub struct Cli {
    /// Data directory or database file (overrides config file)
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (default: scrapeledger.toml in the data directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and database schema
    Init,

    /// Run or inspect scrapers
    Scrape {
        #[command(subcommand)]
        command: ScrapeCommands,
    },

    /// Inspect and maintain the processing ledger
    State {
        #[command(subcommand)]
        command: StateCommands,
    },

    /// Compare the ledger against the archive and index
    Reconcile {
        #[command(subcommand)]
        command: ReconcileCommands,
    },
}

#[derive(Subcommand)]
enum ScrapeCommands {
    /// Run a scraper (Ctrl-C cancels after the current document)
    Run {
        name: String,
        /// List what would be downloaded without fetching anything
        #[arg(long)]
        dry_run: bool,
        /// Stop after this many pages
        #[arg(long)]
        max_pages: Option<usize>,
        /// Do not record archived URLs before running
        #[arg(long)]
        skip_preflight: bool,
    },

    /// List candidate documents without downloading
    Preview {
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured scrapers and their last activity
    List,
}

#[derive(Subcommand)]
enum StateCommands {
    /// Show counters for one scraper, or all scrapers
    Show { name: Option<String> },

    /// List processed URLs
    Urls {
        name: String,
        /// Only URLs with this status
        #[arg(long, value_parser = parse_status)]
        status: Option<ProcessingStatus>,
        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Forget every processed URL and zero the counters
    Clear {
        name: String,
        /// Required to actually clear
        #[arg(long)]
        confirm: bool,
    },

    /// Delete a scraper's ledger entirely
    Delete {
        name: String,
        /// Required to actually delete
        #[arg(long)]
        confirm: bool,
    },

    /// Forget one URL so the next run fetches it again
    RemoveUrl { name: String, url: String },

    /// Merge a legacy JSON state file into the ledger
    Import { name: String, file: PathBuf },
}

#[derive(Subcommand)]
enum ReconcileCommands {
    /// Compare ledger, archive and index
    Report {
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record archived URLs missing from the ledger, if any
    Preflight { name: String },

    /// Record every archived URL missing from the ledger
    Rebuild { name: String },

    /// Re-ingest archived documents missing from the index
    SyncGaps {
        name: String,
        /// Only list the gaps
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_status(s: &str) -> Result<ProcessingStatus, String> {
    ProcessingStatus::from_str(s).ok_or_else(|| {
        format!("unknown status '{s}' (expected downloaded, skipped, failed or reconciled)")
    })
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings, &config).await,
        Commands::Scrape { command } => match command {
            ScrapeCommands::Run {
                name,
                dry_run,
                max_pages,
                skip_preflight,
            } => {
                scrape::cmd_run(&settings, &config, &name, dry_run, max_pages, skip_preflight)
                    .await
            }
            ScrapeCommands::Preview { name, json } => {
                scrape::cmd_preview(&settings, &config, &name, json).await
            }
            ScrapeCommands::List => scrape::cmd_list(&settings, &config).await,
        },
        Commands::State { command } => match command {
            StateCommands::Show { name } => state::cmd_show(&settings, name.as_deref()).await,
            StateCommands::Urls {
                name,
                status,
                limit,
            } => state::cmd_urls(&settings, &name, status, limit).await,
            StateCommands::Clear { name, confirm } => {
                state::cmd_clear(&settings, &name, confirm).await
            }
            StateCommands::Delete { name, confirm } => {
                state::cmd_delete(&settings, &name, confirm).await
            }
            StateCommands::RemoveUrl { name, url } => {
                state::cmd_remove_url(&settings, &name, &url).await
            }
            StateCommands::Import { name, file } => {
                state::cmd_import(&settings, &name, &file).await
            }
        },
        Commands::Reconcile { command } => match command {
            ReconcileCommands::Report { name, json } => {
                reconcile::cmd_report(&settings, &config, &name, json).await
            }
            ReconcileCommands::Preflight { name } => {
                reconcile::cmd_preflight(&settings, &config, &name).await
            }
            ReconcileCommands::Rebuild { name } => {
                reconcile::cmd_rebuild(&settings, &config, &name).await
            }
            ReconcileCommands::SyncGaps { name, dry_run } => {
                reconcile::cmd_sync_gaps(&settings, &config, &name, dry_run).await
            }
        },
    }
}
