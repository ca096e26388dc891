//! Shared helper functions for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use console::style;
use tracing::warn;

use crate::clients::{
    ArchiveClient, CommandParser, DocumentParser, IndexClient, PaperlessArchiveClient,
    RagflowIndexClient,
};
use crate::config::{Config, Settings};
use crate::ingest::{IngestConfig, IngestionWorkflow};
use crate::reconcile::ReconciliationService;
use crate::repository::LedgerRepository;
use crate::scrapers::{IngestTarget, LinkListScraper, ScraperRegistry, ScraperRunner};

/// Open the database and make sure the ledger tables exist.
pub async fn open_ledger(settings: &Settings) -> anyhow::Result<LedgerRepository> {
    if settings.database_url.is_none() {
        settings.ensure_directories()?;
    }
    let ctx = settings
        .create_db_context()
        .context("Failed to open database")?;
    let ledger = ctx.ledger();
    ledger
        .ensure_schema()
        .await
        .with_context(|| format!("Failed to prepare schema in {}", ctx.display_url()))?;
    Ok(ledger)
}

pub fn archive_client(settings: &Settings, config: &Config) -> anyhow::Result<Arc<dyn ArchiveClient>> {
    let client = PaperlessArchiveClient::new(config.archive.clone(), &settings.user_agent)?;
    Ok(Arc::new(client))
}

/// Index client and collection, or `None` when either is not configured.
pub fn index_target(
    settings: &Settings,
    config: &Config,
) -> anyhow::Result<Option<(Arc<dyn IndexClient>, String)>> {
    let client = RagflowIndexClient::new(config.index.clone(), &settings.user_agent)?;
    if !client.is_configured() {
        return Ok(None);
    }
    let Some(collection) = config.index.collection.clone() else {
        warn!("Index configured without a collection, ignoring it");
        return Ok(None);
    };
    let client: Arc<dyn IndexClient> = Arc::new(client);
    Ok(Some((client, collection)))
}

/// Parser from the config, or `None` if its command is not on `PATH`.
pub fn document_parser(config: &Config) -> Option<Arc<dyn DocumentParser>> {
    let parser = CommandParser::new(config.parser.command.clone());
    if parser.is_available() {
        Some(Arc::new(parser))
    } else {
        warn!("Parser command '{}' not found", config.parser.command);
        None
    }
}

pub fn reconciler(
    settings: &Settings,
    config: &Config,
    ledger: &LedgerRepository,
) -> anyhow::Result<ReconciliationService> {
    let mut service = ReconciliationService::new(ledger.clone(), archive_client(settings, config)?);
    if let Some((index, collection)) = index_target(settings, config)? {
        service = service.with_index(index, collection);
    }
    if let Some(parser) = document_parser(config) {
        service = service.with_parser(parser);
    }
    Ok(service)
}

pub fn build_registry(settings: &Settings, config: &Config) -> anyhow::Result<ScraperRegistry> {
    let mut registry = ScraperRegistry::new();
    for (name, scraper_config) in &config.scrapers {
        let scraper = LinkListScraper::new(
            name.clone(),
            scraper_config.clone(),
            &settings.user_agent,
            Duration::from_secs(settings.request_timeout),
        )
        .with_context(|| format!("Failed to build scraper {}", name))?;
        registry.register(Arc::new(scraper));
    }
    Ok(registry)
}

pub fn build_runner(
    settings: &Settings,
    config: &Config,
    ledger: &LedgerRepository,
) -> anyhow::Result<ScraperRunner> {
    let registry = Arc::new(build_registry(settings, config)?);
    let mut runner = ScraperRunner::new(registry, ledger.clone(), settings.documents_dir.clone())
        .with_reconciler(reconciler(settings, config, ledger)?);
    if let Some((index, collection)) = index_target(settings, config)? {
        let workflow = IngestionWorkflow::new(index, IngestConfig::from(&config.index));
        runner = runner.with_ingest(IngestTarget {
            workflow,
            collection,
        });
    }
    Ok(runner)
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Print a refusal and return false unless `confirm` is set.
pub fn require_confirm(confirm: bool, action: &str, name: &str) -> bool {
    if !confirm {
        println!(
            "{} This will {} for '{}'. Re-run with --confirm to proceed.",
            style("!").yellow(),
            action,
            name
        );
    }
    confirm
}

/// Print up to `max` items of a URL list under a heading.
pub fn print_url_list(heading: &str, urls: &[String], max: usize) {
    if urls.is_empty() {
        return;
    }
    println!("\n{} ({})", style(heading).bold(), urls.len());
    for url in urls.iter().take(max) {
        println!("  {}", url);
    }
    if urls.len() > max {
        println!("  {}", style(format!("... and {} more", urls.len() - max)).dim());
    }
}
