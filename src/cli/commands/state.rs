//! Ledger state commands.

use std::path::Path;

use anyhow::Context;
use console::style;

use super::helpers::{format_time, open_ledger, require_confirm};
use crate::config::Settings;
use crate::models::{LegacyScraperState, ProcessingStatus, ScraperStatistics};

fn print_statistics(stats: &ScraperStatistics) {
    println!("  Processed:   {}", stats.total_processed);
    println!("  Downloaded:  {}", style(stats.total_downloaded).green());
    println!("  Skipped:     {}", stats.total_skipped);
    println!("  Failed:      {}", style(stats.total_failed).red());
}

pub async fn cmd_show(settings: &Settings, name: Option<&str>) -> anyhow::Result<()> {
    let ledger = open_ledger(settings).await?;
    let names = match name {
        Some(name) => vec![name.to_string()],
        None => ledger.list_scrapers().await?,
    };
    if names.is_empty() {
        println!("{} Ledger is empty", style("!").yellow());
        return Ok(());
    }

    let infos = ledger.get_all_last_run_info(&names).await?;
    for name in &names {
        println!("\n{}", style(name).bold());
        println!("{}", "-".repeat(40));
        match infos.get(name).and_then(Option::as_ref) {
            Some(info) => {
                println!("  Created:     {}", format_time(&info.created_at));
                println!("  Updated:     {}", format_time(&info.last_updated));
                print_statistics(&info.statistics);
                if !info.custom_values.is_empty() {
                    println!("  Custom:");
                    for (key, value) in &info.custom_values {
                        println!("    {} = {}", key, value);
                    }
                }
            }
            None => println!("  {}", style("No state recorded").dim()),
        }
    }
    Ok(())
}

pub async fn cmd_urls(
    settings: &Settings,
    name: &str,
    status: Option<ProcessingStatus>,
    limit: Option<i64>,
) -> anyhow::Result<()> {
    let ledger = open_ledger(settings).await?;
    let records = ledger.get_processed_url_records(name, status, limit).await?;
    if records.is_empty() {
        println!("{} No processed URLs for {}", style("!").yellow(), name);
        return Ok(());
    }

    for record in &records {
        let status = match record.status {
            ProcessingStatus::Downloaded => style(record.status.as_str()).green(),
            ProcessingStatus::Failed => style(record.status.as_str()).red(),
            _ => style(record.status.as_str()).dim(),
        };
        println!(
            "{}  {:<10}  {}",
            style(format_time(&record.processed_at)).dim(),
            status,
            record.url
        );
    }
    Ok(())
}

pub async fn cmd_clear(settings: &Settings, name: &str, confirm: bool) -> anyhow::Result<()> {
    if !require_confirm(confirm, "forget every processed URL and zero the counters", name) {
        return Ok(());
    }
    let ledger = open_ledger(settings).await?;
    let removed = ledger.clear(name).await?;
    println!(
        "{} Cleared {} URLs for {} (custom values kept)",
        style("✓").green(),
        removed,
        name
    );
    Ok(())
}

pub async fn cmd_delete(settings: &Settings, name: &str, confirm: bool) -> anyhow::Result<()> {
    if !require_confirm(confirm, "delete all ledger state", name) {
        return Ok(());
    }
    let ledger = open_ledger(settings).await?;
    if ledger.delete_scraper(name).await? {
        println!("{} Deleted ledger for {}", style("✓").green(), name);
    } else {
        println!("{} No ledger for {}", style("!").yellow(), name);
    }
    Ok(())
}

pub async fn cmd_remove_url(settings: &Settings, name: &str, url: &str) -> anyhow::Result<()> {
    let ledger = open_ledger(settings).await?;
    if ledger.remove_url(name, url).await? {
        println!("{} Removed {} (counters unchanged)", style("✓").green(), url);
    } else {
        println!("{} {} was not recorded for {}", style("!").yellow(), url, name);
    }
    Ok(())
}

pub async fn cmd_import(settings: &Settings, name: &str, file: &Path) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let legacy: LegacyScraperState = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse legacy state {}", file.display()))?;

    let ledger = open_ledger(settings).await?;
    let summary = ledger.import_from_json(name, &legacy).await?;
    println!(
        "{} Imported {} URLs for {} ({} already present)",
        style("✓").green(),
        summary.urls_imported,
        name,
        summary.urls_skipped
    );
    print_statistics(&ledger.get_statistics(name).await?);
    Ok(())
}
