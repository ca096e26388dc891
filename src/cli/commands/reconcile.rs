//! Reconciliation commands.

use console::style;

use super::helpers::{format_time, open_ledger, print_url_list, reconciler};
use crate::config::{Config, Settings};

const MAX_LISTED: usize = 25;

pub async fn cmd_report(
    settings: &Settings,
    config: &Config,
    name: &str,
    json: bool,
) -> anyhow::Result<()> {
    let ledger = open_ledger(settings).await?;
    let report = reconciler(settings, config, &ledger)?.get_report(name).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "\n{} {}",
        style(format!("Reconciliation: {}", name)).bold(),
        style(format_time(&report.generated_at)).dim()
    );
    println!("{}", "-".repeat(40));
    println!("  Ledger:   {}", report.state_count);
    println!("  Archive:  {}", report.archive_count);
    match report.index_count {
        Some(count) => println!("  Index:    {}", count),
        None => println!("  Index:    {}", style("unavailable").yellow()),
    }

    print_url_list("Only in ledger", &report.urls_only_in_state, MAX_LISTED);
    print_url_list("Only in archive", &report.urls_only_in_archive, MAX_LISTED);
    print_url_list("Missing from index", &report.urls_missing_from_index, MAX_LISTED);

    if !report.errors.is_empty() {
        println!("\n{}", style("Errors").red().bold());
        for error in &report.errors {
            println!("  {}", error);
        }
    }
    if report.is_consistent() {
        println!("\n{} All stores agree", style("✓").green());
    }
    Ok(())
}

pub async fn cmd_preflight(settings: &Settings, config: &Config, name: &str) -> anyhow::Result<()> {
    let ledger = open_ledger(settings).await?;
    let added = reconciler(settings, config, &ledger)?.preflight_sync(name).await?;
    if added == 0 {
        println!("{} Ledger already covers the archive for {}", style("✓").green(), name);
    } else {
        println!(
            "{} Recorded {} archived URLs for {}",
            style("✓").green(),
            added,
            name
        );
    }
    Ok(())
}

pub async fn cmd_rebuild(settings: &Settings, config: &Config, name: &str) -> anyhow::Result<()> {
    let ledger = open_ledger(settings).await?;
    let added = reconciler(settings, config, &ledger)?.rebuild_state(name).await?;
    println!(
        "{} Rebuilt ledger for {}: {} URLs added",
        style("✓").green(),
        name,
        added
    );
    Ok(())
}

pub async fn cmd_sync_gaps(
    settings: &Settings,
    config: &Config,
    name: &str,
    dry_run: bool,
) -> anyhow::Result<()> {
    let ledger = open_ledger(settings).await?;
    let outcome = reconciler(settings, config, &ledger)?
        .sync_rag_gaps(name, dry_run)
        .await?;

    if outcome.candidates.is_empty() {
        println!("{} Index has every archived document for {}", style("✓").green(), name);
        return Ok(());
    }

    if dry_run {
        print_url_list("Would re-ingest", &outcome.candidates, MAX_LISTED);
        return Ok(());
    }

    println!(
        "{} Re-ingested {} of {} documents",
        style("✓").green(),
        outcome.synced.len(),
        outcome.candidates.len()
    );
    if !outcome.failed.is_empty() {
        println!("\n{} ({})", style("Failed").red().bold(), outcome.failed.len());
        for failure in outcome.failed.iter().take(MAX_LISTED) {
            println!("  {}  {}", failure.url, style(&failure.error).dim());
        }
    }
    Ok(())
}
