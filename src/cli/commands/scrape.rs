//! Scraper commands.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use super::helpers::{build_registry, build_runner, format_time, open_ledger, print_url_list};
use crate::config::{Config, Settings};
use crate::dispatch::{JobDispatcher, JobSnapshot, JobStatus};
use crate::scrapers::{PreviewItem, RunOptions, ScrapeOutcome, Scraper};

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Run a scraper as a dispatched job. Ctrl-C requests cancellation and
/// waits for the scraper to stop at its next checkpoint.
pub async fn cmd_run(
    settings: &Settings,
    config: &Config,
    name: &str,
    dry_run: bool,
    max_pages: Option<usize>,
    skip_preflight: bool,
) -> anyhow::Result<()> {
    let ledger = open_ledger(settings).await?;
    let runner = build_runner(settings, config, &ledger)?;
    let dispatcher = JobDispatcher::new();

    let options = RunOptions {
        dry_run,
        max_pages,
        skip_preflight,
    };
    let queued = runner.dispatch(&dispatcher, name, options)?;

    let pb = spinner(format!(
        "Running {}{}",
        name,
        if dry_run { " (dry run)" } else { "" }
    ));

    let finished = tokio::select! {
        done = dispatcher.wait(name) => done?,
        _ = tokio::signal::ctrl_c() => {
            pb.set_message(format!("Cancelling {} after the current document", name));
            dispatcher.cancel(name);
            dispatcher.wait(name).await?
        }
    };
    pb.finish_and_clear();

    print_job_result(&queued.run_id, &finished)
}

fn print_job_result(run_id: &str, job: &JobSnapshot) -> anyhow::Result<()> {
    match job.status {
        JobStatus::Error => {
            anyhow::bail!(
                "Run {} failed: {}",
                run_id,
                job.error.as_deref().unwrap_or("unknown error")
            );
        }
        JobStatus::Cancelled => {
            println!("{} Run {} cancelled", style("!").yellow(), run_id);
        }
        _ => {
            println!("{} Run {} finished", style("✓").green(), run_id);
        }
    }

    if let Some(ref value) = job.result {
        let outcome: ScrapeOutcome = serde_json::from_value(value.clone()).unwrap_or_default();
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &ScrapeOutcome) {
    println!("  Pages:       {}", outcome.pages);
    println!("  Discovered:  {}", outcome.discovered);
    println!("  Downloaded:  {}", style(outcome.downloaded).green());
    println!("  Skipped:     {}", outcome.skipped);
    if outcome.failed > 0 {
        println!("  Failed:      {}", style(outcome.failed).red());
    }
    if outcome.ingested > 0 {
        println!("  Indexed:     {}", outcome.ingested);
    }
    print_url_list("Would download", &outcome.would_download, 20);
}

pub async fn cmd_preview(
    settings: &Settings,
    config: &Config,
    name: &str,
    json: bool,
) -> anyhow::Result<()> {
    let ledger = open_ledger(settings).await?;
    let runner = build_runner(settings, config, &ledger)?;
    let items: Vec<PreviewItem> = runner.preview(name).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("{} {} has no candidate documents", style("!").yellow(), name);
        return Ok(());
    }
    let new = items.iter().filter(|i| !i.already_processed).count();
    println!(
        "{} {} candidates, {} new",
        style(name).bold(),
        items.len(),
        style(new).green()
    );
    for item in &items {
        let marker = if item.already_processed {
            style("·").dim()
        } else {
            style("+").green()
        };
        println!("  {} {}  {}", marker, item.title, style(&item.url).dim());
    }
    Ok(())
}

pub async fn cmd_list(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let registry = build_registry(settings, config)?;
    if registry.is_empty() {
        println!("{} No scrapers configured", style("!").yellow());
        return Ok(());
    }

    let ledger = open_ledger(settings).await?;
    let names = registry.names();
    let last_runs = ledger.get_all_last_run_info(&names).await?;

    for name in &names {
        let description = registry
            .get(name)
            .map(|s| s.description().to_string())
            .unwrap_or_default();
        let activity = match last_runs.get(name).and_then(Option::as_ref) {
            Some(info) => format!(
                "{} processed, last {}",
                info.statistics.total_processed,
                format_time(&info.last_updated)
            ),
            None => "never run".to_string(),
        };
        println!("{}  {}", style(name).bold(), style(activity).dim());
        if !description.is_empty() {
            println!("  {}", description);
        }
    }
    Ok(())
}
