//! Initialize command.

use console::style;

use super::helpers::open_ledger;
use crate::config::{Config, Settings, CONFIG_FILENAME};

/// Create the data directory and the ledger schema.
pub async fn cmd_init(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    open_ledger(settings).await?;

    if config.scrapers.is_empty() {
        println!("{} No scrapers configured", style("!").yellow());
        println!(
            "  Add [scrapers.<name>] sections to {}",
            settings.data_dir.join(CONFIG_FILENAME).display()
        );
    } else {
        for name in config.scrapers.keys() {
            println!("  {} Scraper: {}", style("✓").green(), name);
        }
    }

    println!(
        "{} Initialized scrapeledger in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    Ok(())
}
