//! Scraper contract, registry and runner.
//!
//! Scrapers record every URL they handle in the ledger, so a rerun skips
//! what is already done and reconciliation can tell what is missing.

pub mod link_list;
mod registry;
mod runner;

pub use link_list::{LinkListConfig, LinkListScraper};
pub use registry::ScraperRegistry;
pub use runner::{RunOptions, ScraperRunner};

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dispatch::CancelToken;
use crate::ingest::IngestionWorkflow;
use crate::repository::LedgerRepository;

/// Where scraped documents are pushed after download.
#[derive(Clone)]
pub struct IngestTarget {
    pub workflow: IngestionWorkflow,
    pub collection: String,
}

/// Everything a scraper needs for one invocation.
#[derive(Clone)]
pub struct ScrapeContext {
    pub ledger: LedgerRepository,
    pub ingest: Option<IngestTarget>,
    pub cancel: CancelToken,
    /// List what would be fetched without touching the ledger or disk.
    pub dry_run: bool,
    pub max_pages: Option<usize>,
    pub documents_dir: PathBuf,
}

impl ScrapeContext {
    pub fn new(ledger: LedgerRepository, documents_dir: impl Into<PathBuf>) -> Self {
        Self {
            ledger,
            ingest: None,
            cancel: CancelToken::new(),
            dry_run: false,
            max_pages: None,
            documents_dir: documents_dir.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Summary of one scraper run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeOutcome {
    pub pages: usize,
    pub discovered: usize,
    /// Already in the ledger, not fetched again.
    pub skipped: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub ingested: usize,
    /// URLs a dry run would have fetched.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub would_download: Vec<String>,
    pub cancelled: bool,
}

/// A candidate document shown by `preview`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewItem {
    pub url: String,
    pub title: String,
    pub already_processed: bool,
}

#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Fetch new documents. Must check `ctx.cancel` between pages and
    /// documents.
    async fn run(&self, ctx: &ScrapeContext) -> anyhow::Result<ScrapeOutcome>;

    /// List candidate documents without fetching them.
    async fn preview(&self, _ctx: &ScrapeContext) -> anyhow::Result<Vec<PreviewItem>> {
        Ok(Vec::new())
    }
}

/// Extract a human-readable title from the last URL segment.
pub fn extract_title_from_url(url: &str) -> String {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/')
        .split('/')
        .next_back()
        .unwrap_or("untitled");
    let name = match path.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => path,
    };
    if name.is_empty() {
        return "untitled".to_string();
    }
    name.replace(['_', '-'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_title_from_url() {
        assert_eq!(
            extract_title_from_url("https://example.org/vault/file_one-final.pdf"),
            "file one final"
        );
        assert_eq!(
            extract_title_from_url("https://example.org/docs/report.pdf?dl=1"),
            "report"
        );
        assert_eq!(extract_title_from_url("https://example.org/reading-room/"), "reading room");
        assert_eq!(extract_title_from_url(""), "untitled");
    }
}
