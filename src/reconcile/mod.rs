//! Reconciliation between the ledger, the archive and the index.
//!
//! The archive is the source of truth for what was stored, so repairs only
//! ever add ledger rows (`reconciled`) or re-ingest archive documents into
//! the index. Nothing is removed from any store.

mod gaps;
mod report;

pub use report::{GapFailure, GapSyncOutcome, ReconciliationReport};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clients::{ArchiveClient, ClientError, DocumentParser, IndexClient};
use crate::models::ProcessingStatus;
use crate::repository::{DieselError, LedgerRepository};

/// Errors from reconciliation operations that cannot degrade gracefully.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Archive unavailable: {0}")]
    ArchiveUnavailable(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Archive error: {0}")]
    Archive(#[from] ClientError),

    #[error("Database error: {0}")]
    Database(#[from] DieselError),

    #[error("{0}")]
    Misconfigured(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Index side of reconciliation: the client plus the collection to compare.
#[derive(Clone)]
pub struct IndexTarget {
    pub client: Arc<dyn IndexClient>,
    pub collection: String,
}

/// Compares and repairs the ledger against the archive and index.
#[derive(Clone)]
pub struct ReconciliationService {
    ledger: LedgerRepository,
    archive: Arc<dyn ArchiveClient>,
    index: Option<IndexTarget>,
    parser: Option<Arc<dyn DocumentParser>>,
}

impl ReconciliationService {
    pub fn new(ledger: LedgerRepository, archive: Arc<dyn ArchiveClient>) -> Self {
        Self {
            ledger,
            archive,
            index: None,
            parser: None,
        }
    }

    pub fn with_index(mut self, client: Arc<dyn IndexClient>, collection: impl Into<String>) -> Self {
        self.index = Some(IndexTarget {
            client,
            collection: collection.into(),
        });
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Cheap guard run before every scraper invocation.
    ///
    /// Returns 0 without writing when the archive is unconfigured,
    /// unreachable, fails to list, or holds nothing the ledger lacks.
    /// Otherwise records the missing URLs as `reconciled` in one batch.
    pub async fn preflight_sync(&self, scraper_name: &str) -> Result<usize, ReconcileError> {
        if !self.archive.is_configured() {
            debug!("Preflight for {}: archive not configured", scraper_name);
            return Ok(0);
        }
        if !self.archive.check_alive().await {
            warn!("Preflight for {}: archive unreachable, skipping", scraper_name);
            return Ok(0);
        }

        let archive_urls = match self.archive.get_scraper_document_urls(scraper_name).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Preflight for {}: archive listing failed: {}", scraper_name, e);
                return Ok(0);
            }
        };
        if archive_urls.is_empty() {
            return Ok(0);
        }

        let processed: HashSet<String> =
            self.ledger.get_processed_urls(scraper_name).await?.into_iter().collect();
        if archive_urls.keys().all(|url| processed.contains(url)) {
            debug!("Preflight for {}: ledger already covers archive", scraper_name);
            return Ok(0);
        }

        let added = self.add_missing(scraper_name, &archive_urls, &processed).await?;
        info!("Preflight for {}: recorded {} archived URLs", scraper_name, added);
        Ok(added)
    }

    /// Unconditionally add every archived URL the ledger lacks.
    ///
    /// Unlike [`preflight_sync`](Self::preflight_sync), an unusable archive
    /// is an error here. Running it twice adds nothing the second time.
    pub async fn rebuild_state(&self, scraper_name: &str) -> Result<usize, ReconcileError> {
        if !self.archive.is_configured() {
            return Err(ReconcileError::ArchiveUnavailable("not configured".to_string()));
        }
        if !self.archive.check_alive().await {
            return Err(ReconcileError::ArchiveUnavailable("unreachable".to_string()));
        }

        let archive_urls = self.archive.get_scraper_document_urls(scraper_name).await?;
        let processed: HashSet<String> =
            self.ledger.get_processed_urls(scraper_name).await?.into_iter().collect();

        let added = self.add_missing(scraper_name, &archive_urls, &processed).await?;
        info!(
            "Rebuilt state for {}: {} archived, {} added",
            scraper_name,
            archive_urls.len(),
            added
        );
        Ok(added)
    }

    async fn add_missing(
        &self,
        scraper_name: &str,
        archive_urls: &HashMap<String, String>,
        processed: &HashSet<String>,
    ) -> Result<usize, ReconcileError> {
        let mut missing: Vec<(&String, &String)> = archive_urls
            .iter()
            .filter(|(url, _)| !processed.contains(*url))
            .collect();
        missing.sort();

        let entries: Vec<(String, serde_json::Map<String, serde_json::Value>)> = missing
            .into_iter()
            .map(|(url, id)| {
                let mut metadata = serde_json::Map::new();
                metadata.insert("archive_document_id".into(), id.clone().into());
                metadata.insert("source".into(), "reconciliation".into());
                (url.clone(), metadata)
            })
            .collect();

        Ok(self
            .ledger
            .mark_many_processed(scraper_name, &entries, ProcessingStatus::Reconciled)
            .await?)
    }

    /// Full three-way diff. Never fails; unreadable sources land in `errors`.
    pub async fn get_report(&self, scraper_name: &str) -> ReconciliationReport {
        self.build_report(scraper_name).await.report
    }

    async fn build_report(&self, scraper_name: &str) -> ReportSources {
        let mut report = ReconciliationReport::new(scraper_name);

        let state: HashSet<String> = match self.ledger.get_processed_urls(scraper_name).await {
            Ok(urls) => urls.into_iter().collect(),
            Err(e) => {
                report.errors.push(format!("Ledger: {}", e));
                HashSet::new()
            }
        };
        report.state_count = state.len();

        let archive = if self.archive.is_configured() {
            match self.archive.get_scraper_document_urls(scraper_name).await {
                Ok(urls) => Some(urls),
                Err(e) => {
                    report.errors.push(format!("Archive: {}", e));
                    None
                }
            }
        } else {
            report.errors.push("Archive: not configured".to_string());
            None
        };
        let archive_listed = archive.is_some();
        let archive_urls = archive.unwrap_or_default();
        report.archive_count = archive_urls.len();

        let indexed = match &self.index {
            Some(target) if target.client.is_configured() => {
                match target.client.list_documents(&target.collection).await {
                    Ok(docs) => Some(
                        docs.iter()
                            .map(|doc| doc.source_url().to_string())
                            .collect::<HashSet<_>>(),
                    ),
                    Err(e) => {
                        report.errors.push(format!("Index: {}", e));
                        None
                    }
                }
            }
            _ => {
                report.errors.push("Index: not configured".to_string());
                None
            }
        };
        report.index_count = indexed.as_ref().map(HashSet::len);

        if archive_listed {
            report.urls_only_in_state = sorted(state.iter().filter(|u| !archive_urls.contains_key(*u)));
            report.urls_only_in_archive = sorted(archive_urls.keys().filter(|u| !state.contains(*u)));
        }
        // Without an index listing every archived URL counts as a gap.
        report.urls_missing_from_index = match &indexed {
            Some(indexed) => sorted(archive_urls.keys().filter(|u| !indexed.contains(*u))),
            None => sorted(archive_urls.keys()),
        };

        debug!(
            "Report for {}: state={} archive={} index={:?} gaps={}",
            scraper_name,
            report.state_count,
            report.archive_count,
            report.index_count,
            report.urls_missing_from_index.len()
        );
        ReportSources {
            report,
            archive_urls: archive_listed.then_some(archive_urls),
            index_listed: indexed.is_some(),
        }
    }
}

/// A report together with which sources answered, for gap repair.
struct ReportSources {
    report: ReconciliationReport,
    /// url -> archive id, `None` when the archive could not be listed.
    archive_urls: Option<HashMap<String, String>>,
    index_listed: bool,
}

fn sorted<'a>(urls: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut urls: Vec<String> = urls.cloned().collect();
    urls.sort();
    urls
}
