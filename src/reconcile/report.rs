//! Reconciliation report and gap-repair outcome types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Three-way comparison of ledger, archive and index for one scraper.
///
/// Built fresh on every request. Sources that could not be read are listed
/// in `errors`; differences against an unreadable archive are left empty.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub scraper_name: String,
    pub generated_at: DateTime<Utc>,
    pub state_count: usize,
    pub archive_count: usize,
    /// `None` when the index could not be listed.
    pub index_count: Option<usize>,
    /// In the ledger but not in the archive.
    pub urls_only_in_state: Vec<String>,
    /// In the archive but not in the ledger.
    pub urls_only_in_archive: Vec<String>,
    /// In the archive but not discoverable in the index.
    pub urls_missing_from_index: Vec<String>,
    pub errors: Vec<String>,
}

impl ReconciliationReport {
    pub(crate) fn new(scraper_name: &str) -> Self {
        Self {
            scraper_name: scraper_name.to_string(),
            generated_at: Utc::now(),
            state_count: 0,
            archive_count: 0,
            index_count: None,
            urls_only_in_state: Vec::new(),
            urls_only_in_archive: Vec::new(),
            urls_missing_from_index: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Whether all three stores agree and every source answered.
    pub fn is_consistent(&self) -> bool {
        self.errors.is_empty()
            && self.urls_only_in_state.is_empty()
            && self.urls_only_in_archive.is_empty()
            && self.urls_missing_from_index.is_empty()
    }
}

/// A gap that could not be repaired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapFailure {
    pub url: String,
    pub error: String,
}

/// Result of a gap-repair run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GapSyncOutcome {
    pub scraper_name: String,
    pub dry_run: bool,
    /// Every gap found, in URL order.
    pub candidates: Vec<String>,
    /// Gaps whose ingest succeeded.
    pub synced: Vec<String>,
    pub failed: Vec<GapFailure>,
}
