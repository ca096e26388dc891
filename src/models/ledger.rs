//! Processing-state models: per-URL records and per-scraper aggregates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome recorded for a processed URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Document was fetched by a scraper run.
    Downloaded,
    /// URL was seen but intentionally not fetched.
    Skipped,
    /// Fetch or storage failed.
    Failed,
    /// Added by reconciliation because the archive already holds it.
    Reconciled,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Reconciled => "reconciled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "downloaded" => Some(Self::Downloaded),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            "reconciled" => Some(Self::Reconciled),
            _ => None,
        }
    }

    /// Per-status counter deltas as (downloaded, skipped, failed).
    ///
    /// Reconciled URLs count as skipped so that
    /// `total_processed == downloaded + skipped + failed` always holds.
    pub fn counter_deltas(&self) -> (i64, i64, i64) {
        match self {
            Self::Downloaded => (1, 0, 0),
            Self::Skipped | Self::Reconciled => (0, 1, 0),
            Self::Failed => (0, 0, 1),
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A URL a scraper has processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedUrl {
    pub scraper_name: String,
    pub url: String,
    pub status: ProcessingStatus,
    /// Flat metadata captured when the URL was processed.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub processed_at: DateTime<Utc>,
}

/// Aggregate counters for a scraper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperStatistics {
    pub total_processed: u64,
    pub total_downloaded: u64,
    pub total_skipped: u64,
    pub total_failed: u64,
}

impl ScraperStatistics {
    /// Whether `total_processed` equals the sum of the per-status counters.
    pub fn is_consistent(&self) -> bool {
        self.total_processed == self.total_downloaded + self.total_skipped + self.total_failed
    }
}

/// Summary of a scraper's last recorded activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastRunInfo {
    pub scraper_name: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub statistics: ScraperStatistics,
    pub custom_values: serde_json::Map<String, serde_json::Value>,
}

/// Legacy JSON state file layout, accepted by `import_from_json`.
///
/// ```json
/// {
///   "created_at": "2024-03-01T10:00:00Z",
///   "last_updated": "2024-03-04T08:12:00Z",
///   "statistics": {"total_processed": 2, "total_downloaded": 2},
///   "processed_urls": {
///     "https://example.org/a.pdf": {"status": "downloaded", "processed_at": "..."}
///   },
///   "custom": {"last_page": 4}
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyScraperState {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, alias = "updated_at")]
    pub last_updated: Option<String>,
    #[serde(default, alias = "stats")]
    pub statistics: LegacyStatistics,
    #[serde(default)]
    pub processed_urls: BTreeMap<String, LegacyUrlEntry>,
    #[serde(default, alias = "custom_values")]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

/// Counters as written by the legacy state file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LegacyStatistics {
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub total_downloaded: u64,
    #[serde(default)]
    pub total_skipped: u64,
    #[serde(default)]
    pub total_failed: u64,
}

/// One URL entry in a legacy state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyUrlEntry {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub processed_at: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            ProcessingStatus::Downloaded,
            ProcessingStatus::Skipped,
            ProcessingStatus::Failed,
            ProcessingStatus::Reconciled,
        ] {
            assert_eq!(ProcessingStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(ProcessingStatus::from_str("pending"), None);
    }

    #[test]
    fn test_reconciled_counts_as_skipped() {
        assert_eq!(ProcessingStatus::Reconciled.counter_deltas(), (0, 1, 0));
        assert_eq!(ProcessingStatus::Failed.counter_deltas(), (0, 0, 1));
    }

    #[test]
    fn test_legacy_state_parses_with_aliases() {
        let json = r#"{
            "updated_at": "2024-03-04T08:12:00Z",
            "stats": {"total_processed": 3, "total_downloaded": 2, "total_failed": 1},
            "processed_urls": {
                "https://example.org/a.pdf": {"status": "downloaded"},
                "https://example.org/b.pdf": {}
            },
            "custom_values": {"last_page": 4}
        }"#;

        let state: LegacyScraperState = serde_json::from_str(json).unwrap();
        assert_eq!(state.last_updated.as_deref(), Some("2024-03-04T08:12:00Z"));
        assert_eq!(state.statistics.total_downloaded, 2);
        assert_eq!(state.processed_urls.len(), 2);
        assert_eq!(state.custom["last_page"], 4);
    }
}
