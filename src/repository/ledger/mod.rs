//! Processing-state ledger.
//!
//! Durable record of which URLs each scraper has processed, plus per-scraper
//! counters and a free-form custom value bag.
//!
//! Split into submodules:
//! - `mod.rs` (this file): repository struct, schema setup, record conversion
//! - `urls.rs`: processed URL reads and upserts
//! - `stats.rs`: counters, last-run info, custom values
//! - `cleanup.rs`: URL removal, clear and delete
//! - `import.rs`: legacy JSON state migration

mod cleanup;
mod import;
mod stats;
mod urls;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

pub use import::ImportSummary;

use super::migrations;
use super::models::{ProcessedUrlRecord, ScraperStateRecord};
use super::parse_datetime;
use super::pool::{DbPool, DieselError};
use crate::models::{LastRunInfo, ProcessedUrl, ProcessingStatus, ScraperStatistics};

/// Ledger repository. Cheap to clone; clones share the schema flag.
#[derive(Clone, Debug)]
pub struct LedgerRepository {
    pool: DbPool,
    schema_ready: Arc<AtomicBool>,
}

impl LedgerRepository {
    /// Create a new ledger repository.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create the ledger tables if needed.
    ///
    /// Call once at startup. Later calls return immediately without touching
    /// the database; tables are never dropped at runtime.
    pub async fn ensure_schema(&self) -> Result<(), DieselError> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let applied = migrations::run_migrations(&self.pool).await?;
        debug!("Ledger schema ready ({} migrations applied)", applied.len());
        self.schema_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether `ensure_schema` has completed for this repository.
    pub fn is_schema_ready(&self) -> bool {
        self.schema_ready.load(Ordering::Acquire)
    }
}

fn parse_json_object(raw: &str) -> Result<serde_json::Map<String, serde_json::Value>, DieselError> {
    serde_json::from_str(raw).map_err(|e| DieselError::DeserializationError(Box::new(e)))
}

impl TryFrom<ProcessedUrlRecord> for ProcessedUrl {
    type Error = DieselError;

    fn try_from(record: ProcessedUrlRecord) -> Result<Self, Self::Error> {
        let status = ProcessingStatus::from_str(&record.status).ok_or_else(|| {
            DieselError::DeserializationError(
                format!("Invalid processing status: '{}'", record.status).into(),
            )
        })?;

        Ok(ProcessedUrl {
            metadata: parse_json_object(&record.metadata)?,
            processed_at: parse_datetime(&record.processed_at),
            scraper_name: record.scraper_name,
            url: record.url,
            status,
        })
    }
}

impl From<&ScraperStateRecord> for ScraperStatistics {
    fn from(record: &ScraperStateRecord) -> Self {
        Self {
            total_processed: record.total_processed.max(0) as u64,
            total_downloaded: record.total_downloaded.max(0) as u64,
            total_skipped: record.total_skipped.max(0) as u64,
            total_failed: record.total_failed.max(0) as u64,
        }
    }
}

impl TryFrom<ScraperStateRecord> for LastRunInfo {
    type Error = DieselError;

    fn try_from(record: ScraperStateRecord) -> Result<Self, Self::Error> {
        Ok(LastRunInfo {
            statistics: ScraperStatistics::from(&record),
            custom_values: parse_json_object(&record.custom_values)?,
            created_at: parse_datetime(&record.created_at),
            last_updated: parse_datetime(&record.updated_at),
            scraper_name: record.scraper_name,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::setup_ledger;
    use super::*;

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let (ledger, _dir) = setup_ledger().await;
        assert!(ledger.is_schema_ready());
        ledger.ensure_schema().await.unwrap();

        // A second repository on the same file re-checks and finds nothing to do.
        let other = LedgerRepository::new(ledger.pool.clone());
        assert!(!other.is_schema_ready());
        other.ensure_schema().await.unwrap();
        assert!(other.is_schema_ready());
    }
}
