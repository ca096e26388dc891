//! Legacy JSON state migration.
//!
//! Older deployments kept one JSON file per scraper. Importing merges such a
//! file into the ledger without clobbering anything the ledger already knows.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::{debug, warn};

use super::{parse_json_object, LedgerRepository};
use crate::models::{LegacyScraperState, ProcessingStatus};
use crate::repository::models::{NewProcessedUrl, NewScraperState};
use crate::repository::pool::DieselError;
use crate::repository::{format_timestamp, parse_datetime_opt};
use crate::schema::{processed_urls, scraper_state};
use crate::with_conn;

/// Result of importing a legacy state file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// URL rows newly written.
    pub urls_imported: usize,
    /// URLs already present in the ledger, left untouched.
    pub urls_skipped: usize,
}

/// `CASE WHEN <column> > v THEN <column> ELSE v END`, evaluated against the
/// stored row.
macro_rules! greater_of {
    ($column:literal, $value:expr) => {
        diesel::dsl::sql::<diesel::sql_types::BigInt>(concat!("CASE WHEN ", $column, " > "))
            .bind::<diesel::sql_types::BigInt, _>($value)
            .sql(concat!(" THEN ", $column, " ELSE "))
            .bind::<diesel::sql_types::BigInt, _>($value)
            .sql(" END")
    };
}

/// Owned URL row prepared before the transaction starts.
struct PreparedUrl {
    url: String,
    status: &'static str,
    metadata: String,
    processed_at: String,
}

impl LedgerRepository {
    /// Merge a legacy JSON state into the ledger for one scraper.
    ///
    /// Per-status counters take the larger of the stored and legacy values
    /// and `total_processed` becomes their sum. Existing custom keys win over
    /// legacy ones. URLs already in the ledger are skipped. Running the same
    /// import twice changes nothing the second time.
    pub async fn import_from_json(
        &self,
        scraper_name: &str,
        legacy: &LegacyScraperState,
    ) -> Result<ImportSummary, DieselError> {
        let now = format_timestamp(Utc::now());
        let fallback_processed_at = parse_datetime_opt(legacy.last_updated.as_deref())
            .map(format_timestamp)
            .unwrap_or_else(|| now.clone());
        let legacy_created_at = parse_datetime_opt(legacy.created_at.as_deref()).map(format_timestamp);

        let mut prepared = Vec::with_capacity(legacy.processed_urls.len());
        for (url, entry) in &legacy.processed_urls {
            let status = match entry.status.as_deref() {
                None => ProcessingStatus::Downloaded,
                Some(raw) => ProcessingStatus::from_str(raw).unwrap_or_else(|| {
                    warn!("Unknown legacy status '{}' for {}, importing as downloaded", raw, url);
                    ProcessingStatus::Downloaded
                }),
            };
            let metadata = serde_json::to_string(&entry.metadata)
                .map_err(|e| DieselError::SerializationError(Box::new(e)))?;
            let processed_at = parse_datetime_opt(entry.processed_at.as_deref())
                .map(format_timestamp)
                .unwrap_or_else(|| fallback_processed_at.clone());

            prepared.push(PreparedUrl {
                url: url.clone(),
                status: status.as_str(),
                metadata,
                processed_at,
            });
        }

        let legacy_downloaded = legacy.statistics.total_downloaded as i64;
        let legacy_skipped = legacy.statistics.total_skipped as i64;
        let legacy_failed = legacy.statistics.total_failed as i64;
        let legacy_custom = legacy.custom.clone();
        let legacy_custom_json = serde_json::Value::Object(legacy_custom.clone()).to_string();

        let summary = with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let created = diesel::insert_into(scraper_state::table)
                        .values(&NewScraperState {
                            scraper_name,
                            created_at: legacy_created_at.as_deref().unwrap_or(now.as_str()),
                            updated_at: &now,
                            total_processed: legacy_downloaded + legacy_skipped + legacy_failed,
                            total_downloaded: legacy_downloaded,
                            total_skipped: legacy_skipped,
                            total_failed: legacy_failed,
                            custom_values: &legacy_custom_json,
                        })
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;

                    if created == 0 {
                        // Each counter is merged in place so increments
                        // committed by concurrent writers are kept. This
                        // statement also takes the row lock for the rest of
                        // the transaction.
                        diesel::update(scraper_state::table.find(scraper_name))
                            .set((
                                scraper_state::total_downloaded
                                    .eq(greater_of!("total_downloaded", legacy_downloaded)),
                                scraper_state::total_skipped
                                    .eq(greater_of!("total_skipped", legacy_skipped)),
                                scraper_state::total_failed
                                    .eq(greater_of!("total_failed", legacy_failed)),
                                scraper_state::updated_at.eq(&now),
                            ))
                            .execute(conn)
                            .await?;
                        diesel::update(scraper_state::table.find(scraper_name))
                            .set(scraper_state::total_processed.eq(scraper_state::total_downloaded
                                + scraper_state::total_skipped
                                + scraper_state::total_failed))
                            .execute(conn)
                            .await?;

                        if let Some(legacy_created) = legacy_created_at.as_deref() {
                            diesel::update(scraper_state::table.find(scraper_name))
                                .filter(scraper_state::created_at.gt(legacy_created))
                                .set(scraper_state::created_at.eq(legacy_created))
                                .execute(conn)
                                .await?;
                        }

                        let raw: String = scraper_state::table
                            .find(scraper_name)
                            .select(scraper_state::custom_values)
                            .first(conn)
                            .await?;
                        let mut custom = legacy_custom;
                        custom.extend(parse_json_object(&raw)?);
                        diesel::update(scraper_state::table.find(scraper_name))
                            .set(
                                scraper_state::custom_values
                                    .eq(serde_json::Value::Object(custom).to_string()),
                            )
                            .execute(conn)
                            .await?;
                    }

                    let mut summary = ImportSummary::default();
                    for row in &prepared {
                        let inserted = diesel::insert_into(processed_urls::table)
                            .values(&NewProcessedUrl {
                                scraper_name,
                                url: &row.url,
                                status: row.status,
                                metadata: &row.metadata,
                                processed_at: &row.processed_at,
                            })
                            .on_conflict_do_nothing()
                            .execute(conn)
                            .await?;
                        if inserted > 0 {
                            summary.urls_imported += 1;
                        } else {
                            summary.urls_skipped += 1;
                        }
                    }

                    Ok::<_, DieselError>(summary)
                })
            })
            .await
        })?;

        debug!(
            "Imported legacy state for {}: {} new URLs, {} already present",
            scraper_name, summary.urls_imported, summary.urls_skipped
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_ledger;
    use super::*;
    use serde_json::json;

    fn legacy_fixture() -> LegacyScraperState {
        serde_json::from_value(json!({
            "created_at": "2023-01-01T00:00:00Z",
            "last_updated": "2023-06-01T00:00:00Z",
            "statistics": {
                "total_processed": 3,
                "total_downloaded": 2,
                "total_failed": 1
            },
            "processed_urls": {
                "https://a.example/1.pdf": {"status": "downloaded", "processed_at": "2023-02-01T00:00:00Z"},
                "https://a.example/2.pdf": {"status": "downloaded"},
                "https://a.example/3.pdf": {"status": "failed", "metadata": {"error": "404"}}
            },
            "custom": {"last_page": 7, "etag": "old"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_import_into_empty_ledger() {
        let (ledger, _dir) = setup_ledger().await;

        let summary = ledger.import_from_json("fbi", &legacy_fixture()).await.unwrap();
        assert_eq!(summary.urls_imported, 3);
        assert_eq!(summary.urls_skipped, 0);

        let info = ledger.get_last_run_info("fbi").await.unwrap().unwrap();
        assert_eq!(info.statistics.total_processed, 3);
        assert_eq!(info.statistics.total_failed, 1);
        assert_eq!(info.custom_values["last_page"], 7);
        assert_eq!(info.created_at.to_rfc3339(), "2023-01-01T00:00:00+00:00");

        let failed = ledger
            .get_processed_url("fbi", "https://a.example/3.pdf")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert_eq!(failed.metadata["error"], "404");

        // Oldest legacy entry sorts first.
        let urls = ledger.get_processed_urls("fbi").await.unwrap();
        assert_eq!(urls[0], "https://a.example/1.pdf");
    }

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let (ledger, _dir) = setup_ledger().await;
        let legacy = legacy_fixture();

        ledger.import_from_json("fbi", &legacy).await.unwrap();
        let before = ledger.get_statistics("fbi").await.unwrap();

        let summary = ledger.import_from_json("fbi", &legacy).await.unwrap();
        assert_eq!(summary.urls_imported, 0);
        assert_eq!(summary.urls_skipped, 3);
        assert_eq!(ledger.get_statistics("fbi").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_import_merges_with_existing_state() {
        let (ledger, _dir) = setup_ledger().await;

        for i in 0..4 {
            ledger
                .mark_processed(
                    "fbi",
                    &format!("https://b.example/{i}"),
                    ProcessingStatus::Downloaded,
                    &Default::default(),
                )
                .await
                .unwrap();
        }
        ledger.set_custom_value("fbi", "etag", json!("new")).await.unwrap();

        ledger.import_from_json("fbi", &legacy_fixture()).await.unwrap();

        let info = ledger.get_last_run_info("fbi").await.unwrap().unwrap();
        assert_eq!(info.statistics.total_downloaded, 4);
        assert_eq!(info.statistics.total_failed, 1);
        assert_eq!(info.statistics.total_processed, 5);
        assert!(info.statistics.is_consistent());
        assert_eq!(info.custom_values["etag"], "new");
        assert_eq!(info.custom_values["last_page"], 7);
        assert_eq!(ledger.count_urls("fbi").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_import_keeps_concurrent_increments() {
        let (ledger, _dir) = setup_ledger().await;
        ledger
            .mark_processed("fbi", "https://b.example/seed", ProcessingStatus::Downloaded, &Default::default())
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger
                    .mark_processed(
                        "fbi",
                        &format!("https://b.example/{i}"),
                        ProcessingStatus::Downloaded,
                        &Default::default(),
                    )
                    .await
            }));
        }
        let importer = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.import_from_json("fbi", &legacy_fixture()).await })
        };
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        importer.await.unwrap().unwrap();

        let stats = ledger.get_statistics("fbi").await.unwrap();
        assert!(stats.is_consistent(), "{stats:?}");
        assert!(stats.total_downloaded >= 21, "lost increments: {stats:?}");
        assert_eq!(stats.total_failed, 1);
        assert_eq!(ledger.count_urls("fbi").await.unwrap(), 24);
    }
}
