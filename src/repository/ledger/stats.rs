//! Counters, last-run info and custom values.

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::{parse_json_object, LedgerRepository};
use crate::models::{LastRunInfo, ScraperStatistics};
use crate::repository::format_timestamp;
use crate::repository::models::{NewScraperState, ScraperStateRecord};
use crate::repository::pool::DieselError;
use crate::schema::scraper_state;
use crate::with_conn;

impl LedgerRepository {
    async fn load_state(&self, scraper_name: &str) -> Result<Option<ScraperStateRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            scraper_state::table
                .find(scraper_name)
                .select(ScraperStateRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })
    }

    /// Counters for a scraper. Unknown scrapers report all zeros.
    pub async fn get_statistics(&self, scraper_name: &str) -> Result<ScraperStatistics, DieselError> {
        Ok(self
            .load_state(scraper_name)
            .await?
            .map(|record| ScraperStatistics::from(&record))
            .unwrap_or_default())
    }

    /// Aggregate row for a scraper, if it has ever recorded anything.
    pub async fn get_last_run_info(
        &self,
        scraper_name: &str,
    ) -> Result<Option<LastRunInfo>, DieselError> {
        self.load_state(scraper_name)
            .await?
            .map(LastRunInfo::try_from)
            .transpose()
    }

    /// Last-run info for many scrapers in a single query.
    ///
    /// Every requested name is present in the result; names with no
    /// aggregate map to `None`.
    pub async fn get_all_last_run_info(
        &self,
        scraper_names: &[String],
    ) -> Result<HashMap<String, Option<LastRunInfo>>, DieselError> {
        let mut result: HashMap<String, Option<LastRunInfo>> =
            scraper_names.iter().map(|name| (name.clone(), None)).collect();
        if scraper_names.is_empty() {
            return Ok(result);
        }

        let records: Vec<ScraperStateRecord> = with_conn!(self.pool, conn, {
            scraper_state::table
                .filter(scraper_state::scraper_name.eq_any(scraper_names))
                .select(ScraperStateRecord::as_select())
                .load(&mut conn)
                .await
        })?;

        for record in records {
            let info = LastRunInfo::try_from(record)?;
            result.insert(info.scraper_name.clone(), Some(info));
        }
        Ok(result)
    }

    /// Names of every scraper with an aggregate row, sorted.
    pub async fn list_scrapers(&self) -> Result<Vec<String>, DieselError> {
        with_conn!(self.pool, conn, {
            scraper_state::table
                .select(scraper_state::scraper_name)
                .order(scraper_state::scraper_name.asc())
                .load::<String>(&mut conn)
                .await
        })
    }

    /// Read one key from a scraper's custom value bag.
    pub async fn get_custom_value(
        &self,
        scraper_name: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, DieselError> {
        let Some(record) = self.load_state(scraper_name).await? else {
            return Ok(None);
        };
        let mut values = parse_json_object(&record.custom_values)?;
        Ok(values.remove(key))
    }

    /// Write one key into a scraper's custom value bag.
    ///
    /// Creates the aggregate row if the scraper has none yet. Counters are
    /// left untouched.
    pub async fn set_custom_value(
        &self,
        scraper_name: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), DieselError> {
        let timestamp = format_timestamp(Utc::now());
        let now = timestamp.as_str();
        let empty = NewScraperState {
            scraper_name,
            created_at: now,
            updated_at: now,
            total_processed: 0,
            total_downloaded: 0,
            total_skipped: 0,
            total_failed: 0,
            custom_values: "{}",
        };

        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    diesel::insert_into(scraper_state::table)
                        .values(&empty)
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;

                    // Write before reading: the row stays locked until
                    // commit, so concurrent writers cannot drop each other's
                    // keys.
                    diesel::update(scraper_state::table.find(scraper_name))
                        .set(scraper_state::updated_at.eq(now))
                        .execute(conn)
                        .await?;

                    let raw: String = scraper_state::table
                        .find(scraper_name)
                        .select(scraper_state::custom_values)
                        .first(conn)
                        .await?;
                    let mut values = parse_json_object(&raw)?;
                    values.insert(key.to_string(), value);
                    let json = serde_json::Value::Object(values).to_string();

                    diesel::update(scraper_state::table.find(scraper_name))
                        .set(scraper_state::custom_values.eq(&json))
                        .execute(conn)
                        .await?;

                    Ok::<_, DieselError>(())
                })
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_ledger;
    use crate::models::ProcessingStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_statistics_for_unknown_scraper_are_zero() {
        let (ledger, _dir) = setup_ledger().await;
        let stats = ledger.get_statistics("ghost").await.unwrap();
        assert_eq!(stats.total_processed, 0);
        assert!(ledger.get_last_run_info("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_last_run_info_marks_missing() {
        let (ledger, _dir) = setup_ledger().await;
        ledger
            .mark_processed("fbi", "https://a.example/1", ProcessingStatus::Skipped, &Default::default())
            .await
            .unwrap();

        let names = vec!["fbi".to_string(), "cia".to_string()];
        let infos = ledger.get_all_last_run_info(&names).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos["cia"].is_none());

        let fbi = infos["fbi"].as_ref().unwrap();
        assert_eq!(fbi.statistics.total_skipped, 1);
        assert!(fbi.last_updated >= fbi.created_at);

        assert!(ledger.get_all_last_run_info(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_custom_values_keep_every_key() {
        let (ledger, _dir) = setup_ledger().await;

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .set_custom_value("fbi", &format!("key{i}"), json!(i))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let info = ledger.get_last_run_info("fbi").await.unwrap().unwrap();
        assert_eq!(info.custom_values.len(), 8);
        assert_eq!(info.statistics.total_processed, 0);
    }

    #[tokio::test]
    async fn test_custom_values_round_trip() {
        let (ledger, _dir) = setup_ledger().await;

        assert!(ledger.get_custom_value("fbi", "cursor").await.unwrap().is_none());

        ledger.set_custom_value("fbi", "cursor", json!(4)).await.unwrap();
        ledger.set_custom_value("fbi", "etag", json!("abc")).await.unwrap();
        ledger.set_custom_value("fbi", "cursor", json!(5)).await.unwrap();

        assert_eq!(ledger.get_custom_value("fbi", "cursor").await.unwrap(), Some(json!(5)));
        assert_eq!(ledger.get_custom_value("fbi", "etag").await.unwrap(), Some(json!("abc")));

        // Setting a value creates the scraper without touching counters.
        assert_eq!(ledger.list_scrapers().await.unwrap(), vec!["fbi"]);
        assert_eq!(ledger.get_statistics("fbi").await.unwrap().total_processed, 0);
    }
}
