//! Processed URL reads and upserts.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::LedgerRepository;
use crate::models::{ProcessedUrl, ProcessingStatus};
use crate::repository::format_timestamp;
use crate::repository::models::{NewProcessedUrl, NewScraperState, ProcessedUrlRecord};
use crate::repository::pool::DieselError;
use crate::schema::{processed_urls, scraper_state};
use crate::with_conn;

type Metadata = serde_json::Map<String, serde_json::Value>;

impl LedgerRepository {
    /// Check whether a scraper has already processed a URL.
    pub async fn is_processed(&self, scraper_name: &str, url: &str) -> Result<bool, DieselError> {
        with_conn!(self.pool, conn, {
            let count: i64 = processed_urls::table
                .filter(processed_urls::scraper_name.eq(scraper_name))
                .filter(processed_urls::url.eq(url))
                .count()
                .get_result(&mut conn)
                .await?;
            Ok(count > 0)
        })
    }

    /// Get a single processed URL record.
    pub async fn get_processed_url(
        &self,
        scraper_name: &str,
        url: &str,
    ) -> Result<Option<ProcessedUrl>, DieselError> {
        let record: Option<ProcessedUrlRecord> = with_conn!(self.pool, conn, {
            processed_urls::table
                .filter(processed_urls::scraper_name.eq(scraper_name))
                .filter(processed_urls::url.eq(url))
                .select(ProcessedUrlRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;

        record.map(ProcessedUrl::try_from).transpose()
    }

    /// Record one URL as processed.
    ///
    /// The URL row and the scraper counters are written in one transaction.
    /// Re-recording a URL overwrites its status and metadata, and the counters
    /// are incremented again.
    pub async fn mark_processed(
        &self,
        scraper_name: &str,
        url: &str,
        status: ProcessingStatus,
        metadata: &Metadata,
    ) -> Result<(), DieselError> {
        let entries = [(url.to_string(), metadata.clone())];
        self.mark_many_processed(scraper_name, &entries, status)
            .await
            .map(|_| ())
    }

    /// Record many URLs with the same status in one transaction.
    ///
    /// Counters advance by the number of entries. Returns that number.
    pub async fn mark_many_processed(
        &self,
        scraper_name: &str,
        entries: &[(String, Metadata)],
        status: ProcessingStatus,
    ) -> Result<usize, DieselError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let timestamp = format_timestamp(Utc::now());
        let now = timestamp.as_str();
        let status_str = status.as_str();
        let rows: Vec<(&str, String)> = entries
            .iter()
            .map(|(url, metadata)| {
                serde_json::to_string(metadata)
                    .map(|json| (url.as_str(), json))
                    .map_err(|e| DieselError::SerializationError(Box::new(e)))
            })
            .collect::<Result<_, _>>()?;

        let n = rows.len() as i64;
        let (downloaded, skipped, failed) = status.counter_deltas();
        let new_state = NewScraperState {
            scraper_name,
            created_at: now,
            updated_at: now,
            total_processed: n,
            total_downloaded: downloaded * n,
            total_skipped: skipped * n,
            total_failed: failed * n,
            custom_values: "{}",
        };

        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    diesel::insert_into(scraper_state::table)
                        .values(&new_state)
                        .on_conflict(scraper_state::scraper_name)
                        .do_update()
                        .set((
                            scraper_state::total_processed.eq(scraper_state::total_processed + n),
                            scraper_state::total_downloaded
                                .eq(scraper_state::total_downloaded + downloaded * n),
                            scraper_state::total_skipped
                                .eq(scraper_state::total_skipped + skipped * n),
                            scraper_state::total_failed
                                .eq(scraper_state::total_failed + failed * n),
                            scraper_state::updated_at.eq(now),
                        ))
                        .execute(conn)
                        .await?;

                    for (url, metadata) in rows.iter() {
                        diesel::insert_into(processed_urls::table)
                            .values(&NewProcessedUrl {
                                scraper_name,
                                url: *url,
                                status: status_str,
                                metadata: metadata.as_str(),
                                processed_at: now,
                            })
                            .on_conflict((processed_urls::scraper_name, processed_urls::url))
                            .do_update()
                            .set((
                                processed_urls::status.eq(status_str),
                                processed_urls::metadata.eq(metadata),
                                processed_urls::processed_at.eq(now),
                            ))
                            .execute(conn)
                            .await?;
                    }

                    Ok::<_, DieselError>(rows.len())
                })
            })
            .await
        })
    }

    /// All URLs a scraper has processed, oldest first.
    pub async fn get_processed_urls(&self, scraper_name: &str) -> Result<Vec<String>, DieselError> {
        with_conn!(self.pool, conn, {
            processed_urls::table
                .filter(processed_urls::scraper_name.eq(scraper_name))
                .order((processed_urls::processed_at.asc(), processed_urls::id.asc()))
                .select(processed_urls::url)
                .load::<String>(&mut conn)
                .await
        })
    }

    /// Full processed URL records for a scraper, oldest first.
    pub async fn get_processed_url_records(
        &self,
        scraper_name: &str,
        status: Option<ProcessingStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<ProcessedUrl>, DieselError> {
        let records: Vec<ProcessedUrlRecord> = with_conn!(self.pool, conn, {
            let mut query = processed_urls::table
                .filter(processed_urls::scraper_name.eq(scraper_name))
                .order((processed_urls::processed_at.asc(), processed_urls::id.asc()))
                .select(ProcessedUrlRecord::as_select())
                .into_boxed();

            if let Some(status) = status {
                query = query.filter(processed_urls::status.eq(status.as_str()));
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }

            query.load(&mut conn).await
        })?;

        records.into_iter().map(ProcessedUrl::try_from).collect()
    }

    /// Number of URL rows recorded for a scraper.
    pub async fn count_urls(&self, scraper_name: &str) -> Result<u64, DieselError> {
        with_conn!(self.pool, conn, {
            let count: i64 = processed_urls::table
                .filter(processed_urls::scraper_name.eq(scraper_name))
                .count()
                .get_result(&mut conn)
                .await?;
            Ok(count.max(0) as u64)
        })
    }
}
