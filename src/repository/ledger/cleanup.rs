//! URL removal, clear and delete.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::LedgerRepository;
use crate::repository::format_timestamp;
use crate::repository::pool::DieselError;
use crate::schema::{processed_urls, scraper_state};
use crate::with_conn;

impl LedgerRepository {
    /// Forget a single URL so the next run processes it again.
    ///
    /// Counters are not rolled back. Returns whether a row was removed.
    pub async fn remove_url(&self, scraper_name: &str, url: &str) -> Result<bool, DieselError> {
        with_conn!(self.pool, conn, {
            let rows = diesel::delete(
                processed_urls::table
                    .filter(processed_urls::scraper_name.eq(scraper_name))
                    .filter(processed_urls::url.eq(url)),
            )
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    /// Wipe a scraper's URLs and reset its counters to zero.
    ///
    /// The aggregate row and its custom values survive. Returns the number of
    /// URL rows removed.
    pub async fn clear(&self, scraper_name: &str) -> Result<usize, DieselError> {
        let now = format_timestamp(Utc::now());

        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let removed = diesel::delete(
                        processed_urls::table.filter(processed_urls::scraper_name.eq(scraper_name)),
                    )
                    .execute(conn)
                    .await?;

                    diesel::update(scraper_state::table.find(scraper_name))
                        .set((
                            scraper_state::total_processed.eq(0_i64),
                            scraper_state::total_downloaded.eq(0_i64),
                            scraper_state::total_skipped.eq(0_i64),
                            scraper_state::total_failed.eq(0_i64),
                            scraper_state::updated_at.eq(&now),
                        ))
                        .execute(conn)
                        .await?;

                    Ok::<_, DieselError>(removed)
                })
            })
            .await
        })
    }

    /// Remove every trace of a scraper. Returns whether it existed.
    pub async fn delete_scraper(&self, scraper_name: &str) -> Result<bool, DieselError> {
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let urls = diesel::delete(
                        processed_urls::table.filter(processed_urls::scraper_name.eq(scraper_name)),
                    )
                    .execute(conn)
                    .await?;

                    let states = diesel::delete(scraper_state::table.find(scraper_name))
                        .execute(conn)
                        .await?;

                    Ok::<_, DieselError>(urls > 0 || states > 0)
                })
            })
            .await
        })
    }
}
