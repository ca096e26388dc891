//! Diesel records for the ledger tables.

use diesel::prelude::*;

use crate::schema;

/// Scraper aggregate row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::scraper_state)]
#[diesel(primary_key(scraper_name))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScraperStateRecord {
    pub scraper_name: String,
    pub created_at: String,
    pub updated_at: String,
    pub total_processed: i64,
    pub total_downloaded: i64,
    pub total_skipped: i64,
    pub total_failed: i64,
    pub custom_values: String,
}

/// New scraper aggregate for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::scraper_state)]
pub struct NewScraperState<'a> {
    pub scraper_name: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
    pub total_processed: i64,
    pub total_downloaded: i64,
    pub total_skipped: i64,
    pub total_failed: i64,
    pub custom_values: &'a str,
}

/// Processed URL row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::processed_urls)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProcessedUrlRecord {
    pub id: i32,
    pub scraper_name: String,
    pub url: String,
    pub status: String,
    pub metadata: String,
    pub processed_at: String,
}

/// New processed URL for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::processed_urls)]
pub struct NewProcessedUrl<'a> {
    pub scraper_name: &'a str,
    pub url: &'a str,
    pub status: &'a str,
    pub metadata: &'a str,
    pub processed_at: &'a str,
}
