use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_scraper_state").operation(
        RunSql::portable()
            .for_backend(
                "sqlite",
                r#"CREATE TABLE IF NOT EXISTS scraper_state (
    scraper_name TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    total_processed INTEGER NOT NULL DEFAULT 0,
    total_downloaded INTEGER NOT NULL DEFAULT 0,
    total_skipped INTEGER NOT NULL DEFAULT 0,
    total_failed INTEGER NOT NULL DEFAULT 0,
    custom_values TEXT NOT NULL DEFAULT '{}'
)"#,
            )
            .for_backend(
                "postgres",
                r#"CREATE TABLE IF NOT EXISTS scraper_state (
    scraper_name TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    total_processed BIGINT NOT NULL DEFAULT 0,
    total_downloaded BIGINT NOT NULL DEFAULT 0,
    total_skipped BIGINT NOT NULL DEFAULT 0,
    total_failed BIGINT NOT NULL DEFAULT 0,
    custom_values TEXT NOT NULL DEFAULT '{}'
)"#,
            ),
    )
}
