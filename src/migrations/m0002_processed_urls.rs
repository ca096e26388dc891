use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_processed_urls")
        .depends_on(&["0001_scraper_state"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE IF NOT EXISTS processed_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scraper_name TEXT NOT NULL REFERENCES scraper_state(scraper_name) ON DELETE CASCADE,
    url TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    processed_at TEXT NOT NULL,
    UNIQUE (scraper_name, url)
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE IF NOT EXISTS processed_urls (
    id SERIAL PRIMARY KEY,
    scraper_name TEXT NOT NULL REFERENCES scraper_state(scraper_name) ON DELETE CASCADE,
    url TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    processed_at TEXT NOT NULL,
    CONSTRAINT processed_urls_scraper_url UNIQUE (scraper_name, url)
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX IF NOT EXISTS idx_processed_urls_order ON processed_urls(scraper_name, processed_at, id)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX IF NOT EXISTS idx_processed_urls_order ON processed_urls(scraper_name, processed_at, id)",
                ),
        )
}
