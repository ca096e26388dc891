mod m0001_scraper_state;
mod m0002_processed_urls;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_scraper_state::migration());
    reg.register(m0002_processed_urls::migration());
    reg
}
