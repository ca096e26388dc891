//! Archive client contract.

use std::collections::HashMap;

use async_trait::async_trait;

use super::ClientError;

/// Document archive: the source of truth for "is this document stored?".
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Whether connection details are present. No network access.
    fn is_configured(&self) -> bool;

    /// Whether the archive answers right now.
    async fn check_alive(&self) -> bool;

    /// Map of source URL to archive document id for everything a scraper stored.
    async fn get_scraper_document_urls(
        &self,
        scraper_name: &str,
    ) -> Result<HashMap<String, String>, ClientError>;

    /// Original bytes of a document, or `None` if the archive no longer has it.
    async fn download_document(&self, document_id: &str) -> Result<Option<Vec<u8>>, ClientError>;
}
