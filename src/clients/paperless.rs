//! Paperless-ngx archive adapter.
//!
//! Documents stored by a scraper carry a `<prefix><scraper>` tag, and their
//! source URL lives in a custom field (default `source_url`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{check_status, ArchiveClient, ClientError};

/// Configuration for the Paperless-ngx archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperlessConfig {
    /// Base URL, e.g. `http://paperless:8000`.
    #[serde(default)]
    pub url: Option<String>,
    /// API token. Prefer the `SCRAPELEDGER_ARCHIVE_TOKEN` env var.
    #[serde(default)]
    pub token: Option<String>,
    /// Tag prefix identifying which scraper stored a document.
    #[serde(default = "default_tag_prefix")]
    pub scraper_tag_prefix: String,
    /// Name of the custom field holding the source URL.
    #[serde(default = "default_source_url_field")]
    pub source_url_field: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tag_prefix() -> String {
    "scraper:".to_string()
}
fn default_source_url_field() -> String {
    "source_url".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for PaperlessConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            scraper_tag_prefix: default_tag_prefix(),
            source_url_field: default_source_url_field(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    next: Option<String>,
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CustomFieldDef {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct DocumentSummary {
    id: i64,
    #[serde(default)]
    custom_fields: Vec<CustomFieldValue>,
}

#[derive(Debug, Deserialize)]
struct CustomFieldValue {
    field: i64,
    #[serde(default)]
    value: serde_json::Value,
}

/// Paperless-ngx REST client.
pub struct PaperlessArchiveClient {
    config: PaperlessConfig,
    client: Client,
}

impl PaperlessArchiveClient {
    pub fn new(config: PaperlessConfig, user_agent: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> Result<&str, ClientError> {
        self.config
            .url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or(ClientError::NotConfigured("archive"))
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.config.token {
            Some(token) => request.header("Authorization", format!("Token {}", token)),
            None => request,
        }
    }

    async fn source_url_field_id(&self) -> Result<Option<i64>, ClientError> {
        let base = self.base_url()?;
        let resp = self
            .get(&format!("{}/api/custom_fields/", base))
            .query(&[("name__iexact", self.config.source_url_field.as_str())])
            .send()
            .await?;
        let page: Page<CustomFieldDef> = check_status(resp).await?.json().await?;
        Ok(page.results.first().map(|field| field.id))
    }
}

/// Add `url -> id` for every document carrying a string value in `field_id`.
fn collect_source_urls(
    documents: Vec<DocumentSummary>,
    field_id: i64,
    out: &mut HashMap<String, String>,
) {
    for doc in documents {
        let url = doc
            .custom_fields
            .iter()
            .find(|cf| cf.field == field_id)
            .and_then(|cf| cf.value.as_str())
            .filter(|url| !url.is_empty());

        match url {
            Some(url) => {
                out.insert(url.to_string(), doc.id.to_string());
            }
            None => debug!("Archive document {} has no source URL", doc.id),
        }
    }
}

#[async_trait]
impl ArchiveClient for PaperlessArchiveClient {
    fn is_configured(&self) -> bool {
        self.base_url().is_ok() && self.config.token.is_some()
    }

    async fn check_alive(&self) -> bool {
        let Ok(base) = self.base_url() else {
            return false;
        };
        match self.get(&format!("{}/api/", base)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Archive health check failed: {}", e);
                false
            }
        }
    }

    async fn get_scraper_document_urls(
        &self,
        scraper_name: &str,
    ) -> Result<HashMap<String, String>, ClientError> {
        let base = self.base_url()?;
        let mut urls = HashMap::new();

        let Some(field_id) = self.source_url_field_id().await? else {
            warn!(
                "Archive has no '{}' custom field; no source URLs available",
                self.config.source_url_field
            );
            return Ok(urls);
        };

        let tag = format!("{}{}", self.config.scraper_tag_prefix, scraper_name);
        let mut next = Some(format!("{}/api/documents/", base));
        let mut first = true;

        while let Some(page_url) = next.take() {
            let mut request = self.get(&page_url);
            // Follow-up pages come back with the query baked into `next`.
            if first {
                request = request.query(&[
                    ("tags__name__iexact", tag.as_str()),
                    ("page_size", "100"),
                    ("fields", "id,custom_fields"),
                ]);
                first = false;
            }

            let page: Page<DocumentSummary> = check_status(request.send().await?).await?.json().await?;
            collect_source_urls(page.results, field_id, &mut urls);
            next = page.next;
        }

        debug!("Archive holds {} URLs for {}", urls.len(), scraper_name);
        Ok(urls)
    }

    async fn download_document(&self, document_id: &str) -> Result<Option<Vec<u8>>, ClientError> {
        let base = self.base_url()?;
        let resp = self
            .get(&format!("{}/api/documents/{}/download/", base, document_id))
            .query(&[("original", "true")])
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = check_status(resp).await?.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }
}
