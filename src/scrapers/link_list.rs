//! Scraper over a configured list of document URLs.
//!
//! The list is walked in pages of `page_size`. Each URL already in the
//! ledger is skipped; the rest are downloaded, stored under the documents
//! directory by content hash, recorded, and optionally pushed to the index.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{extract_title_from_url, PreviewItem, ScrapeContext, ScrapeOutcome, Scraper};
use crate::models::ProcessingStatus;

const LAST_PAGE_KEY: &str = "last_page";

/// `[scrapers.<name>]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkListConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Document URLs, in the order they are fetched.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    25
}

impl Default for LinkListConfig {
    fn default() -> Self {
        Self {
            description: None,
            urls: Vec::new(),
            page_size: default_page_size(),
        }
    }
}

pub struct LinkListScraper {
    name: String,
    config: LinkListConfig,
    client: Client,
}

struct Fetched {
    content: Vec<u8>,
    content_type: Option<String>,
}

impl LinkListScraper {
    pub fn new(
        name: impl Into<String>,
        config: LinkListConfig,
        user_agent: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            name: name.into(),
            config,
            client,
        })
    }

    fn pages(&self) -> std::slice::Chunks<'_, String> {
        self.config.urls.chunks(self.config.page_size.max(1))
    }

    async fn fetch(&self, url: &str) -> Result<Fetched, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let content = response.bytes().await?.to_vec();
        Ok(Fetched {
            content,
            content_type,
        })
    }

    /// Download, store, record and ingest one URL. A failed fetch is
    /// recorded in the ledger; only storage and ledger errors propagate.
    async fn process_url(
        &self,
        ctx: &ScrapeContext,
        url: &str,
        outcome: &mut ScrapeOutcome,
    ) -> anyhow::Result<()> {
        let fetched = match self.fetch(url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                let mut metadata = Map::new();
                metadata.insert("error".into(), e.to_string().into());
                ctx.ledger
                    .mark_processed(&self.name, url, ProcessingStatus::Failed, &metadata)
                    .await?;
                outcome.failed += 1;
                return Ok(());
            }
        };

        let hash = compute_hash(&fetched.content);
        let title = extract_title_from_url(url);
        let extension = file_extension(url, fetched.content_type.as_deref());
        let path = content_storage_path(&ctx.documents_dir, &self.name, &hash, &title, &extension);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &fetched.content).await?;

        let mut metadata = Map::new();
        metadata.insert("content_hash".into(), hash.clone().into());
        metadata.insert("title".into(), title.clone().into());
        metadata.insert("file_path".into(), path.display().to_string().into());
        metadata.insert("size".into(), fetched.content.len().into());
        if let Some(ref content_type) = fetched.content_type {
            metadata.insert("content_type".into(), content_type.clone().into());
        }
        ctx.ledger
            .mark_processed(&self.name, url, ProcessingStatus::Downloaded, &metadata)
            .await?;
        outcome.downloaded += 1;
        debug!("Downloaded {} ({} bytes)", url, fetched.content.len());

        if let Some(ref target) = ctx.ingest {
            let mut ingest_metadata = Map::new();
            ingest_metadata.insert("source_url".into(), url.into());
            ingest_metadata.insert("content_hash".into(), hash.into());
            ingest_metadata.insert("scraper".into(), self.name.clone().into());
            ingest_metadata.insert("title".into(), title.into());

            let result = target
                .workflow
                .ingest_document(&target.collection, &path, Some(&ingest_metadata))
                .await;
            if result.success {
                outcome.ingested += 1;
            } else {
                warn!(
                    "Index rejected {}: {}",
                    url,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Scraper for LinkListScraper {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        self.config.description.as_deref().unwrap_or("")
    }

    async fn run(&self, ctx: &ScrapeContext) -> anyhow::Result<ScrapeOutcome> {
        let mut outcome = ScrapeOutcome::default();

        'pages: for (index, page) in self.pages().enumerate() {
            if ctx.max_pages.is_some_and(|max| outcome.pages >= max) {
                break;
            }
            if ctx.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            outcome.pages += 1;

            for url in page {
                if ctx.is_cancelled() {
                    outcome.cancelled = true;
                    break 'pages;
                }
                outcome.discovered += 1;

                if ctx.ledger.is_processed(&self.name, url).await? {
                    outcome.skipped += 1;
                    continue;
                }
                if ctx.dry_run {
                    outcome.would_download.push(url.clone());
                    continue;
                }
                self.process_url(ctx, url, &mut outcome).await?;
            }

            if !ctx.dry_run {
                ctx.ledger
                    .set_custom_value(&self.name, LAST_PAGE_KEY, Value::from(index + 1))
                    .await?;
            }
        }

        info!(
            "{}: {} pages, {} discovered, {} downloaded, {} skipped, {} failed{}",
            self.name,
            outcome.pages,
            outcome.discovered,
            outcome.downloaded,
            outcome.skipped,
            outcome.failed,
            if ctx.dry_run { " (dry run)" } else { "" }
        );
        Ok(outcome)
    }

    async fn preview(&self, ctx: &ScrapeContext) -> anyhow::Result<Vec<PreviewItem>> {
        let limit = ctx.max_pages.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        for page in self.pages().take(limit) {
            for url in page {
                items.push(PreviewItem {
                    url: url.clone(),
                    title: extract_title_from_url(url),
                    already_processed: ctx.ledger.is_processed(&self.name, url).await?,
                });
            }
        }
        Ok(items)
    }
}

/// SHA-256 of `content` as lowercase hex.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Extension from the URL path, else from the content type, else `bin`.
fn file_extension(url: &str, content_type: Option<&str>) -> String {
    let from_url = url::Url::parse(url).ok().and_then(|u| {
        let last = u.path_segments()?.next_back()?.to_string();
        let (_, ext) = last.rsplit_once('.')?;
        (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .then(|| ext.to_ascii_lowercase())
    });
    from_url
        .or_else(|| {
            content_type
                .and_then(mime_guess::get_mime_extensions_str)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| "bin".to_string())
}

/// `{documents_dir}/{scraper}/{hash[0..2]}/{title}-{hash[0..8]}.{extension}`
fn content_storage_path(
    documents_dir: &Path,
    scraper_name: &str,
    content_hash: &str,
    title: &str,
    extension: &str,
) -> PathBuf {
    let filename = format!(
        "{}-{}.{}",
        sanitize_filename(title),
        &content_hash[..8],
        extension
    );
    documents_dir
        .join(sanitize_filename(scraper_name))
        .join(&content_hash[..2])
        .join(filename)
}

fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            ' ' => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.chars().take(100).collect()
    }
}
