//! RAGFlow index adapter.
//!
//! A collection is a RAGFlow dataset id. Uploaded documents are parsed
//! server-side; readiness is the document's `run` state.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{check_status, ClientError, DocumentState, FlatMetadata, IndexClient, IndexDocument, IngestResponse};
use crate::models::UploadResult;

const PAGE_SIZE: usize = 100;

/// Configuration for the RAGFlow index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagflowConfig {
    /// Base URL, e.g. `http://ragflow:9380`.
    #[serde(default)]
    pub url: Option<String>,
    /// API key. Prefer the `SCRAPELEDGER_INDEX_API_KEY` env var.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Dataset id documents are ingested into.
    #[serde(default)]
    pub collection: Option<String>,
    /// Skip uploads whose content hash the dataset already holds.
    #[serde(default = "default_check_duplicates")]
    pub check_duplicates: bool,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_check_duplicates() -> bool {
    true
}
fn default_ready_timeout_secs() -> u64 {
    300
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for RagflowConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            collection: None,
            check_duplicates: default_check_duplicates(),
            ready_timeout_secs: default_ready_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Standard RAGFlow response wrapper.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Option<T>, ClientError> {
        if self.code != 0 {
            return Err(ClientError::Api {
                status: 200,
                message: format!(
                    "code {}: {}",
                    self.code,
                    self.message.unwrap_or_else(|| "unknown error".to_string())
                ),
            });
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    #[serde(default)]
    docs: Vec<RagflowDocument>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct RagflowDocument {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    meta_fields: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    run: Option<String>,
    #[serde(default)]
    progress_msg: Option<String>,
}

impl RagflowDocument {
    fn state(&self) -> DocumentState {
        match self.run.as_deref() {
            Some("DONE") => DocumentState::Ready,
            Some(run @ ("FAIL" | "CANCEL")) => DocumentState::Failed(
                self.progress_msg
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| run.to_lowercase()),
            ),
            _ => DocumentState::Pending,
        }
    }
}

impl From<RagflowDocument> for IndexDocument {
    fn from(doc: RagflowDocument) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            metadata: doc.meta_fields.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadedDocument {
    id: String,
}

/// RAGFlow HTTP API client.
pub struct RagflowIndexClient {
    config: RagflowConfig,
    client: Client,
}

impl RagflowIndexClient {
    pub fn new(config: RagflowConfig, user_agent: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RagflowConfig {
        &self.config
    }

    fn base_url(&self) -> Result<&str, ClientError> {
        self.config
            .url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or(ClientError::NotConfigured("index"))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let url = format!("{}/api/v1{}", self.base_url()?, path);
        let request = self.client.request(method, url);
        Ok(match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, ClientError> {
        let resp = check_status(request.send().await?).await?;
        let envelope: Envelope<T> = resp.json().await?;
        envelope.into_data()
    }

    async fn list_page(
        &self,
        collection: &str,
        page: usize,
        document_id: Option<&str>,
    ) -> Result<DocumentList, ClientError> {
        let mut request = self
            .request(Method::GET, &format!("/datasets/{}/documents", collection))?
            .query(&[("page", page.to_string()), ("page_size", PAGE_SIZE.to_string())]);
        if let Some(id) = document_id {
            request = request.query(&[("id", id)]);
        }
        Ok(self.send::<DocumentList>(request).await?.unwrap_or(DocumentList {
            docs: Vec::new(),
            total: 0,
        }))
    }

    async fn upload_file(&self, collection: &str, path: &Path) -> Result<Option<String>, ClientError> {
        let bytes = tokio::fs::read(path).await?;
        let filename = file_name(path);
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime.essence_str())
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        let request = self
            .request(Method::POST, &format!("/datasets/{}/documents", collection))?
            .multipart(Form::new().part("file", part));
        let uploaded: Vec<UploadedDocument> = self.send(request).await?.unwrap_or_default();
        Ok(uploaded.into_iter().next().map(|doc| doc.id))
    }

    async fn delete_document(&self, collection: &str, document_id: &str) -> Result<(), ClientError> {
        let request = self
            .request(Method::DELETE, &format!("/datasets/{}/documents", collection))?
            .json(&serde_json::json!({ "ids": [document_id] }));
        self.send::<serde_json::Value>(request).await?;
        Ok(())
    }

    async fn start_parsing(&self, collection: &str, document_id: &str) -> Result<(), ClientError> {
        let request = self
            .request(Method::POST, &format!("/datasets/{}/chunks", collection))?
            .json(&serde_json::json!({ "document_ids": [document_id] }));
        self.send::<serde_json::Value>(request).await?;
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string())
}

#[async_trait]
impl IndexClient for RagflowIndexClient {
    fn is_configured(&self) -> bool {
        self.base_url().is_ok() && self.config.api_key.is_some()
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<IndexDocument>, ClientError> {
        let mut documents = Vec::new();
        let mut page = 1;
        loop {
            let list = self.list_page(collection, page, None).await?;
            let fetched = list.docs.len();
            documents.extend(list.docs.into_iter().map(IndexDocument::from));

            if fetched < PAGE_SIZE || (list.total > 0 && documents.len() >= list.total) {
                break;
            }
            page += 1;
        }
        debug!("Index collection {} holds {} documents", collection, documents.len());
        Ok(documents)
    }

    async fn ingest_document(
        &self,
        content_path: &Path,
        metadata: &FlatMetadata,
        collection: &str,
    ) -> Result<IngestResponse, ClientError> {
        let Some(document_id) = self.upload_file(collection, content_path).await? else {
            return Ok(IngestResponse {
                success: false,
                document_id: None,
                error: Some("Upload returned no document".to_string()),
            });
        };

        // Without its metadata the document cannot be matched to its source
        // URL, so a failed push undoes the upload.
        if !metadata.is_empty() {
            let refusal = match self.set_document_metadata(collection, &document_id, metadata).await {
                Ok(true) => None,
                Ok(false) => Some("Index rejected document metadata".to_string()),
                Err(e) => Some(format!("Metadata push failed: {}", e)),
            };
            if let Some(error) = refusal {
                warn!("{} for {}, removing upload", error, document_id);
                if let Err(e) = self.delete_document(collection, &document_id).await {
                    warn!("Could not remove orphaned upload {}: {}", document_id, e);
                }
                return Ok(IngestResponse {
                    success: false,
                    document_id: None,
                    error: Some(error),
                });
            }
        }
        self.start_parsing(collection, &document_id).await?;

        Ok(IngestResponse {
            success: true,
            document_id: Some(document_id),
            error: None,
        })
    }

    async fn check_document_exists(
        &self,
        collection: &str,
        content_hash: &str,
    ) -> Result<Option<String>, ClientError> {
        Ok(self.content_hashes(collection).await?.remove(content_hash))
    }

    async fn upload_document(&self, collection: &str, path: &Path) -> Result<UploadResult, ClientError> {
        let filename = file_name(path);
        let Some(document_id) = self.upload_file(collection, path).await? else {
            return Ok(UploadResult::failed(filename, "Upload returned no document"));
        };
        self.start_parsing(collection, &document_id).await?;
        Ok(UploadResult::uploaded(filename, document_id))
    }

    async fn document_state(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<DocumentState, ClientError> {
        let list = self.list_page(collection, 1, Some(document_id)).await?;
        match list.docs.into_iter().find(|doc| doc.id == document_id) {
            Some(doc) => Ok(doc.state()),
            None => Ok(DocumentState::Failed(format!(
                "document {} not found in collection",
                document_id
            ))),
        }
    }

    async fn set_document_metadata(
        &self,
        collection: &str,
        document_id: &str,
        metadata: &FlatMetadata,
    ) -> Result<bool, ClientError> {
        let request = self
            .request(
                Method::PUT,
                &format!("/datasets/{}/documents/{}", collection, document_id),
            )?
            .json(&serde_json::json!({ "meta_fields": metadata }));

        match self.send::<serde_json::Value>(request).await {
            Ok(_) => Ok(true),
            Err(ClientError::Api { message, .. }) => {
                debug!("Metadata update for {} rejected: {}", document_id, message);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
