//! Index client contract.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::ClientError;
use crate::models::UploadResult;

/// Flat scalar metadata, the only shape index metadata APIs accept.
pub type FlatMetadata = BTreeMap<String, String>;

/// A document as listed by the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    /// Display name, usually the uploaded filename.
    pub name: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl IndexDocument {
    /// Source URL this document was ingested from.
    ///
    /// Metadata is caller-defined, so this falls back from `source_url` to
    /// `url` to the display name.
    pub fn source_url(&self) -> &str {
        ["source_url", "url"]
            .iter()
            .filter_map(|key| self.metadata.get(*key).and_then(|v| v.as_str()))
            .find(|s| !s.is_empty())
            .unwrap_or(self.name.as_str())
    }
}

/// Response from a combined upload-and-describe ingest call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestResponse {
    pub success: bool,
    pub document_id: Option<String>,
    pub error: Option<String>,
}

/// Processing state of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentState {
    Pending,
    Ready,
    Failed(String),
}

/// Result of waiting for a document to become searchable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Ready,
    /// The index gave up on the document.
    Failed(String),
    TimedOut,
}

/// Search/retrieval index: the source of truth for "is this searchable?".
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Whether connection details are present. No network access.
    fn is_configured(&self) -> bool {
        true
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<IndexDocument>, ClientError>;

    /// Upload a text file and attach metadata in one call.
    async fn ingest_document(
        &self,
        content_path: &Path,
        metadata: &FlatMetadata,
        collection: &str,
    ) -> Result<IngestResponse, ClientError>;

    /// Id of a document already holding content with this hash.
    async fn check_document_exists(
        &self,
        collection: &str,
        content_hash: &str,
    ) -> Result<Option<String>, ClientError>;

    /// Content hash to document id for every document in the collection
    /// that carries a `content_hash` metadata value.
    ///
    /// Batch ingestion fetches this once instead of calling
    /// [`check_document_exists`](Self::check_document_exists) per document.
    async fn content_hashes(&self, collection: &str) -> Result<HashMap<String, String>, ClientError> {
        Ok(self
            .list_documents(collection)
            .await?
            .into_iter()
            .filter_map(|doc| {
                let hash = doc.metadata.get("content_hash")?.as_str()?.to_string();
                Some((hash, doc.id))
            })
            .collect())
    }

    async fn upload_document(&self, collection: &str, path: &Path) -> Result<UploadResult, ClientError>;

    async fn document_state(&self, collection: &str, document_id: &str)
        -> Result<DocumentState, ClientError>;

    /// Poll [`document_state`](Self::document_state) until the document is
    /// ready, failed, or `timeout` passes. Poll errors count as pending.
    async fn wait_for_document_ready(
        &self,
        collection: &str,
        document_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> ReadyState {
        let deadline = Instant::now() + timeout;
        loop {
            match self.document_state(collection, document_id).await {
                Ok(DocumentState::Ready) => return ReadyState::Ready,
                Ok(DocumentState::Failed(reason)) => return ReadyState::Failed(reason),
                Ok(DocumentState::Pending) => {}
                Err(e) => debug!("Status poll for {} failed: {}", document_id, e),
            }

            if Instant::now() + poll_interval > deadline {
                return ReadyState::TimedOut;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Replace a document's metadata. `Ok(false)` means the index refused it.
    async fn set_document_metadata(
        &self,
        collection: &str,
        document_id: &str,
        metadata: &FlatMetadata,
    ) -> Result<bool, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(metadata: serde_json::Value) -> IndexDocument {
        IndexDocument {
            id: "1".into(),
            name: "report.pdf".into(),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_source_url_fallback_chain() {
        assert_eq!(
            doc(json!({"source_url": "https://a/1", "url": "https://a/2"})).source_url(),
            "https://a/1"
        );
        assert_eq!(doc(json!({"url": "https://a/2"})).source_url(), "https://a/2");
        assert_eq!(doc(json!({"source_url": ""})).source_url(), "report.pdf");
        assert_eq!(doc(json!({})).source_url(), "report.pdf");
    }
}
