//! Ingestion workflow: dedup check, upload, wait-ready, metadata push.
//!
//! Each document runs through the steps independently. A batch never aborts
//! because one document failed; every failure becomes a failed
//! [`UploadResult`] for that document alone.

mod metadata;

pub use metadata::{content_hash, flatten_metadata};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clients::{IndexClient, RagflowConfig, ReadyState};
use crate::models::UploadResult;

/// Knobs for the ingestion workflow.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Query the index for the content hash before uploading.
    pub check_duplicates: bool,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            check_duplicates: true,
            ready_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl From<&RagflowConfig> for IngestConfig {
    fn from(config: &RagflowConfig) -> Self {
        Self {
            check_duplicates: config.check_duplicates,
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
        }
    }
}

/// A document queued for ingestion.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub path: PathBuf,
    pub metadata: Option<Map<String, Value>>,
}

impl DocumentInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Results of a batch, in input order, with summary counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<UploadResult>,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub metadata_pushed: usize,
}

impl BatchOutcome {
    fn push(&mut self, result: UploadResult) {
        if !result.success {
            self.failed += 1;
        } else if result.skipped_duplicate {
            self.skipped += 1;
        } else {
            self.uploaded += 1;
        }
        if result.metadata_pushed {
            self.metadata_pushed += 1;
        }
        self.results.push(result);
    }
}

/// Drives documents into an [`IndexClient`].
#[derive(Clone)]
pub struct IngestionWorkflow {
    index: Arc<dyn IndexClient>,
    config: IngestConfig,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

impl IngestionWorkflow {
    pub fn new(index: Arc<dyn IndexClient>, config: IngestConfig) -> Self {
        Self { index, config }
    }

    pub fn index(&self) -> &Arc<dyn IndexClient> {
        &self.index
    }

    /// Ingest one document.
    ///
    /// Never returns an error: failures are reported through the result.
    pub async fn ingest_document(
        &self,
        collection: &str,
        path: &Path,
        metadata: Option<&Map<String, Value>>,
    ) -> UploadResult {
        self.ingest_one(collection, path, metadata, None).await
    }

    /// Ingest one document. With `known_hashes`, duplicates are looked up
    /// there instead of asking the index, and the map learns this document's
    /// hash once its metadata is stored.
    async fn ingest_one(
        &self,
        collection: &str,
        path: &Path,
        metadata: Option<&Map<String, Value>>,
        mut known_hashes: Option<&mut HashMap<String, String>>,
    ) -> UploadResult {
        let filename = display_name(path);
        let hash = metadata.and_then(content_hash);

        if self.config.check_duplicates {
            if let Some(hash) = hash {
                let existing = match known_hashes.as_deref() {
                    Some(known) => Ok(known.get(hash).cloned()),
                    None => self.index.check_document_exists(collection, hash).await,
                };
                match existing {
                    Ok(Some(existing_id)) => {
                        debug!("{} already indexed as {}", filename, existing_id);
                        return UploadResult::duplicate(filename, existing_id);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Duplicate check for {} failed, uploading anyway: {}", filename, e),
                }
            }
        }

        let mut result = match self.index.upload_document(collection, path).await {
            Ok(result) if result.success => result,
            Ok(mut result) => {
                if result.filename.is_empty() {
                    result.filename = filename;
                }
                if result.error.is_none() {
                    result.error = Some("upload failed".to_string());
                }
                return result;
            }
            Err(e) => return UploadResult::failed(filename, e.to_string()),
        };
        if result.filename.is_empty() {
            result.filename = filename;
        }

        let Some(document_id) = result.document_id.clone() else {
            return result;
        };

        match self
            .index
            .wait_for_document_ready(
                collection,
                &document_id,
                self.config.ready_timeout,
                self.config.poll_interval,
            )
            .await
        {
            ReadyState::Ready => debug!("{} ready as {}", result.filename, document_id),
            ReadyState::TimedOut => warn!(
                "{} not ready after {:?}, pushing metadata anyway",
                result.filename, self.config.ready_timeout
            ),
            ReadyState::Failed(reason) => {
                result.success = false;
                result.error = Some(format!("Document processing failed: {}", reason));
                return result;
            }
        }

        if let Some(metadata) = metadata.filter(|m| !m.is_empty()) {
            let flat = flatten_metadata(metadata);
            match self
                .index
                .set_document_metadata(collection, &document_id, &flat)
                .await
            {
                Ok(true) => {
                    result.metadata_pushed = true;
                    if let (Some(known), Some(hash)) = (known_hashes.as_deref_mut(), hash) {
                        known.insert(hash.to_string(), document_id.clone());
                    }
                }
                Ok(false) => warn!("Index rejected metadata for {}", result.filename),
                Err(e) => warn!("Metadata push for {} failed: {}", result.filename, e),
            }
        }

        result
    }

    /// Hash listing shared by a batch, or `None` to fall back to per-document
    /// lookups.
    async fn prefetch_hashes(
        &self,
        collection: &str,
        documents: &[DocumentInput],
    ) -> Option<HashMap<String, String>> {
        let wanted = self.config.check_duplicates
            && documents
                .iter()
                .any(|doc| doc.metadata.as_ref().and_then(content_hash).is_some());
        if !wanted {
            return None;
        }
        match self.index.content_hashes(collection).await {
            Ok(known) => {
                debug!("Index holds {} hashed documents", known.len());
                Some(known)
            }
            Err(e) => {
                warn!("Listing index hashes failed, checking per document: {}", e);
                None
            }
        }
    }

    /// Ingest a batch. Results come back in input order.
    ///
    /// The index's content hashes are fetched once for the whole batch.
    pub async fn ingest_with_metadata(
        &self,
        collection: &str,
        documents: &[DocumentInput],
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut known_hashes = self.prefetch_hashes(collection, documents).await;

        for doc in documents {
            let attempt = AssertUnwindSafe(self.ingest_one(
                collection,
                &doc.path,
                doc.metadata.as_ref(),
                known_hashes.as_mut(),
            ))
            .catch_unwind()
            .await;

            let result = attempt.unwrap_or_else(|_| {
                warn!("Ingestion of {} panicked", doc.path.display());
                UploadResult::failed(display_name(&doc.path), "ingestion panicked")
            });
            outcome.push(result);
        }

        info!(
            "Ingestion complete: {} uploaded, {} duplicates skipped, {} failed, {} metadata pushed",
            outcome.uploaded, outcome.skipped, outcome.failed, outcome.metadata_pushed
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::testing::FakeIndex;
    use crate::clients::DocumentState;
    use serde_json::json;

    fn fast_config() -> IngestConfig {
        IngestConfig {
            check_duplicates: true,
            ready_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn workflow(index: FakeIndex) -> (IngestionWorkflow, Arc<FakeIndex>) {
        let index = Arc::new(index);
        (IngestionWorkflow::new(index.clone(), fast_config()), index)
    }

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_pushes_flat_metadata() {
        let (wf, index) = workflow(FakeIndex::default());
        let result = wf
            .ingest_document(
                "ds",
                Path::new("/docs/a.pdf"),
                Some(&meta(json!({"content_hash": "h1", "agency": {"name": "FBI"}}))),
            )
            .await;

        assert!(result.success);
        assert!(result.metadata_pushed);
        assert!(!result.skipped_duplicate);
        assert_eq!(result.filename, "a.pdf");

        let pushes = index.metadata_pushes.lock().unwrap();
        assert_eq!(pushes[0].0, result.document_id.clone().unwrap());
        assert_eq!(pushes[0].1["agency.name"], "FBI");
    }

    #[tokio::test]
    async fn test_duplicate_never_uploads() {
        let mut fake = FakeIndex::default();
        fake.existing_hashes.insert("h1".into(), "existing-7".into());
        let (wf, index) = workflow(fake);

        let result = wf
            .ingest_document("ds", Path::new("a.pdf"), Some(&meta(json!({"sha256": "h1"}))))
            .await;

        assert!(result.success);
        assert!(result.skipped_duplicate);
        assert_eq!(result.document_id.as_deref(), Some("existing-7"));
        assert_eq!(index.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_check_disabled_or_failing_still_uploads() {
        let mut fake = FakeIndex::default();
        fake.existing_hashes.insert("h1".into(), "existing-7".into());
        let index = Arc::new(fake);
        let wf = IngestionWorkflow::new(
            index.clone(),
            IngestConfig {
                check_duplicates: false,
                ..fast_config()
            },
        );
        let result = wf
            .ingest_document("ds", Path::new("a.pdf"), Some(&meta(json!({"hash": "h1"}))))
            .await;
        assert!(!result.skipped_duplicate);
        assert_eq!(index.upload_count(), 1);

        let (wf, index) = workflow(FakeIndex {
            fail_hash_check: true,
            ..Default::default()
        });
        let result = wf
            .ingest_document("ds", Path::new("a.pdf"), Some(&meta(json!({"hash": "h1"}))))
            .await;
        assert!(result.success);
        assert_eq!(index.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_upload_stops_pipeline() {
        let mut fake = FakeIndex::default();
        fake.reject_upload_for.insert("a.exe".into());
        let (wf, index) = workflow(fake);

        let result = wf
            .ingest_document("ds", Path::new("a.exe"), Some(&meta(json!({"k": "v"}))))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("file type not supported"));
        assert!(index.metadata_pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ready_timeout_still_pushes_metadata() {
        let (wf, _index) = workflow(FakeIndex {
            ready_state: DocumentState::Pending,
            ..Default::default()
        });

        let result = wf
            .ingest_document("ds", Path::new("a.pdf"), Some(&meta(json!({"k": "v"}))))
            .await;
        assert!(result.success);
        assert!(result.metadata_pushed);
    }

    #[tokio::test]
    async fn test_processing_failure_marks_result_failed() {
        let (wf, index) = workflow(FakeIndex {
            ready_state: DocumentState::Failed("corrupt pdf".into()),
            ..Default::default()
        });

        let result = wf
            .ingest_document("ds", Path::new("a.pdf"), Some(&meta(json!({"k": "v"}))))
            .await;
        assert!(!result.success);
        assert!(result.document_id.is_some());
        assert!(result.error.unwrap().contains("corrupt pdf"));
        assert!(index.metadata_pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_rejection_keeps_success() {
        let (wf, _index) = workflow(FakeIndex {
            reject_metadata: true,
            ..Default::default()
        });

        let result = wf
            .ingest_document("ds", Path::new("a.pdf"), Some(&meta(json!({"k": "v"}))))
            .await;
        assert!(result.success);
        assert!(!result.metadata_pushed);
    }

    #[tokio::test]
    async fn test_batch_lists_hashes_once() {
        let mut fake = FakeIndex::default();
        fake.existing_hashes.insert("h0".into(), "existing-0".into());
        let (wf, index) = workflow(fake);

        let docs: Vec<DocumentInput> = ["h0", "h1", "h2", "h1"]
            .iter()
            .enumerate()
            .map(|(i, hash)| {
                DocumentInput::new(format!("/tmp/doc{i}.pdf"))
                    .with_metadata(meta(json!({"content_hash": hash})))
            })
            .collect();

        let outcome = wf.ingest_with_metadata("ds", &docs).await;
        assert_eq!(index.hash_listings.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(index.hash_checks.load(std::sync::atomic::Ordering::SeqCst), 0);

        // doc0 was already indexed; doc3 repeats doc1 from this batch.
        assert!(outcome.results[0].skipped_duplicate);
        assert!(outcome.results[3].skipped_duplicate);
        assert_eq!(outcome.results[3].document_id, outcome.results[1].document_id);
        assert_eq!(outcome.uploaded, 2);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(index.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_falls_back_when_hash_listing_fails() {
        let mut fake = FakeIndex {
            fail_listing: true,
            ..Default::default()
        };
        fake.existing_hashes.insert("h1".into(), "existing-1".into());
        let (wf, index) = workflow(fake);

        let docs = vec![
            DocumentInput::new("/tmp/a.pdf").with_metadata(meta(json!({"content_hash": "h1"}))),
            DocumentInput::new("/tmp/b.pdf").with_metadata(meta(json!({"content_hash": "h2"}))),
        ];
        let outcome = wf.ingest_with_metadata("ds", &docs).await;
        assert_eq!(index.hash_checks.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(outcome.results[0].skipped_duplicate);
        assert_eq!(outcome.uploaded, 1);
    }

    #[tokio::test]
    async fn test_batch_isolates_single_failure() {
        let mut fake = FakeIndex::default();
        fake.raise_upload_for.insert("doc2.pdf".into());
        let (wf, _index) = workflow(fake);

        let docs: Vec<DocumentInput> = (1..=4)
            .map(|i| {
                DocumentInput::new(format!("/tmp/doc{i}.pdf"))
                    .with_metadata(meta(json!({"source_url": format!("https://a/{i}")})))
            })
            .collect();

        let outcome = wf.ingest_with_metadata("ds", &docs).await;
        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.uploaded, 3);
        assert_eq!(outcome.metadata_pushed, 3);

        assert!(!outcome.results[1].success);
        assert!(outcome.results[1].error.as_ref().unwrap().contains("exploded"));
        for i in [0, 2, 3] {
            assert!(outcome.results[i].success);
            assert!(outcome.results[i].document_id.is_some());
            assert_eq!(outcome.results[i].filename, format!("doc{}.pdf", i + 1));
        }
    }
}
