//! In-memory archive, index and parser shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use scrapeledger::clients::{
    ArchiveClient, ClientError, DocumentParser, DocumentState, FlatMetadata, IndexClient,
    IndexDocument, IngestResponse, ParseResult,
};
use scrapeledger::models::UploadResult;
use scrapeledger::repository::{DbContext, LedgerRepository};
use tempfile::TempDir;

pub async fn temp_ledger() -> (LedgerRepository, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = DbContext::new(&dir.path().join("ledger.db"));
    let ledger = ctx.ledger();
    ledger.ensure_schema().await.unwrap();
    (ledger, dir)
}

/// Archive holding `url -> (id, bytes)`.
#[derive(Default)]
pub struct MemoryArchive {
    documents: HashMap<String, (String, Vec<u8>)>,
}

impl MemoryArchive {
    pub fn with(urls: &[&str]) -> Self {
        Self {
            documents: urls
                .iter()
                .enumerate()
                .map(|(i, url)| {
                    (
                        url.to_string(),
                        ((i + 100).to_string(), format!("archived {url}").into_bytes()),
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ArchiveClient for MemoryArchive {
    fn is_configured(&self) -> bool {
        true
    }

    async fn check_alive(&self) -> bool {
        true
    }

    async fn get_scraper_document_urls(
        &self,
        _scraper_name: &str,
    ) -> Result<HashMap<String, String>, ClientError> {
        Ok(self
            .documents
            .iter()
            .map(|(url, (id, _))| (url.clone(), id.clone()))
            .collect())
    }

    async fn download_document(&self, document_id: &str) -> Result<Option<Vec<u8>>, ClientError> {
        Ok(self
            .documents
            .values()
            .find(|(id, _)| id == document_id)
            .map(|(_, bytes)| bytes.clone()))
    }
}

/// Index that stores what it is given and can be told to fail uploads.
#[derive(Default)]
pub struct MemoryIndex {
    pub documents: Mutex<Vec<IndexDocument>>,
    pub failing_uploads: HashSet<String>,
    pub hashes: Mutex<HashMap<String, String>>,
    pub next_id: AtomicUsize,
}

impl MemoryIndex {
    pub fn with_source_urls(urls: &[&str]) -> Self {
        let index = Self::default();
        for url in urls {
            let mut metadata = serde_json::Map::new();
            metadata.insert("source_url".into(), (*url).into());
            index.push(url, metadata);
        }
        index
    }

    fn push(&self, name: &str, metadata: serde_json::Map<String, serde_json::Value>) -> String {
        let id = format!("idx-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.documents.lock().unwrap().push(IndexDocument {
            id: id.clone(),
            name: name.to_string(),
            metadata,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl IndexClient for MemoryIndex {
    async fn list_documents(&self, _collection: &str) -> Result<Vec<IndexDocument>, ClientError> {
        Ok(self.documents.lock().unwrap().clone())
    }

    async fn ingest_document(
        &self,
        content_path: &Path,
        metadata: &FlatMetadata,
        _collection: &str,
    ) -> Result<IngestResponse, ClientError> {
        let id = self.push(
            &file_name(content_path),
            metadata
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        );
        Ok(IngestResponse {
            success: true,
            document_id: Some(id),
            error: None,
        })
    }

    async fn check_document_exists(
        &self,
        _collection: &str,
        content_hash: &str,
    ) -> Result<Option<String>, ClientError> {
        Ok(self.hashes.lock().unwrap().get(content_hash).cloned())
    }

    async fn upload_document(&self, _collection: &str, path: &Path) -> Result<UploadResult, ClientError> {
        let filename = file_name(path);
        if self.failing_uploads.contains(&filename) {
            return Err(ClientError::Connection("connection reset".into()));
        }
        let id = self.push(&filename, serde_json::Map::new());
        Ok(UploadResult::uploaded(filename, id))
    }

    async fn document_state(
        &self,
        _collection: &str,
        _document_id: &str,
    ) -> Result<DocumentState, ClientError> {
        Ok(DocumentState::Ready)
    }

    async fn set_document_metadata(
        &self,
        _collection: &str,
        document_id: &str,
        metadata: &FlatMetadata,
    ) -> Result<bool, ClientError> {
        let mut documents = self.documents.lock().unwrap();
        let Some(doc) = documents.iter_mut().find(|d| d.id == document_id) else {
            return Ok(false);
        };
        for (key, value) in metadata {
            doc.metadata
                .insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        if let Some(hash) = metadata.get("content_hash") {
            self.hashes
                .lock()
                .unwrap()
                .insert(hash.clone(), document_id.to_string());
        }
        Ok(true)
    }
}

/// Parser that hands the downloaded file straight back.
pub struct PassthroughParser;

#[async_trait]
impl DocumentParser for PassthroughParser {
    async fn parse_document(
        &self,
        path: &Path,
        _context: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ParseResult, ClientError> {
        Ok(ParseResult::parsed(PathBuf::from(path)))
    }
}
