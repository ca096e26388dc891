//! In-memory client fakes for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ArchiveClient, ClientError, DocumentParser, DocumentState, FlatMetadata, IndexClient,
    IndexDocument, IngestResponse, ParseResult,
};
use crate::models::UploadResult;

#[derive(Default)]
pub struct FakeArchive {
    pub unconfigured: bool,
    pub down: bool,
    pub fail_listing: bool,
    /// url -> id
    pub urls: HashMap<String, String>,
    /// id -> bytes; ids missing here download as `None`.
    pub contents: HashMap<String, Vec<u8>>,
    pub downloads: AtomicUsize,
}

impl FakeArchive {
    pub fn with_urls(urls: &[(&str, &str)]) -> Self {
        Self {
            urls: urls.iter().map(|(u, id)| (u.to_string(), id.to_string())).collect(),
            contents: urls
                .iter()
                .map(|(u, id)| (id.to_string(), format!("content of {u}").into_bytes()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveClient for FakeArchive {
    fn is_configured(&self) -> bool {
        !self.unconfigured
    }

    async fn check_alive(&self) -> bool {
        !self.down
    }

    async fn get_scraper_document_urls(
        &self,
        _scraper_name: &str,
    ) -> Result<HashMap<String, String>, ClientError> {
        if self.fail_listing {
            return Err(ClientError::Connection("archive listing failed".into()));
        }
        Ok(self.urls.clone())
    }

    async fn download_document(&self, document_id: &str) -> Result<Option<Vec<u8>>, ClientError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.contents.get(document_id).cloned())
    }
}

pub struct FakeIndex {
    pub documents: Mutex<Vec<IndexDocument>>,
    pub fail_listing: bool,
    /// content hash -> existing id
    pub existing_hashes: HashMap<String, String>,
    pub fail_hash_check: bool,
    /// Filenames whose upload returns `Err`.
    pub raise_upload_for: HashSet<String>,
    /// Filenames whose upload returns an unsuccessful result.
    pub reject_upload_for: HashSet<String>,
    /// Source URLs whose ingest is rejected.
    pub reject_ingest_for: HashSet<String>,
    pub ready_state: DocumentState,
    pub reject_metadata: bool,
    pub uploads: Mutex<Vec<String>>,
    pub ingests: Mutex<Vec<FlatMetadata>>,
    pub metadata_pushes: Mutex<Vec<(String, FlatMetadata)>>,
    pub hash_checks: AtomicUsize,
    pub hash_listings: AtomicUsize,
    pub next_id: AtomicUsize,
}

impl Default for FakeIndex {
    fn default() -> Self {
        Self {
            documents: Mutex::new(Vec::new()),
            fail_listing: false,
            existing_hashes: HashMap::new(),
            fail_hash_check: false,
            raise_upload_for: HashSet::new(),
            reject_upload_for: HashSet::new(),
            reject_ingest_for: HashSet::new(),
            ready_state: DocumentState::Ready,
            reject_metadata: false,
            uploads: Mutex::new(Vec::new()),
            ingests: Mutex::new(Vec::new()),
            metadata_pushes: Mutex::new(Vec::new()),
            hash_checks: AtomicUsize::new(0),
            hash_listings: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }
}

impl FakeIndex {
    pub fn with_source_urls(urls: &[&str]) -> Self {
        let index = Self::default();
        {
            let mut docs = index.documents.lock().unwrap();
            for (i, url) in urls.iter().enumerate() {
                let mut metadata = serde_json::Map::new();
                metadata.insert("source_url".into(), serde_json::Value::String(url.to_string()));
                docs.push(IndexDocument {
                    id: format!("existing-{i}"),
                    name: format!("doc-{i}.txt"),
                    metadata,
                });
            }
        }
        index
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn ingest_count(&self) -> usize {
        self.ingests.lock().unwrap().len()
    }

    fn allocate_id(&self) -> String {
        format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl IndexClient for FakeIndex {
    async fn list_documents(&self, _collection: &str) -> Result<Vec<IndexDocument>, ClientError> {
        if self.fail_listing {
            return Err(ClientError::Connection("index listing failed".into()));
        }
        Ok(self.documents.lock().unwrap().clone())
    }

    async fn ingest_document(
        &self,
        content_path: &Path,
        metadata: &FlatMetadata,
        _collection: &str,
    ) -> Result<IngestResponse, ClientError> {
        let source_url = metadata.get("source_url").cloned().unwrap_or_default();
        if self.reject_ingest_for.contains(&source_url) {
            return Ok(IngestResponse {
                success: false,
                document_id: None,
                error: Some("ingest rejected".into()),
            });
        }

        if self.reject_metadata && !metadata.is_empty() {
            return Ok(IngestResponse {
                success: false,
                document_id: None,
                error: Some("Index rejected document metadata".into()),
            });
        }

        let id = self.allocate_id();
        self.ingests.lock().unwrap().push(metadata.clone());
        self.documents.lock().unwrap().push(IndexDocument {
            id: id.clone(),
            name: file_name(content_path),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        });
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
        self.hash_checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_hash_check {
            return Err(ClientError::Connection("hash lookup failed".into()));
        }
        Ok(self.existing_hashes.get(content_hash).cloned())
    }

    async fn content_hashes(&self, _collection: &str) -> Result<HashMap<String, String>, ClientError> {
        self.hash_listings.fetch_add(1, Ordering::SeqCst);
        if self.fail_hash_check || self.fail_listing {
            return Err(ClientError::Connection("hash listing failed".into()));
        }
        Ok(self.existing_hashes.clone())
    }

    async fn upload_document(&self, _collection: &str, path: &Path) -> Result<UploadResult, ClientError> {
        let filename = file_name(path);
        self.uploads.lock().unwrap().push(filename.clone());

        if self.raise_upload_for.contains(&filename) {
            return Err(ClientError::Connection(format!("upload of {filename} exploded")));
        }
        if self.reject_upload_for.contains(&filename) {
            return Ok(UploadResult::failed(filename, "file type not supported"));
        }
        Ok(UploadResult::uploaded(filename, self.allocate_id()))
    }

    async fn document_state(
        &self,
        _collection: &str,
        _document_id: &str,
    ) -> Result<DocumentState, ClientError> {
        Ok(self.ready_state.clone())
    }

    async fn set_document_metadata(
        &self,
        _collection: &str,
        document_id: &str,
        metadata: &FlatMetadata,
    ) -> Result<bool, ClientError> {
        if self.reject_metadata {
            return Ok(false);
        }
        self.metadata_pushes
            .lock()
            .unwrap()
            .push((document_id.to_string(), metadata.clone()));
        Ok(true)
    }
}

/// Parser that accepts everything except the listed filenames.
#[derive(Default)]
pub struct FakeParser {
    pub fail_for: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeParser {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentParser for FakeParser {
    async fn parse_document(
        &self,
        path: &Path,
        _context: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ParseResult, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_for.contains(&file_name(path)) {
            return Ok(ParseResult::failed("unreadable"));
        }
        Ok(ParseResult::parsed(PathBuf::from(path)))
    }
}
