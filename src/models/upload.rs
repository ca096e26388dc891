//! Per-document ingestion outcome.

use serde::{Deserialize, Serialize};

/// Result of pushing one document into the index.
///
/// Upload success and metadata push success are tracked independently:
/// a failed metadata push never clears `success`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    pub document_id: Option<String>,
    pub filename: String,
    pub error: Option<String>,
    pub skipped_duplicate: bool,
    pub metadata_pushed: bool,
}

impl UploadResult {
    /// A successful upload that produced `document_id`.
    pub fn uploaded(filename: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            success: true,
            document_id: Some(document_id.into()),
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// An upload skipped because the index already holds the same content.
    pub fn duplicate(filename: impl Into<String>, existing_id: impl Into<String>) -> Self {
        Self {
            success: true,
            document_id: Some(existing_id.into()),
            filename: filename.into(),
            skipped_duplicate: true,
            ..Default::default()
        }
    }

    /// A failed upload carrying the error verbatim.
    pub fn failed(filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            filename: filename.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
