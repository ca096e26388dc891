//! Document parser contract.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::ClientError;

/// Outcome of parsing a document to text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    pub success: bool,
    /// Location of the extracted text when `success` is set.
    pub text_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl ParseResult {
    pub fn parsed(text_path: PathBuf) -> Self {
        Self {
            success: true,
            text_path: Some(text_path),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            text_path: None,
            error: Some(error.into()),
        }
    }
}

/// Converts a stored document into a text file the index can ingest.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Parse `path`. `context` carries provenance for logging and naming.
    async fn parse_document(
        &self,
        path: &Path,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ParseResult, ClientError>;
}
