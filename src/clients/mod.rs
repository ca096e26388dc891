//! Contracts for the external systems the ledger is reconciled against.
//!
//! - [`ArchiveClient`]: system of record for stored documents
//! - [`IndexClient`]: search/retrieval index holding ingested content
//! - [`DocumentParser`]: turns a stored document into indexable text
//!
//! Concrete adapters normalize their wire responses into the fixed types
//! defined here, so the workflows never see protocol details.

mod archive;
mod command_parser;
mod index;
mod paperless;
mod parser;
mod ragflow;

#[cfg(test)]
pub(crate) mod testing;

pub use archive::ArchiveClient;
pub use command_parser::CommandParser;
pub use index::{DocumentState, FlatMetadata, IndexClient, IndexDocument, IngestResponse, ReadyState};
pub use paperless::{PaperlessArchiveClient, PaperlessConfig};
pub use parser::{DocumentParser, ParseResult};
pub use ragflow::{RagflowConfig, RagflowIndexClient};

use thiserror::Error;

/// Errors from external clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Parser failed: {0}")]
    Parser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            ClientError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ClientError::Connection(e.to_string())
        }
    }
}

/// Turn a non-success HTTP response into an [`ClientError::Api`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = if body.chars().count() > 200 {
        format!("{}...", body.chars().take(200).collect::<String>())
    } else {
        body
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
