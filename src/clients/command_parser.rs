//! Parser backed by an external text extraction command (`pdftotext`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ClientError, DocumentParser, ParseResult};

/// Extensions that are already text and pass straight through.
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json", "html", "htm", "xml"];

/// Runs `<command> -layout <input> <output>` and hands back the output path.
#[derive(Debug, Clone)]
pub struct CommandParser {
    command: String,
}

impl CommandParser {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Whether the configured command can be found on `PATH`.
    pub fn is_available(&self) -> bool {
        which::which(&self.command).is_ok()
    }

    fn is_text(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    fn output_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".txt");
        path.with_file_name(name)
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new("pdftotext")
    }
}

#[async_trait]
impl DocumentParser for CommandParser {
    async fn parse_document(
        &self,
        path: &Path,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ParseResult, ClientError> {
        if Self::is_text(path) {
            return Ok(ParseResult::parsed(path.to_path_buf()));
        }

        let output_path = Self::output_path(path);
        debug!(
            "Parsing {} with {} (source: {})",
            path.display(),
            self.command,
            context.get("source_url").and_then(|v| v.as_str()).unwrap_or("-")
        );

        let output = match Command::new(&self.command)
            .arg("-layout")
            .arg(path)
            .arg(&output_path)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::Parser(format!(
                    "{} not found (install poppler-utils)",
                    self.command
                )));
            }
            Err(e) => return Err(ClientError::Io(e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(ParseResult::failed(format!("{} failed: {}", self.command, stderr.trim())));
        }

        let metadata = tokio::fs::metadata(&output_path).await?;
        if metadata.len() == 0 {
            return Ok(ParseResult::failed("no text extracted"));
        }
        Ok(ParseResult::parsed(output_path))
    }
}
