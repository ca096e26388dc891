//! Configuration: runtime settings plus the optional TOML config file.
//!
//! Precedence, lowest to highest: built-in defaults, the config file,
//! the `--data` flag, environment variables.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clients::{PaperlessConfig, RagflowConfig};
use crate::repository::util::{is_postgres_url, redact_url_password};
use crate::repository::{DbContext, DieselError};
use crate::scrapers::LinkListConfig;

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "scrapeledger.db";
/// Config filename looked up in the data directory.
pub const CONFIG_FILENAME: &str = "scrapeledger.toml";
const DOCUMENTS_SUBDIR: &str = "documents";

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const ARCHIVE_TOKEN_ENV: &str = "SCRAPELEDGER_ARCHIVE_TOKEN";
pub const INDEX_API_KEY_ENV: &str = "SCRAPELEDGER_INDEX_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("PostgreSQL URL given but this build lacks the 'postgres' feature: {0}")]
    PostgresUnsupported(String),
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    pub database_filename: String,
    /// Overrides data_dir/database_filename when set.
    pub database_url: Option<String>,
    /// Where scraped documents are stored.
    pub documents_dir: PathBuf,
    pub user_agent: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        // Documents dir -> home dir -> current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scrapeledger");

        Self {
            documents_dir: data_dir.join(DOCUMENTS_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            user_agent: format!("scrapeledger/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: 30,
        }
    }
}

impl Settings {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            documents_dir: data_dir.join(DOCUMENTS_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    /// The database URL, built from the data directory if not set.
    pub fn database_url(&self) -> String {
        match self.database_url {
            Some(ref url) => url.clone(),
            None => format!("sqlite:{}", self.database_path().display()),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (label, dir) in [("data", &self.data_dir), ("documents", &self.documents_dir)] {
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {} directory '{}': {}", label, dir.display(), e),
                )
            })?;
        }
        Ok(())
    }

    pub fn create_db_context(&self) -> Result<DbContext, DieselError> {
        DbContext::from_url(&self.database_url())
    }
}

/// `[parser]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Text extraction command, invoked as `<command> -layout <in> <out>`.
    #[serde(default = "default_parser_command")]
    pub command: String,
}

fn default_parser_command() -> String {
    "pdftotext".to_string()
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            command: default_parser_command(),
        }
    }
}

/// Config file structure.
///
/// ```toml
/// data_dir = "~/scrapes"
///
/// [archive]
/// url = "http://paperless:8000"
///
/// [index]
/// url = "http://ragflow:9380"
/// collection = "d41d8cd9"
///
/// [scrapers.fbi]
/// urls = ["https://vault.fbi.gov/a.pdf"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default)]
    pub archive: PaperlessConfig,
    #[serde(default)]
    pub index: RagflowConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub scrapers: BTreeMap<String, LinkListConfig>,
    /// File this was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let mut config = Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Directory of the config file, for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(Path::to_path_buf))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
            settings.documents_dir = settings.data_dir.join(DOCUMENTS_SUBDIR);
        }
        if let Some(ref documents_dir) = self.documents_dir {
            settings.documents_dir = self.resolve_path(documents_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
    }

    /// Fill secrets from the environment. Env values win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = env_var(ARCHIVE_TOKEN_ENV) {
            self.archive.token = Some(token);
        }
        if let Some(key) = env_var(INDEX_API_KEY_ENV) {
            self.index.api_key = Some(key);
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file (`--config`).
    pub config_path: Option<PathBuf>,
    /// Data directory or database file (`--data`).
    pub data: Option<PathBuf>,
}

/// Resolve `--data`: a `.db` file selects both directory and filename.
fn resolve_data_path(path: &Path) -> (PathBuf, Option<String>) {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };

    if path
        .extension()
        .is_some_and(|ext| ext == "db" || ext == "sqlite" || ext == "sqlite3")
    {
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let filename = path.file_name().map(|f| f.to_string_lossy().to_string());
        (dir, filename)
    } else {
        (path, None)
    }
}

/// Load the config file: `--config`, else `scrapeledger.toml` in the data
/// directory, else defaults.
async fn load_file_config(
    options: &LoadOptions,
    data_dir: &Path,
) -> Result<Config, ConfigError> {
    if let Some(ref path) = options.config_path {
        return Config::load_from_path(path).await;
    }

    let candidate = data_dir.join(CONFIG_FILENAME);
    if candidate.exists() {
        tracing::debug!("Found config in data dir: {}", candidate.display());
        return Config::load_from_path(&candidate).await;
    }

    Ok(Config::default())
}

/// Load settings and config. `.env` should already be loaded.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    let data_override = options.data.as_deref().map(resolve_data_path);
    let discovery_dir = data_override
        .as_ref()
        .map(|(dir, _)| dir.clone())
        .unwrap_or_else(|| Settings::default().data_dir);

    let mut config = load_file_config(&options, &discovery_dir).await?;
    config.apply_env_overrides();

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    // --data beats the config file
    if let Some((dir, filename)) = data_override {
        settings.documents_dir = dir.join(DOCUMENTS_SUBDIR);
        settings.data_dir = dir;
        if let Some(filename) = filename {
            settings.database_filename = filename;
        }
    }

    if let Some(url) = env_var(DATABASE_URL_ENV) {
        if is_postgres_url(&url) && !cfg!(feature = "postgres") {
            return Err(ConfigError::PostgresUnsupported(redact_url_password(&url)));
        }
        tracing::debug!("Using DATABASE_URL from environment: {}", redact_url_password(&url));
        settings.database_url = Some(url);
    }

    Ok((settings, config))
}
