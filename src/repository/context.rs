//! Database context for managing connections and repository access.
//!
//! The DbContext is the primary entry point for all database operations.
//! It holds the connection pool and hands out repositories that share it.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::ledger::LedgerRepository;
use super::pool::{DbPool, DieselError};
use super::util::redact_url_password;
use crate::with_conn;

/// Database context that manages the connection pool and provides repository access.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:/var/lib/scrapeledger/ledger.db")?;
/// let ledger = ctx.ledger();
/// ledger.ensure_schema().await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
    ledger: LedgerRepository,
    display_url: String,
}

impl DbContext {
    /// Create a context from a database file path (SQLite only).
    pub fn new(db_path: &Path) -> Self {
        Self::with_pool(DbPool::sqlite_from_path(db_path), db_path.display().to_string())
    }

    /// Create a context from a database URL.
    ///
    /// Supports:
    /// - SQLite: file paths or `sqlite:` URLs
    /// - PostgreSQL: `postgres://` or `postgresql://` URLs
    pub fn from_url(url: &str) -> Result<Self, DieselError> {
        Ok(Self::with_pool(DbPool::from_url(url)?, redact_url_password(url)))
    }

    fn with_pool(pool: DbPool, display_url: String) -> Self {
        Self {
            ledger: LedgerRepository::new(pool.clone()),
            pool,
            display_url,
        }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Database location with any password redacted.
    pub fn display_url(&self) -> &str {
        &self.display_url
    }

    /// Check if using SQLite backend.
    pub fn is_sqlite(&self) -> bool {
        self.pool.is_sqlite()
    }

    /// Get the ledger repository. All clones share one schema flag.
    pub fn ledger(&self) -> LedgerRepository {
        self.ledger.clone()
    }

    /// Test database connectivity.
    pub async fn test_connection(&self) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            conn.batch_execute("SELECT 1").await?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for DbContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbContext")
            .field("backend", &self.pool.backend_name())
            .field("url", &self.display_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_shares_schema_state() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("ledger.db"));

        ctx.test_connection().await.unwrap();
        assert!(ctx.is_sqlite());

        ctx.ledger().ensure_schema().await.unwrap();
        assert!(ctx.ledger().is_schema_ready());
    }
}
