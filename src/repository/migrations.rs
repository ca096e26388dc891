//! Database migrations using cetane.
//!
//! The cetane `Migrator` decides which migrations are pending and emits their
//! SQL for the pool's backend. The statements and the `__cetane_migrations`
//! bookkeeping are then applied in one transaction on an async connection.

use std::cell::RefCell;

use chrono::Utc;
use diesel_async::{AsyncConnection, RunQueryDsl, SimpleAsyncConnection};
use tracing::{debug, info};

use super::format_timestamp;
use super::pool::{DbPool, DieselError};
use crate::with_conn;

#[derive(diesel::QueryableByName)]
struct AppliedMigration {
    #[diesel(sql_type = diesel::sql_types::Text)]
    name: String,
}

fn migration_error(msg: impl std::fmt::Display) -> DieselError {
    DieselError::QueryBuilderError(msg.to_string().into())
}

/// State store over names already read from `__cetane_migrations`.
///
/// Marks are kept in memory; `run_migrations` persists them together with the
/// migration SQL.
struct LoadedState {
    applied: Vec<String>,
}

impl cetane::migrator::MigrationStateStore for LoadedState {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        Ok(self.applied.clone())
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        if !self.applied.iter().any(|n| n == name) {
            self.applied.push(name.to_string());
        }
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        self.applied.retain(|n| n != name);
        Ok(())
    }
}

/// Pending migration names and their forward SQL, in execution order.
struct MigrationPlan {
    names: Vec<String>,
    statements: Vec<String>,
}

fn plan_migrations(backend_name: &str, applied: Vec<String>) -> Result<MigrationPlan, DieselError> {
    use cetane::backend::{Postgres, Sqlite};
    use cetane::migrator::Migrator;

    let registry = crate::migrations::registry();
    let state = LoadedState { applied };
    let statements: RefCell<Vec<String>> = RefCell::new(Vec::new());
    let record = |sql: String| {
        if !sql.trim().is_empty() {
            statements.borrow_mut().push(sql);
        }
        Ok::<(), String>(())
    };

    let names: Vec<String> = if backend_name == "postgres" {
        let backend = Postgres;
        let mut migrator = Migrator::new(&registry, &backend, state);
        let applied: Vec<String> = migrator
            .migrate_forward(|sql| record(sql.to_string()))
            .map_err(migration_error)?
            .iter()
            .map(|name| name.to_string())
            .collect();
        applied
    } else {
        let backend = Sqlite;
        let mut migrator = Migrator::new(&registry, &backend, state);
        let applied: Vec<String> = migrator
            .migrate_forward(|sql| record(sql.to_string()))
            .map_err(migration_error)?
            .iter()
            .map(|name| name.to_string())
            .collect();
        applied
    };

    Ok(MigrationPlan {
        names,
        statements: statements.into_inner(),
    })
}

const CREATE_STATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS __cetane_migrations (
    name TEXT PRIMARY KEY NOT NULL,
    applied_at TEXT NOT NULL
)";

/// Apply pending migrations. Returns the names applied by this call.
pub async fn run_migrations(pool: &DbPool) -> Result<Vec<String>, DieselError> {
    let backend = pool.backend_name();

    with_conn!(pool, conn, {
        conn.batch_execute(CREATE_STATE_TABLE).await?;

        let applied: Vec<String> =
            diesel::sql_query("SELECT name FROM __cetane_migrations ORDER BY name")
                .load::<AppliedMigration>(&mut conn)
                .await?
                .into_iter()
                .map(|row| row.name)
                .collect();

        let plan = plan_migrations(backend, applied)?;
        if plan.names.is_empty() {
            debug!("No pending migrations");
            return Ok(Vec::new());
        }

        let applied_at = format_timestamp(Utc::now());
        let MigrationPlan { names, statements } = plan;
        let names = conn
            .transaction(|conn| {
                Box::pin(async move {
                    for sql in &statements {
                        conn.batch_execute(sql).await?;
                    }
                    for name in &names {
                        // Names come from the compiled registry.
                        conn.batch_execute(&format!(
                            "INSERT INTO __cetane_migrations (name, applied_at) VALUES ('{}', '{}') ON CONFLICT DO NOTHING",
                            name.replace('\'', "''"),
                            applied_at
                        ))
                        .await?;
                    }
                    Ok::<_, DieselError>(names)
                })
            })
            .await?;

        for name in &names {
            info!("Applied migration: {}", name);
        }
        Ok(names)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let dir = tempdir().unwrap();
        let pool = DbPool::sqlite_from_path(&dir.path().join("ledger.db"));

        let first = run_migrations(&pool).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.contains(&"0001_scraper_state".to_string()));
        assert!(first.contains(&"0002_processed_urls".to_string()));

        let second = run_migrations(&pool).await.unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_registry_resolves_in_dependency_order() {
        let registry = crate::migrations::registry();
        let order = registry.resolve_order().unwrap();
        let names: Vec<String> = order.iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["0001_scraper_state", "0002_processed_urls"]);
    }

    #[test]
    fn test_postgres_sql_has_no_autoincrement() {
        let plan = plan_migrations("postgres", Vec::new()).unwrap();
        assert_eq!(plan.names.len(), 2);
        assert!(!plan.statements.is_empty());
        assert!(plan.statements.iter().all(|sql| !sql.contains("AUTOINCREMENT")));
    }

    #[test]
    fn test_plan_skips_applied_migrations() {
        let plan = plan_migrations("sqlite", vec!["0001_scraper_state".to_string()]).unwrap();
        assert_eq!(plan.names, vec!["0002_processed_urls".to_string()]);
        assert!(plan
            .statements
            .iter()
            .all(|sql| !sql.contains("CREATE TABLE IF NOT EXISTS scraper_state")));
    }
}
