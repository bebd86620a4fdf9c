//! # Connection Capability
//!
//! The raw statement executor every row entity and table accessor talks to.
//! It prepares and executes parameterized statements and lists table names.
//! No caching of rows and no locking lives here.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Connection Capability                              │
//! │                                                                         │
//! │  TableAccessor<R> ──┐                                                   │
//! │  (cache, locks)     │   prepare / execute / fetch / list_tables        │
//! │                     ├──────────────────────────────►  Connection       │
//! │  RowEntity<R> ──────┘                                 │                 │
//! │  (one row)                                            ▼                 │
//! │                                        ┌──────────────────────────┐    │
//! │  RowEntity only ever holds a           │        SqlitePool        │    │
//! │  Connection, never its accessor:       │  ┌─────┐ ┌─────┐ ┌─────┐ │    │
//! │  a row operation cannot re-enter       │  │Conn1│ │Conn2│ │Conn3│ │    │
//! │  the cache or lock registry.           │  └─────┘ └─────┘ └─────┘ │    │
//! │                                        └──────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! File databases use WAL journaling so readers don't block writers.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::config::DbConfig;
use crate::error::{DbError, DbResult, StorageFailure};
use crate::statement::Statement;

/// Shared handle to the SQLite pool.
///
/// Cloning is cheap; clones share the pool and the table-name cache.
#[derive(Debug, Clone)]
pub struct Connection {
    pool: SqlitePool,

    /// Cached result of `list_tables`; cleared by every DDL statement.
    tables: Arc<Mutex<Option<BTreeSet<String>>>>,
}

impl Connection {
    /// Opens the connection pool described by `config`.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. WAL journaling + NORMAL synchronous for file databases
    /// 3. Foreign keys as configured
    /// 4. Creates the pool
    pub async fn open(config: &DbConfig) -> DbResult<Self> {
        config.validate()?;

        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let mut options = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(&config.database_path)
                .create_if_missing(true)
                .synchronous(SqliteSynchronous::Normal);
            if config.wal {
                options.journal_mode(SqliteJournalMode::Wal)
            } else {
                options
            }
        };
        options = options.foreign_keys(config.foreign_keys);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout_duration())
            .idle_timeout(config.idle_timeout_duration());
        if config.is_in_memory() {
            // Dropping the last connection would drop the database with it.
            pool_options = pool_options.max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        Ok(Connection::from_pool(pool))
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Connection {
            pool,
            tables: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts a statement. Parameters are attached with [`Statement::bind`].
    pub fn prepare(&self, sql: impl Into<String>) -> Statement {
        Statement::new(sql)
    }

    /// Executes an update/insert/delete and returns the rows affected.
    pub async fn execute(&self, stmt: &Statement) -> Result<u64, StorageFailure> {
        let result = stmt.query().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Executes a query and returns every row.
    pub async fn fetch_all(&self, stmt: &Statement) -> Result<Vec<SqliteRow>, StorageFailure> {
        Ok(stmt.query().fetch_all(&self.pool).await?)
    }

    /// Executes a query expected to return at most one row.
    pub async fn fetch_optional(
        &self,
        stmt: &Statement,
    ) -> Result<Option<SqliteRow>, StorageFailure> {
        Ok(stmt.query().fetch_optional(&self.pool).await?)
    }

    /// Executes a `SELECT COUNT(*)`-shaped query.
    pub async fn fetch_count(&self, stmt: &Statement) -> Result<i64, StorageFailure> {
        let row = stmt.query().fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    /// Inserts a main row and its identity reservation in one transaction.
    ///
    /// `aux` receives the rowid generated by the main insert so generated
    /// keys can be mirrored. Returns that rowid. Either both rows are written
    /// or neither is.
    pub async fn insert_reserving<F>(&self, main: &Statement, aux: F) -> Result<i64, StorageFailure>
    where
        F: FnOnce(i64) -> Statement,
    {
        let mut tx = self.pool.begin().await?;

        let rowid = main.query().execute(&mut *tx).await?.last_insert_rowid();
        let reservation = aux(rowid);
        reservation.query().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(rowid)
    }

    /// Executes a DDL statement and invalidates the table-name cache.
    pub async fn execute_ddl(&self, stmt: &Statement) -> Result<(), StorageFailure> {
        let result = stmt.query().execute(&self.pool).await;
        self.invalidate_tables();
        result?;
        Ok(())
    }

    /// Names of all user tables.
    ///
    /// Served from cache unless `force_refresh` is set or a DDL statement
    /// ran since the last listing.
    pub async fn list_tables(&self, force_refresh: bool) -> Result<BTreeSet<String>, StorageFailure> {
        if !force_refresh {
            let cached = self.cached_tables().clone();
            if let Some(tables) = cached {
                return Ok(tables);
            }
        }

        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&self.pool)
        .await?;

        let tables = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<BTreeSet<_>, _>>()?;

        debug!(count = tables.len(), "Listed tables");
        *self.cached_tables() = Some(tables.clone());
        Ok(tables)
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Closes the pool. Every later statement fails.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn cached_tables(&self) -> std::sync::MutexGuard<'_, Option<BTreeSet<String>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate_tables(&self) {
        *self.cached_tables() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory() -> Connection {
        Connection::open(&DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let conn = memory().await;
        assert!(conn.health_check().await);
    }

    #[tokio::test]
    async fn test_list_tables_cache_is_invalidated_by_ddl() {
        let conn = memory().await;
        assert!(conn.list_tables(false).await.unwrap().is_empty());

        conn.execute_ddl(&conn.prepare("CREATE TABLE notes (id INTEGER PRIMARY KEY)"))
            .await
            .unwrap();

        let tables = conn.list_tables(false).await.unwrap();
        assert!(tables.contains("notes"));
    }

    #[tokio::test]
    async fn test_insert_reserving_is_atomic() {
        let conn = memory().await;
        conn.execute_ddl(&conn.prepare("CREATE TABLE main_t (id INTEGER PRIMARY KEY, v TEXT)"))
            .await
            .unwrap();

        // Reservation targets a missing table: the main insert must roll back.
        let main = conn.prepare("INSERT INTO main_t (v) VALUES (?)").bind("x");
        let result = conn
            .insert_reserving(&main, |rowid| {
                conn.prepare("INSERT INTO missing_aux (id) VALUES (?)").bind(rowid)
            })
            .await;
        assert!(result.is_err());

        let count = conn
            .fetch_count(&conn.prepare("SELECT COUNT(*) FROM main_t"))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_reports_connection_failure() {
        let conn = memory().await;
        conn.close().await;

        let err = conn
            .execute(&conn.prepare("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageFailure::ConnectionFailed(_)));
    }
}
