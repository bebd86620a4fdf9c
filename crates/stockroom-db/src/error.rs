//! # Database Error Types
//!
//! Error types for the table layer.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StorageFailure ← Categorized driver failure (unique, FK, decode, ...) │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError::Storage { operation, table, id } ← Adds context              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Caller decides retry policy (this layer never retries)                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockroom_core::{CoreError, ValidationError};
use thiserror::Error;

use crate::config::ConfigError;

/// Table layer errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// No row exists for the requested key.
    ///
    /// ## When This Occurs
    /// - `RowEntity::load` on a key that was never stored
    /// - The row was deleted by another caller
    ///
    /// Recoverable: the caller may decide to insert instead.
    #[error("{table} row not found: {id}")]
    NotFound { table: String, id: String },

    /// `store`, `delete` or `modify` without holding the row lock.
    ///
    /// Always a programming error; never retried.
    #[error("{table} row {id} is not locked")]
    NotLocked { table: String, id: String },

    /// Any connectivity or statement failure, with context.
    #[error("{operation} on {table} (id {}) failed: {source}", .id.as_deref().unwrap_or("-"))]
    Storage {
        operation: &'static str,
        table: String,
        id: Option<String>,
        #[source]
        source: StorageFailure,
    },

    /// An auxiliary row could not be removed alongside its main row.
    ///
    /// Soft: reported through the log only, the auxiliary table is advisory
    /// and `TableAccessor::create_all_aux_rows` re-synchronizes it.
    #[error("auxiliary row {id} of {table} left inconsistent: {reason}")]
    AuxiliaryInconsistency {
        table: String,
        id: String,
        reason: String,
    },

    /// The row has no primary key yet (never stored, or a supplied-key table
    /// got a record without its key).
    #[error("{table} row has no primary key yet")]
    MissingIdentity { table: String },

    /// `cache_one` was handed an entity that was never stored.
    #[error("{table} row was never stored and cannot be cached")]
    Unsaved { table: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A domain rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] CoreError),
}

impl DbError {
    /// Creates a NotFound error for a given table and key.
    pub fn not_found(table: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            table: table.into(),
            id: id.to_string(),
        }
    }

    /// Wraps a storage failure with the operation context.
    pub fn storage(
        operation: &'static str,
        table: impl Into<String>,
        id: Option<String>,
        source: impl Into<StorageFailure>,
    ) -> Self {
        DbError::Storage {
            operation,
            table: table.into(),
            id,
            source: source.into(),
        }
    }

    /// Whether this is a `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// Categorized driver failure.
#[derive(Debug, Error)]
pub enum StorageFailure {
    /// Unique constraint violation (e.g. a supplied key inserted twice).
    #[error("duplicate {field}")]
    UniqueViolation { field: String },

    /// Foreign key constraint violation.
    #[error("foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Runtime SQL error.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A column could not be decoded into its record field.
    #[error("column decode failed: {0}")]
    Decode(String),

    /// Pool exhausted (all connections in use).
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Pool closed or connection lost.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Internal database error.
    #[error("internal database error: {0}")]
    Internal(String),
}

/// Convert sqlx errors to StorageFailure.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::ColumnDecode   → Decode
/// sqlx::Error::PoolTimedOut   → PoolExhausted
/// Other                       → Internal
/// ```
impl From<sqlx::Error> for StorageFailure {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLite constraint messages:
                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                if let Some(field) = msg.strip_prefix("UNIQUE constraint failed: ") {
                    StorageFailure::UniqueViolation {
                        field: field.to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    StorageFailure::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    StorageFailure::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StorageFailure::Decode(err.to_string()),

            sqlx::Error::PoolTimedOut => StorageFailure::PoolExhausted,

            sqlx::Error::PoolClosed => {
                StorageFailure::ConnectionFailed("Pool is closed".to_string())
            }

            sqlx::Error::Io(_) => StorageFailure::ConnectionFailed(err.to_string()),

            _ => StorageFailure::Internal(err.to_string()),
        }
    }
}

/// Result type for table layer operations.
pub type DbResult<T> = Result<T, DbError>;
