//! # stockroom-db: Table Caching & Locking Layer for Stockroom
//!
//! Every domain record is stored through one generic table accessor that
//! keeps live rows in an identity map, hands out per-row locks and mirrors
//! each identity into a shadow (auxiliary) table.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Stockroom Data Flow                               │
//! │                                                                         │
//! │  GUI / stockroom-repair CLI                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockroom-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────────┐   ┌──────────────────┐   ┌───────────────┐   │   │
//! │  │   │ Controllers  │──►│ TableAccessor<R> │──►│ RowEntity<R>  │   │   │
//! │  │   │ rate, cust., │   │ cache + locks    │   │ one row       │   │   │
//! │  │   │ transaction  │   │ bulk loads       │   │               │   │   │
//! │  │   └──────┬───────┘   └────────┬─────────┘   └───────┬───────┘   │   │
//! │  │          │ Repairable         │                     │           │   │
//! │  │   ┌──────▼───────┐            └────────┬────────────┘           │   │
//! │  │   │RepairRegistry│                     ▼                        │   │
//! │  │   └──────────────┘              Connection (sqlx pool)          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite: customers, customers_aux, rates, rates_aux, ...               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Pool configuration (TOML + environment)
//! - [`connection`] - Statement execution over the sqlx pool
//! - [`statement`] - Owned parameterized statements
//! - [`table`] - Row entities, table accessors, filters, sync modes
//! - [`records`] - Table definitions for the stockroom-core records
//! - [`controller`] - Domain controllers composing accessors
//! - [`repair`] - Administrative repair operations by table name
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockroom_db::{Database, DbConfig};
//!
//! let db = Database::open(&DbConfig::load(None)?).await?;
//!
//! let id = db.customers().register_customer("Ada", None, None).await?;
//! db.customers().rename_customer(id, "Ada Lovelace").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod connection;
pub mod controller;
pub mod database;
pub mod error;
pub mod records;
pub mod repair;
pub mod statement;
pub mod table;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::DbConfig;
pub use connection::Connection;
pub use database::Database;
pub use error::{DbError, DbResult, StorageFailure};
pub use repair::{RepairOp, RepairRegistry, Repairable};
pub use statement::{SqlValue, Statement};
pub use table::{
    AllRows, BulkLoad, ColumnEquals, FilterStatement, KeyKind, Predicate, PrimaryKey, Record,
    RowEntity, RowGuard, SyncMode, TableAccessor, TableDef,
};
