//! # Table Layer
//!
//! Generic caching and locking for every managed table.
//!
//! ## Pieces
//! - [`TableDef`] / [`Record`]: what a table looks like and how a record maps
//!   onto its columns
//! - [`RowEntity`]: one cached row, with its own storage round-trips
//! - [`TableAccessor`]: the identity map, lock registry and bulk loads
//! - [`RowGuard`]: proof of holding a row lock, required by every write
//! - [`FilterStatement`]: completes bulk queries
//!
//! ## Usage
//! ```rust,ignore
//! let customers = TableAccessor::<Customer>::new(conn.clone());
//! customers.assure_table_schema().await?;
//!
//! let (customer, guard) = customers.load_populated_locked(7).await?;
//! customer.modify(&guard, |c| c.name = "Ada Lovelace".to_string())?;
//! customer.store(&guard).await?;
//! customer.unlock(guard);
//! ```

mod accessor;
mod def;
mod entity;
mod filter;
mod lock;

#[cfg(test)]
pub(crate) mod testing;

pub use accessor::{BulkLoad, SyncMode, TableAccessor};
pub use def::{decode_error, KeyKind, PrimaryKey, Record, TableDef};
pub use entity::RowEntity;
pub use filter::{AllRows, ColumnEquals, FilterStatement, Predicate};
pub use lock::RowGuard;
