//! # Controllers
//!
//! Domain-facing components that compose table accessors. Each controller
//! owns the accessors of its tables and is registered with the repair
//! facility under their names.
//!
//! ```text
//!   RateController         ── rates, discounts
//!   CustomerController     ── customers, blanks
//!   TransactionController  ── transactions (reads through the other two)
//! ```
//!
//! Every helper here releases the row locks it takes before returning,
//! whether it succeeded or not.

mod customer;
mod rate;
mod transaction;

pub use customer::CustomerController;
pub use rate::RateController;
pub use transaction::{SaleRequest, TransactionController};

use tracing::warn;

use crate::table::{Record, RowEntity};

/// Re-reads a row after a failed write so the cached instance matches
/// storage again. A row that does not exist resets to an unloaded stub.
async fn resync<R: Record>(entity: &RowEntity<R>) {
    if let Err(err) = entity.load().await {
        if !err.is_not_found() {
            warn!(table = entity.table(), error = %err, "Row not re-read after failed write");
        }
    }
}
