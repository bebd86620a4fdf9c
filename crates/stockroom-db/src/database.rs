//! # Database Handle
//!
//! Opens the connection, builds the controllers and registers them with the
//! repair facility.
//!
//! ## Startup
//! ```text
//!   Database::open(config)
//!     1. Connection::open          pool, pragmas
//!     2. controllers               one TableAccessor per table
//!     3. RepairRegistry            every controller registered by table name
//!     4. assure_all()              CREATE TABLE IF NOT EXISTS main + aux
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::DbConfig;
use crate::connection::Connection;
use crate::controller::{CustomerController, RateController, TransactionController};
use crate::error::DbResult;
use crate::repair::RepairRegistry;

/// Main database handle.
///
/// Cloning is cheap; clones share the pool, the controllers and their caches.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Connection,
    rates: Arc<RateController>,
    customers: Arc<CustomerController>,
    transactions: Arc<TransactionController>,
    registry: RepairRegistry,
}

impl Database {
    /// Opens the database and makes sure every table exists.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let db = Database::open(&DbConfig::new("./stockroom.db")).await?;
    /// db.rates().set_rate("USD", 790_000).await?;
    /// ```
    pub async fn open(config: &DbConfig) -> DbResult<Self> {
        let conn = Connection::open(config).await?;
        let db = Database::with_connection(conn);

        let tables = db.registry.assure_all().await?;
        info!(tables, "Database ready");
        Ok(db)
    }

    /// Builds the controllers on an open connection without touching the
    /// schema.
    pub fn with_connection(conn: Connection) -> Self {
        let rates = Arc::new(RateController::new(conn.clone()));
        let customers = Arc::new(CustomerController::new(conn.clone()));
        let transactions = Arc::new(TransactionController::new(
            conn.clone(),
            Arc::clone(&customers),
            Arc::clone(&rates),
        ));

        let mut registry = RepairRegistry::new();
        registry.register(rates.clone());
        registry.register(customers.clone());
        registry.register(transactions.clone());

        Database {
            conn,
            rates,
            customers,
            transactions,
            registry,
        }
    }

    pub fn rates(&self) -> &RateController {
        &self.rates
    }

    pub fn customers(&self) -> &CustomerController {
        &self.customers
    }

    pub fn transactions(&self) -> &TransactionController {
        &self.transactions
    }

    /// The repair facility covering every table of this database.
    pub fn registry(&self) -> &RepairRegistry {
        &self.registry
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        self.conn.health_check().await
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.conn.close().await;
    }
}
