//! Customer accounts and blank stock.

use std::sync::Arc;

use async_trait::async_trait;
use stockroom_core::validation::validate_name;
use stockroom_core::{Blank, BlankStatus, CoreError, Customer, CustomerKind};
use tracing::info;

use super::resync;
use crate::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::repair::{RepairOp, Repairable};
use crate::table::{AllRows, ColumnEquals, RowEntity, SyncMode, TableAccessor};

/// Owns the `customers` and `blanks` tables.
#[derive(Debug)]
pub struct CustomerController {
    customers: TableAccessor<Customer>,
    blanks: TableAccessor<Blank>,
}

impl CustomerController {
    pub fn new(conn: Connection) -> Self {
        CustomerController {
            customers: TableAccessor::new(conn.clone()),
            blanks: TableAccessor::new(conn),
        }
    }

    pub fn customers(&self) -> &TableAccessor<Customer> {
        &self.customers
    }

    pub fn blanks(&self) -> &TableAccessor<Blank> {
        &self.blanks
    }

    // =========================================================================
    // Customers
    // =========================================================================

    /// Opens a customer account and returns its generated id.
    ///
    /// A customer registered with a discount plan is a valued customer.
    pub async fn register_customer(
        &self,
        name: &str,
        email: Option<&str>,
        discount_id: Option<i64>,
    ) -> DbResult<i64> {
        let mut record = Customer::new(validate_name("name", name)?);
        record.email = email.map(str::to_string);
        record.discount_id = discount_id;
        if discount_id.is_some() {
            record.kind = CustomerKind::Valued;
        }

        let (entity, guard) = self.customers.create(record);
        entity.store(&guard).await?;
        entity.unlock(guard);

        let id = self.customers.cache_one(entity)?.primary_id().ok_or_else(|| {
            DbError::MissingIdentity {
                table: self.customers.table_name().to_string(),
            }
        })?;
        info!(id, "Customer registered");
        Ok(id)
    }

    pub async fn customer(&self, id: i64) -> DbResult<Customer> {
        Ok(self.customers.load_populated(id).await?.record())
    }

    /// Renames a customer under the row lock.
    pub async fn rename_customer(&self, id: i64, name: &str) -> DbResult<()> {
        let name = validate_name("name", name)?;
        let (entity, guard) = self.customers.load_populated_locked(id).await?;

        let outcome: DbResult<()> = async {
            entity.modify(&guard, |c| c.name = name)?;
            entity.store(&guard).await
        }
        .await;

        if outcome.is_err() {
            resync(&entity).await;
        }
        entity.unlock(guard);
        outcome
    }

    /// Every customer, ordered by id.
    pub async fn all_customers(&self) -> DbResult<Vec<(i64, Customer)>> {
        let bulk = self.customers.load_many(&AllRows, SyncMode::Load).await?;
        Ok(snapshot(&bulk.rows))
    }

    /// Removes a customer account.
    pub async fn remove_customer(&self, id: i64) -> DbResult<()> {
        let (entity, guard) = self.customers.load_locked(id).await;
        let outcome = self.customers.delete(&entity, &guard).await;
        entity.unlock(guard);
        outcome
    }

    // =========================================================================
    // Blanks
    // =========================================================================

    /// Registers a new blank under its printed stock number.
    ///
    /// ## Errors
    /// `CoreError::AlreadyExists` if the stock number is already registered.
    pub async fn register_blank(&self, stock_number: i64, blank_type: i64) -> DbResult<()> {
        let (entity, guard) = self
            .blanks
            .create_keyed(stock_number, Blank::new(blank_type))
            .await?;

        let outcome = entity.store(&guard).await;
        if outcome.is_err() {
            resync(&entity).await;
        }
        entity.unlock(guard);
        outcome?;

        info!(stock_number, blank_type, "Blank registered");
        Ok(())
    }

    /// Moves a blank to `status` under the row lock.
    pub async fn set_blank_status(
        &self,
        stock_number: i64,
        status: BlankStatus,
        assigned_to: Option<&str>,
    ) -> DbResult<()> {
        let (entity, guard) = self.blanks.load_populated_locked(stock_number).await?;

        let outcome: DbResult<()> = async {
            entity.modify(&guard, |b| {
                b.transition(status)?;
                b.assigned_to = assigned_to.map(str::to_string);
                Ok::<_, CoreError>(())
            })??;
            entity.store(&guard).await
        }
        .await;

        if outcome.is_err() {
            resync(&entity).await;
        }
        entity.unlock(guard);
        outcome
    }

    pub async fn blank(&self, stock_number: i64) -> DbResult<Blank> {
        Ok(self.blanks.load_populated(stock_number).await?.record())
    }

    /// Every blank, ordered by stock number.
    pub async fn all_blanks(&self) -> DbResult<Vec<(i64, Blank)>> {
        let bulk = self.blanks.load_many(&AllRows, SyncMode::Load).await?;
        Ok(snapshot(&bulk.rows))
    }

    /// Stock numbers of blanks still available, without loading their columns.
    pub async fn available_blanks(&self) -> DbResult<Vec<i64>> {
        let filter = ColumnEquals::new("status", BlankStatus::Available.as_str());
        Ok(self.blanks.load_many(&filter, SyncMode::NoLoad).await?.ids())
    }
}

fn snapshot<R>(rows: &[Arc<RowEntity<R>>]) -> Vec<(i64, R)>
where
    R: crate::table::Record<Id = i64>,
{
    rows.iter()
        .filter_map(|row| row.primary_id().map(|id| (id, row.record())))
        .collect()
}

#[async_trait]
impl Repairable for CustomerController {
    fn list_tables(&self) -> Vec<&'static str> {
        vec![self.customers.table_name(), self.blanks.table_name()]
    }

    async fn repair(&self, table: &str, op: RepairOp) -> DbResult<bool> {
        if table == self.customers.table_name() {
            self.customers.repair(op).await?;
        } else if table == self.blanks.table_name() {
            self.blanks.repair(op).await?;
        } else {
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;

    async fn setup() -> (CustomerController, Connection) {
        let conn = Connection::open(&DbConfig::in_memory()).await.unwrap();
        let controller = CustomerController::new(conn.clone());
        for table in controller.list_tables() {
            controller.assure_existence(table).await.unwrap();
        }
        (controller, conn)
    }

    async fn controller() -> CustomerController {
        setup().await.0
    }

    #[tokio::test]
    async fn test_register_and_rename_customer() {
        let controller = controller().await;
        let id = controller
            .register_customer("Grace", Some("grace@example.com"), None)
            .await
            .unwrap();

        controller.rename_customer(id, "Grace Hopper").await.unwrap();

        controller.customers().refresh_all();
        let customer = controller.customer(id).await.unwrap();
        assert_eq!(customer.name, "Grace Hopper");
        assert_eq!(customer.kind, CustomerKind::Regular);
        assert!(!controller.customers().load(id).await.is_locked());
    }

    #[tokio::test]
    async fn test_rename_missing_customer_releases_nothing() {
        let controller = controller().await;
        let err = controller.rename_customer(404, "Nobody").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!controller.customers().load(404).await.is_locked());
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_stored_name() {
        let (controller, conn) = setup().await;
        let id = controller.register_customer("Ada", None, None).await.unwrap();
        conn.execute_ddl(&conn.prepare(
            "CREATE TRIGGER customers_frozen BEFORE UPDATE ON customers \
             BEGIN SELECT RAISE(ABORT, 'customers are frozen'); END",
        ))
        .await
        .unwrap();

        let err = controller.rename_customer(id, "Ada Byron").await.unwrap_err();
        assert!(matches!(err, DbError::Storage { .. }));

        let cached = controller.customers().load(id).await;
        assert!(!cached.is_locked());
        assert_eq!(cached.record().name, "Ada");
        assert_eq!(controller.customer(id).await.unwrap().name, "Ada");
    }

    #[tokio::test]
    async fn test_register_blank_twice_is_rejected() {
        let controller = controller().await;
        controller.register_blank(44_400_001, 444).await.unwrap();

        let err = controller.register_blank(44_400_001, 201).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::AlreadyExists { .. })
        ));
        assert_eq!(controller.blank(44_400_001).await.unwrap().blank_type, 444);
    }

    #[tokio::test]
    async fn test_available_blanks_follow_status() {
        let controller = controller().await;
        for stock_number in [44_400_003, 44_400_001, 44_400_002] {
            controller.register_blank(stock_number, 444).await.unwrap();
        }

        controller
            .set_blank_status(44_400_002, BlankStatus::Assigned, Some("ana"))
            .await
            .unwrap();

        assert_eq!(
            controller.available_blanks().await.unwrap(),
            vec![44_400_001, 44_400_003]
        );
    }

    #[tokio::test]
    async fn test_invalid_transition_keeps_stored_status() {
        let controller = controller().await;
        controller.register_blank(20_100_001, 201).await.unwrap();
        controller
            .set_blank_status(20_100_001, BlankStatus::Void, None)
            .await
            .unwrap();

        let err = controller
            .set_blank_status(20_100_001, BlankStatus::Available, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InvalidBlankTransition { .. })
        ));
        assert_eq!(
            controller.blank(20_100_001).await.unwrap().status,
            BlankStatus::Void
        );
    }
}
