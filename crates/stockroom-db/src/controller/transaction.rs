//! Sales written against blanks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use stockroom_core::validation::{validate_amount_minor, validate_currency_code};
use stockroom_core::{Blank, BlankStatus, PaymentKind, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use super::{resync, CustomerController, RateController};
use crate::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::repair::{RepairOp, Repairable};
use crate::table::{ColumnEquals, RowEntity, RowGuard, SyncMode, TableAccessor};

/// Input of [`TransactionController::record_sale`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    /// Stock number of the blank the sale is written on.
    pub blank_id: i64,
    /// Paying customer, if on account.
    pub customer_id: Option<i64>,
    /// Amount in the sale currency's minor units.
    pub amount_minor: i64,
    /// ISO 4217 code of the sale currency.
    pub currency: String,
    pub payment: PaymentKind,
}

/// Owns the `transactions` table.
#[derive(Debug)]
pub struct TransactionController {
    transactions: TableAccessor<Transaction>,
    customers: Arc<CustomerController>,
    rates: Arc<RateController>,
}

impl TransactionController {
    pub fn new(
        conn: Connection,
        customers: Arc<CustomerController>,
        rates: Arc<RateController>,
    ) -> Self {
        TransactionController {
            transactions: TableAccessor::new(conn),
            customers,
            rates,
        }
    }

    pub fn transactions(&self) -> &TableAccessor<Transaction> {
        &self.transactions
    }

    /// Records a sale and marks its blank as used.
    ///
    /// ## What This Does
    /// 1. Converts the amount into the base currency at the current rate,
    ///    minus the customer's discount plan
    /// 2. Locks the blank, moves it to `Used` and stores it
    /// 3. Inserts the transaction; if that fails the blank is stored back in
    ///    its previous state
    ///
    /// The blank lock is released before returning. If anything fails the
    /// blank is re-read so its cached status matches storage, and no
    /// transaction row is left behind.
    ///
    /// ## Returns
    /// The generated transaction id.
    pub async fn record_sale(&self, request: SaleRequest) -> DbResult<i64> {
        validate_amount_minor(request.amount_minor)?;
        let currency = validate_currency_code(&request.currency)?;

        let mut base_amount = self.rates.convert(&currency, request.amount_minor).await?;
        if let Some(customer_id) = request.customer_id {
            let customer = self.customers.customer(customer_id).await?;
            if let Some(discount_id) = customer.discount_id {
                base_amount = self.rates.discount(discount_id).await?.apply(base_amount);
            }
        }

        let record = Transaction {
            blank_id: request.blank_id,
            customer_id: request.customer_id,
            amount_minor: request.amount_minor,
            currency,
            base_amount_minor: base_amount,
            payment: request.payment,
            reference: Uuid::new_v4().to_string(),
            recorded_at: Utc::now(),
        };

        let (blank, guard) = self
            .customers
            .blanks()
            .load_populated_locked(request.blank_id)
            .await?;

        let outcome = self.write_sale(&blank, &guard, record).await;
        if outcome.is_err() {
            resync(&blank).await;
        }
        blank.unlock(guard);

        let id = outcome?;
        info!(id, blank_id = request.blank_id, base_amount, "Sale recorded");
        Ok(id)
    }

    async fn write_sale(&self, blank: &RowEntity<Blank>, guard: &RowGuard, record: Transaction) -> DbResult<i64> {
        let before = blank.record();
        blank.modify(guard, |b| b.transition(BlankStatus::Used))??;
        blank.store(guard).await?;

        let (sale, sale_guard) = self.transactions.create(record);
        if let Err(err) = sale.store(&sale_guard).await {
            restore_blank(blank, guard, before).await;
            return Err(err);
        }
        sale.unlock(sale_guard);
        let sale = self.transactions.cache_one(sale)?;

        sale.primary_id().ok_or_else(|| DbError::MissingIdentity {
            table: self.transactions.table_name().to_string(),
        })
    }

    /// Every sale written on a blank.
    pub async fn sales_for_blank(&self, blank_id: i64) -> DbResult<Vec<Transaction>> {
        let filter = ColumnEquals::new("blank_id", blank_id);
        let bulk = self.transactions.load_many(&filter, SyncMode::Load).await?;
        Ok(bulk.iter().map(|row| row.record()).collect())
    }

    /// Every sale of a customer, oldest first.
    pub async fn sales_for_customer(&self, customer_id: i64) -> DbResult<Vec<Transaction>> {
        let filter = ColumnEquals::new("customer_id", customer_id);
        let bulk = self.transactions.load_many(&filter, SyncMode::Load).await?;
        Ok(bulk.iter().map(|row| row.record()).collect())
    }
}

/// Stores `before` back into a blank whose sale could not be inserted.
async fn restore_blank(blank: &RowEntity<Blank>, guard: &RowGuard, before: Blank) {
    let restored: DbResult<()> = async {
        blank.modify(guard, |b| *b = before)?;
        blank.store(guard).await
    }
    .await;

    if let Err(err) = restored {
        warn!(
            blank_id = ?blank.primary_id(),
            error = %err,
            "Blank not restored after failed sale insert"
        );
    }
}

#[async_trait]
impl Repairable for TransactionController {
    fn list_tables(&self) -> Vec<&'static str> {
        vec![self.transactions.table_name()]
    }

    async fn repair(&self, table: &str, op: RepairOp) -> DbResult<bool> {
        if table != self.transactions.table_name() {
            return Ok(false);
        }
        self.transactions.repair(op).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use stockroom_core::CoreError;

    struct Fixture {
        conn: Connection,
        rates: Arc<RateController>,
        customers: Arc<CustomerController>,
        sales: TransactionController,
    }

    async fn fixture() -> Fixture {
        let conn = Connection::open(&DbConfig::in_memory()).await.unwrap();
        let rates = Arc::new(RateController::new(conn.clone()));
        let customers = Arc::new(CustomerController::new(conn.clone()));
        let sales = TransactionController::new(conn.clone(), customers.clone(), rates.clone());

        let members: [&dyn Repairable; 3] = [rates.as_ref(), customers.as_ref(), &sales];
        for member in members {
            for table in member.list_tables() {
                member.assure_existence(table).await.unwrap();
            }
        }

        rates.set_rate("USD", 800_000).await.unwrap();
        customers.register_blank(44_400_001, 444).await.unwrap();
        Fixture {
            conn,
            rates,
            customers,
            sales,
        }
    }

    fn sale(customer_id: Option<i64>) -> SaleRequest {
        SaleRequest {
            blank_id: 44_400_001,
            customer_id,
            amount_minor: 10_000,
            currency: "usd".to_string(),
            payment: PaymentKind::Card,
        }
    }

    #[tokio::test]
    async fn test_record_sale_uses_blank_and_discount() {
        let f = fixture().await;
        let plan = f.rates.create_discount("Valued", 1_000).await.unwrap();
        let customer = f
            .customers
            .register_customer("Linus", None, Some(plan))
            .await
            .unwrap();

        let id = f.sales.record_sale(sale(Some(customer))).await.unwrap();
        assert!(id > 0);

        let stored = f.sales.sales_for_blank(44_400_001).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].base_amount_minor, 7_200);
        assert_eq!(stored[0].currency, "USD");

        assert_eq!(
            f.customers.blank(44_400_001).await.unwrap().status,
            BlankStatus::Used
        );
        assert_eq!(f.sales.sales_for_customer(customer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_used_blank_cannot_be_sold_twice() {
        let f = fixture().await;
        f.sales.record_sale(sale(None)).await.unwrap();

        let err = f.sales.record_sale(sale(None)).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InvalidBlankTransition { .. })
        ));
        assert_eq!(f.sales.sales_for_blank(44_400_001).await.unwrap().len(), 1);

        let blank = f.customers.blanks().load(44_400_001).await;
        assert!(!blank.is_locked());
    }

    #[tokio::test]
    async fn test_failed_sale_leaves_blank_available() {
        let f = fixture().await;
        f.sales.transactions().purge_table_schema().await.unwrap();

        let err = f.sales.record_sale(sale(None)).await.unwrap_err();
        assert!(matches!(err, DbError::Storage { .. }));

        let blank = f.customers.blanks().load(44_400_001).await;
        assert!(!blank.is_locked());
        assert_eq!(blank.record().status, BlankStatus::Available);

        f.customers.blanks().refresh_all();
        assert_eq!(
            f.customers.blank(44_400_001).await.unwrap().status,
            BlankStatus::Available
        );
    }

    #[tokio::test]
    async fn test_failed_blank_update_stores_no_sale() {
        let f = fixture().await;
        f.conn
            .execute_ddl(&f.conn.prepare(
                "CREATE TRIGGER blanks_frozen BEFORE UPDATE ON blanks \
                 BEGIN SELECT RAISE(ABORT, 'blanks are frozen'); END",
            ))
            .await
            .unwrap();

        let err = f.sales.record_sale(sale(None)).await.unwrap_err();
        assert!(matches!(err, DbError::Storage { .. }));

        let conn = &f.conn;
        let stored = conn
            .fetch_count(&conn.prepare("SELECT COUNT(*) FROM transactions"))
            .await
            .unwrap();
        assert_eq!(stored, 0);
        assert!(f.sales.sales_for_blank(44_400_001).await.unwrap().is_empty());

        let blank = f.customers.blanks().load(44_400_001).await;
        assert!(!blank.is_locked());
        assert_eq!(blank.record().status, BlankStatus::Available);
    }
}
