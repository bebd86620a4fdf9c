//! Exchange rates and discount plans.

use std::sync::Arc;

use async_trait::async_trait;
use stockroom_core::validation::{
    validate_currency_code, validate_discount_bps, validate_name, validate_rate_micros,
};
use stockroom_core::{ConversionRate, Discount};
use tracing::info;

use super::resync;
use crate::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::repair::{RepairOp, Repairable};
use crate::table::{AllRows, RowEntity, SyncMode, TableAccessor};

/// Owns the `rates` and `discounts` tables.
#[derive(Debug)]
pub struct RateController {
    rates: TableAccessor<ConversionRate>,
    discounts: TableAccessor<Discount>,
}

impl RateController {
    pub fn new(conn: Connection) -> Self {
        RateController {
            rates: TableAccessor::new(conn.clone()),
            discounts: TableAccessor::new(conn),
        }
    }

    pub fn rates(&self) -> &TableAccessor<ConversionRate> {
        &self.rates
    }

    pub fn discounts(&self) -> &TableAccessor<Discount> {
        &self.discounts
    }

    /// Inserts or replaces the rate of a currency.
    ///
    /// ## Arguments
    /// * `code` - ISO 4217 code, any case
    /// * `rate_micros` - base minor units per foreign minor unit, times 10^6
    pub async fn set_rate(
        &self,
        code: &str,
        rate_micros: i64,
    ) -> DbResult<Arc<RowEntity<ConversionRate>>> {
        let code = validate_currency_code(code)?;
        validate_rate_micros(rate_micros)?;

        let (entity, guard) = self.rates.load_locked(code.clone()).await;
        let outcome: DbResult<()> = async {
            // Refreshes `exists` so store picks INSERT or UPDATE.
            entity.exists(true).await?;
            entity.modify(&guard, |rate| *rate = ConversionRate::new(rate_micros))?;
            entity.store(&guard).await
        }
        .await;

        if outcome.is_err() {
            resync(&entity).await;
        }
        entity.unlock(guard);
        outcome?;

        info!(code = %code, rate_micros, "Conversion rate set");
        Ok(entity)
    }

    /// Current rate of a currency; `NotFound` if none was ever set.
    pub async fn rate(&self, code: &str) -> DbResult<ConversionRate> {
        let code = validate_currency_code(code)?;
        let entity = self.rates.load_populated(code).await?;
        Ok(entity.record())
    }

    /// Every rate, ordered by currency code.
    pub async fn all_rates(&self) -> DbResult<Vec<(String, ConversionRate)>> {
        let rows = self.rates.load_many(&AllRows, SyncMode::Load).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.primary_id().map(|code| (code, row.record())))
            .collect())
    }

    /// Converts `amount_minor` of currency `code` into base minor units.
    pub async fn convert(&self, code: &str, amount_minor: i64) -> DbResult<i64> {
        Ok(self.rate(code).await?.convert(amount_minor))
    }

    /// Creates a discount plan and returns its generated id.
    pub async fn create_discount(&self, name: &str, percent_bps: i64) -> DbResult<i64> {
        let name = validate_name("name", name)?;
        validate_discount_bps(percent_bps)?;

        let (entity, guard) = self.discounts.create(Discount::new(name, percent_bps));
        entity.store(&guard).await?;
        entity.unlock(guard);

        let cached = self.discounts.cache_one(entity)?;
        let id = self.discounts_id(&cached)?;
        info!(id, percent_bps, "Discount plan created");
        Ok(id)
    }

    /// A discount plan by id.
    pub async fn discount(&self, id: i64) -> DbResult<Discount> {
        Ok(self.discounts.load_populated(id).await?.record())
    }

    /// Every discount plan, ordered by id.
    pub async fn all_discounts(&self) -> DbResult<Vec<(i64, Discount)>> {
        let rows = self.discounts.load_many(&AllRows, SyncMode::Load).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.primary_id().map(|id| (id, row.record())))
            .collect())
    }

    fn discounts_id(&self, entity: &RowEntity<Discount>) -> DbResult<i64> {
        entity
            .primary_id()
            .ok_or_else(|| DbError::MissingIdentity {
                table: self.discounts.table_name().to_string(),
            })
    }
}

#[async_trait]
impl Repairable for RateController {
    fn list_tables(&self) -> Vec<&'static str> {
        vec![self.discounts.table_name(), self.rates.table_name()]
    }

    async fn repair(&self, table: &str, op: RepairOp) -> DbResult<bool> {
        if table == self.rates.table_name() {
            self.rates.repair(op).await?;
        } else if table == self.discounts.table_name() {
            self.discounts.repair(op).await?;
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

    async fn controller() -> RateController {
        let conn = Connection::open(&DbConfig::in_memory()).await.unwrap();
        let controller = RateController::new(conn);
        for table in controller.list_tables() {
            controller.assure_existence(table).await.unwrap();
        }
        controller
    }

    #[tokio::test]
    async fn test_set_rate_inserts_then_updates() {
        let controller = controller().await;

        controller.set_rate("usd", 790_000).await.unwrap();
        controller.set_rate("USD", 800_000).await.unwrap();
        controller.set_rate("EUR", 860_000).await.unwrap();

        assert_eq!(controller.rate("usd").await.unwrap().rate_micros, 800_000);
        assert_eq!(controller.convert("USD", 10_000).await.unwrap(), 8_000);

        let codes: Vec<String> = controller
            .all_rates()
            .await
            .unwrap()
            .into_iter()
            .map(|(code, _)| code)
            .collect();
        assert_eq!(codes, vec!["EUR", "USD"]);
    }

    #[tokio::test]
    async fn test_set_rate_validates_before_storage() {
        let controller = controller().await;

        let err = controller.set_rate("EURO", 1_000_000).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(_)));

        let err = controller.set_rate("GBP", 0).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(_)));
        assert!(controller.all_rates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_rate_is_not_found() {
        let controller = controller().await;
        let err = controller.rate("JPY").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_discount_plans() {
        let controller = controller().await;
        let id = controller.create_discount("Valued", 250).await.unwrap();

        assert_eq!(controller.discount(id).await.unwrap().percent_bps, 250);
        assert_eq!(controller.all_discounts().await.unwrap().len(), 1);
        assert!(controller.create_discount("Too much", 10_001).await.is_err());
    }
}
