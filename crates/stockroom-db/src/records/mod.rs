//! # Record Mappings
//!
//! [`Record`](crate::table::Record) impls and table definitions for the
//! stockroom-core records.
//!
//! ## Tables
//! ```text
//! ┌──────────────┬───────────────┬────────────────────────────────────────┐
//! │ Table        │ Key           │ References                             │
//! ├──────────────┼───────────────┼────────────────────────────────────────┤
//! │ discounts    │ id (gen)      │                                        │
//! │ customers    │ id (gen)      │ discount_id → discounts                │
//! │ rates        │ code (TEXT)   │                                        │
//! │ blanks       │ id (supplied) │                                        │
//! │ transactions │ id (gen)      │ blank_id → blanks, customer_id →       │
//! │              │               │ customers                              │
//! └──────────────┴───────────────┴────────────────────────────────────────┘
//! ```
//!
//! Each table has a `<name>_aux` twin holding only the key. Enum columns are
//! stored as lowercase TEXT, timestamps as RFC 3339 TEXT.

mod blank;
mod customer;
mod discount;
mod rate;
mod transaction;

pub use blank::BLANKS;
pub use customer::CUSTOMERS;
pub use discount::DISCOUNTS;
pub use rate::RATES;
pub use transaction::TRANSACTIONS;

use crate::table::TableDef;

/// Every managed table, referenced tables first.
pub static ALL_TABLES: [&TableDef; 5] = [&DISCOUNTS, &CUSTOMERS, &RATES, &BLANKS, &TRANSACTIONS];

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stockroom_core::{Blank, BlankStatus, ConversionRate, Customer, CustomerKind, Discount};

    use crate::config::DbConfig;
    use crate::connection::Connection;
    use crate::error::{DbError, StorageFailure};
    use crate::table::TableAccessor;

    async fn connection() -> Connection {
        let conn = Connection::open(&DbConfig::in_memory()).await.unwrap();
        for def in super::ALL_TABLES {
            conn.execute_ddl(&conn.prepare(def.create_sql())).await.unwrap();
            conn.execute_ddl(&conn.prepare(def.aux_create_sql()))
                .await
                .unwrap();
        }
        conn
    }

    #[tokio::test]
    async fn test_customer_columns_survive_storage() {
        let conn = connection().await;
        let discounts = TableAccessor::<Discount>::new(conn.clone());
        let customers = TableAccessor::<Customer>::new(conn.clone());

        let (plan, plan_guard) = discounts.create(Discount::new("Valued", 250));
        plan.store(&plan_guard).await.unwrap();
        let plan_id = plan.primary_id().unwrap();

        let mut record = Customer::new("Ada");
        record.kind = CustomerKind::Valued;
        record.discount_id = Some(plan_id);
        record.email = Some("ada@example.com".to_string());

        let (customer, guard) = customers.create(record.clone());
        customer.store(&guard).await.unwrap();
        customer.unlock(guard);
        let id = customer.primary_id().unwrap();

        customers.refresh_all();
        let loaded = customers.load_populated(id).await.unwrap();
        let stored = loaded.record();
        assert_eq!(stored.name, "Ada");
        assert_eq!(stored.kind, CustomerKind::Valued);
        assert_eq!(stored.discount_id, Some(plan_id));
        assert_eq!(stored.email.as_deref(), Some("ada@example.com"));
        assert_eq!(stored.created_at.timestamp(), record.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_text_key_table() {
        let conn = connection().await;
        let rates = TableAccessor::<ConversionRate>::new(conn);

        let (gbp, guard) = rates
            .create_keyed("GBP".to_string(), ConversionRate::new(1_000_000))
            .await
            .unwrap();
        gbp.store(&guard).await.unwrap();
        gbp.unlock(guard);

        rates.refresh_all();
        let loaded = rates.load_populated("GBP".to_string()).await.unwrap();
        assert_eq!(loaded.record().rate_micros, 1_000_000);
    }

    #[tokio::test]
    async fn test_unknown_enum_value_is_a_decode_failure() {
        let conn = connection().await;
        conn.execute(
            &conn
                .prepare("INSERT INTO blanks (id, blank_type, status, assigned_to) VALUES (?, ?, ?, ?)")
                .bind(44_400_001_i64)
                .bind(444_i64)
                .bind("lost")
                .bind(None::<String>),
        )
        .await
        .unwrap();

        let blanks = Arc::new(TableAccessor::<Blank>::new(conn));
        let err = blanks.load_populated(44_400_001).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Storage {
                source: StorageFailure::Decode(_),
                ..
            }
        ));

        let entity = blanks.load(44_400_001).await;
        assert!(!entity.is_loaded());
        assert_eq!(entity.record().status, BlankStatus::Available);
    }

    #[tokio::test]
    async fn test_foreign_keys_are_enforced() {
        let conn = connection().await;
        let customers = TableAccessor::<Customer>::new(conn);

        let mut record = Customer::new("Ghost");
        record.discount_id = Some(999);
        let (customer, guard) = customers.create(record);

        let err = customer.store(&guard).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Storage {
                source: StorageFailure::ForeignKeyViolation { .. },
                ..
            }
        ));
    }
}
