//! rates table, keyed by ISO 4217 currency code.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use stockroom_core::ConversionRate;

use crate::statement::SqlValue;
use crate::table::{KeyKind, Record, TableDef};

pub static RATES: TableDef = TableDef {
    name: "rates",
    aux_name: "rates_aux",
    id_column: "code",
    columns: &["rate_micros", "updated_at"],
    schema: "code TEXT PRIMARY KEY, \
             rate_micros INTEGER NOT NULL CHECK (rate_micros > 0), \
             updated_at TEXT NOT NULL",
    aux_schema: "code TEXT PRIMARY KEY",
    order_column: "code",
    key_kind: KeyKind::Supplied,
};

impl Record for ConversionRate {
    type Id = String;

    fn table() -> &'static TableDef {
        &RATES
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.rate_micros.into(),
            self.updated_at.to_rfc3339().into(),
        ]
    }

    fn read(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ConversionRate {
            rate_micros: row.try_get("rate_micros")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
