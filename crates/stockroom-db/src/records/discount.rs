//! discounts table.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use stockroom_core::Discount;

use crate::statement::SqlValue;
use crate::table::{KeyKind, Record, TableDef};

pub static DISCOUNTS: TableDef = TableDef {
    name: "discounts",
    aux_name: "discounts_aux",
    id_column: "id",
    columns: &["name", "percent_bps"],
    schema: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
             name TEXT NOT NULL, \
             percent_bps INTEGER NOT NULL CHECK (percent_bps BETWEEN 0 AND 10000)",
    aux_schema: "id INTEGER PRIMARY KEY",
    order_column: "id",
    key_kind: KeyKind::Generated,
};

impl Record for Discount {
    type Id = i64;

    fn table() -> &'static TableDef {
        &DISCOUNTS
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![self.name.as_str().into(), self.percent_bps.into()]
    }

    fn read(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Discount {
            name: row.try_get("name")?,
            percent_bps: row.try_get("percent_bps")?,
        })
    }
}
