//! customers table.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use stockroom_core::{Customer, CustomerKind};

use crate::statement::SqlValue;
use crate::table::{decode_error, KeyKind, Record, TableDef};

pub static CUSTOMERS: TableDef = TableDef {
    name: "customers",
    aux_name: "customers_aux",
    id_column: "id",
    columns: &["name", "email", "kind", "discount_id", "created_at"],
    schema: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
             name TEXT NOT NULL, \
             email TEXT, \
             kind TEXT NOT NULL, \
             discount_id INTEGER REFERENCES discounts(id), \
             created_at TEXT NOT NULL",
    aux_schema: "id INTEGER PRIMARY KEY",
    order_column: "id",
    key_kind: KeyKind::Generated,
};

impl Record for Customer {
    type Id = i64;

    fn table() -> &'static TableDef {
        &CUSTOMERS
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.name.as_str().into(),
            self.email.clone().into(),
            self.kind.as_str().into(),
            self.discount_id.into(),
            self.created_at.to_rfc3339().into(),
        ]
    }

    fn read(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Customer {
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            kind: kind.parse::<CustomerKind>().map_err(decode_error)?,
            discount_id: row.try_get("discount_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
