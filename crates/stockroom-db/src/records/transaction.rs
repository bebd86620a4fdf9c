//! transactions table.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use stockroom_core::{PaymentKind, Transaction};

use crate::statement::SqlValue;
use crate::table::{decode_error, KeyKind, Record, TableDef};

pub static TRANSACTIONS: TableDef = TableDef {
    name: "transactions",
    aux_name: "transactions_aux",
    id_column: "id",
    columns: &[
        "blank_id",
        "customer_id",
        "amount_minor",
        "currency",
        "base_amount_minor",
        "payment",
        "reference",
        "recorded_at",
    ],
    schema: "id INTEGER PRIMARY KEY AUTOINCREMENT, \
             blank_id INTEGER NOT NULL REFERENCES blanks(id), \
             customer_id INTEGER REFERENCES customers(id), \
             amount_minor INTEGER NOT NULL, \
             currency TEXT NOT NULL, \
             base_amount_minor INTEGER NOT NULL, \
             payment TEXT NOT NULL, \
             reference TEXT NOT NULL UNIQUE, \
             recorded_at TEXT NOT NULL",
    aux_schema: "id INTEGER PRIMARY KEY",
    order_column: "id",
    key_kind: KeyKind::Generated,
};

impl Record for Transaction {
    type Id = i64;

    fn table() -> &'static TableDef {
        &TRANSACTIONS
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.blank_id.into(),
            self.customer_id.into(),
            self.amount_minor.into(),
            self.currency.as_str().into(),
            self.base_amount_minor.into(),
            self.payment.as_str().into(),
            self.reference.as_str().into(),
            self.recorded_at.to_rfc3339().into(),
        ]
    }

    fn read(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let payment: String = row.try_get("payment")?;
        Ok(Transaction {
            blank_id: row.try_get("blank_id")?,
            customer_id: row.try_get("customer_id")?,
            amount_minor: row.try_get("amount_minor")?,
            currency: row.try_get("currency")?,
            base_amount_minor: row.try_get("base_amount_minor")?,
            payment: payment.parse::<PaymentKind>().map_err(decode_error)?,
            reference: row.try_get("reference")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}
