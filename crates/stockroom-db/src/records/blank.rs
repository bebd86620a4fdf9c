//! blanks table. The stock number printed on the blank is the key.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use stockroom_core::{Blank, BlankStatus};

use crate::statement::SqlValue;
use crate::table::{decode_error, KeyKind, Record, TableDef};

pub static BLANKS: TableDef = TableDef {
    name: "blanks",
    aux_name: "blanks_aux",
    id_column: "id",
    columns: &["blank_type", "status", "assigned_to"],
    schema: "id INTEGER PRIMARY KEY, \
             blank_type INTEGER NOT NULL, \
             status TEXT NOT NULL, \
             assigned_to TEXT",
    aux_schema: "id INTEGER PRIMARY KEY",
    order_column: "id",
    key_kind: KeyKind::Supplied,
};

impl Record for Blank {
    type Id = i64;

    fn table() -> &'static TableDef {
        &BLANKS
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.blank_type.into(),
            self.status.as_str().into(),
            self.assigned_to.clone().into(),
        ]
    }

    fn read(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Blank {
            blank_type: row.try_get("blank_type")?,
            status: status.parse::<BlankStatus>().map_err(decode_error)?,
            assigned_to: row.try_get("assigned_to")?,
        })
    }
}
