//! Throwaway records used by the table layer's unit tests.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::def::{KeyKind, Record, TableDef};
use crate::config::DbConfig;
use crate::connection::Connection;
use crate::statement::SqlValue;

/// Generated integer key.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Note {
    pub body: String,
    pub pinned: bool,
}

pub(crate) static NOTES: TableDef = TableDef {
    name: "notes",
    aux_name: "notes_aux",
    id_column: "id",
    columns: &["body", "pinned"],
    schema: "id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL, pinned INTEGER NOT NULL",
    aux_schema: "id INTEGER PRIMARY KEY",
    order_column: "id",
    key_kind: KeyKind::Generated,
};

impl Record for Note {
    type Id = i64;

    fn table() -> &'static TableDef {
        &NOTES
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![self.body.clone().into(), self.pinned.into()]
    }

    fn read(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Note {
            body: row.try_get("body")?,
            pinned: row.try_get("pinned")?,
        })
    }
}

/// Supplied text key.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Tag {
    pub label: String,
}

pub(crate) static TAGS: TableDef = TableDef {
    name: "tags",
    aux_name: "tags_aux",
    id_column: "code",
    columns: &["label"],
    schema: "code TEXT PRIMARY KEY, label TEXT NOT NULL",
    aux_schema: "code TEXT PRIMARY KEY",
    order_column: "code",
    key_kind: KeyKind::Supplied,
};

impl Record for Tag {
    type Id = String;

    fn table() -> &'static TableDef {
        &TAGS
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![self.label.clone().into()]
    }

    fn read(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Tag {
            label: row.try_get("label")?,
        })
    }
}

pub(crate) async fn memory() -> Connection {
    Connection::open(&DbConfig::in_memory()).await.unwrap()
}

pub(crate) async fn create_tables<R: Record>(conn: &Connection) {
    let def = R::table();
    conn.execute_ddl(&conn.prepare(def.create_sql())).await.unwrap();
    conn.execute_ddl(&conn.prepare(def.aux_create_sql()))
        .await
        .unwrap();
}

pub(crate) async fn count(conn: &Connection, sql: &str) -> i64 {
    conn.fetch_count(&conn.prepare(sql)).await.unwrap()
}
