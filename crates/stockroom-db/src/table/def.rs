//! # Table Definitions
//!
//! The per-table configuration consumed by the generic table layer: names,
//! schema fragments, column mapping and key type. One [`TableDef`] plus one
//! [`Record`] impl replaces a hand-written accessor per table.
//!
//! ## Shape of a managed table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  main table  (TableDef::name)          auxiliary table (aux_name)       │
//! │  ┌──────┬────────┬────────┬──────┐     ┌──────┐                         │
//! │  │ id   │ col_1  │ col_2  │ ...  │     │ id   │  identity only          │
//! │  ├──────┼────────┼────────┼──────┤     ├──────┤                         │
//! │  │ 7    │ ...    │ ...    │      │ ◄─► │ 7    │  1:1 mirror             │
//! │  │ 8    │ ...    │ ...    │      │ ◄─► │ 8    │                         │
//! │  └──────┴────────┴────────┴──────┘     └──────┘                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::hash::Hash;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::statement::SqlValue;

/// How a table's primary key is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// `INTEGER PRIMARY KEY`: the database assigns the key on insert.
    Generated,
    /// The caller supplies the key (currency code, blank stock number).
    Supplied,
}

/// Static description of one main table and its auxiliary shadow table.
#[derive(Debug)]
pub struct TableDef {
    /// Main table name; also the logical name used by the repair facility.
    pub name: &'static str,
    /// Auxiliary (identity) table name.
    pub aux_name: &'static str,
    /// Primary key column, present in both tables.
    pub id_column: &'static str,
    /// Non-key columns, in the order of [`Record::values`].
    pub columns: &'static [&'static str],
    /// Column definitions of the main table (key, columns, foreign keys).
    pub schema: &'static str,
    /// Column definitions of the auxiliary table.
    pub aux_schema: &'static str,
    /// Stable column bulk queries are ordered by.
    pub order_column: &'static str,
    pub key_kind: KeyKind,
}

impl TableDef {
    fn column_list(&self) -> String {
        self.columns.join(", ")
    }

    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    /// Bulk query template ending in `WHERE ` for a filter to complete.
    pub fn select_template(&self, with_columns: bool) -> String {
        if with_columns {
            format!(
                "SELECT {}, {} FROM {} WHERE ",
                self.id_column,
                self.column_list(),
                self.name
            )
        } else {
            format!("SELECT {} FROM {} WHERE ", self.id_column, self.name)
        }
    }

    pub fn select_by_id_sql(&self) -> String {
        format!("{}{} = ?", self.select_template(true), self.id_column)
    }

    pub fn count_by_id_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            self.name, self.id_column
        )
    }

    /// `INSERT` for the main table; `with_id` binds the key as first parameter.
    pub fn insert_sql(&self, with_id: bool) -> String {
        if with_id {
            format!(
                "INSERT INTO {} ({}, {}) VALUES ({})",
                self.name,
                self.id_column,
                self.column_list(),
                Self::placeholders(self.columns.len() + 1)
            )
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.name,
                self.column_list(),
                Self::placeholders(self.columns.len())
            )
        }
    }

    /// `UPDATE` binding every column, then the key.
    pub fn update_sql(&self) -> String {
        let assignments = self
            .columns
            .iter()
            .map(|column| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.name, assignments, self.id_column
        )
    }

    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE {} = ?", self.name, self.id_column)
    }

    pub fn aux_insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES (?)",
            self.aux_name, self.id_column
        )
    }

    pub fn aux_delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE {} = ?", self.aux_name, self.id_column)
    }

    pub fn create_sql(&self) -> String {
        format!("CREATE TABLE IF NOT EXISTS {} ({})", self.name, self.schema)
    }

    pub fn aux_create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.aux_name, self.aux_schema
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.name)
    }

    pub fn aux_drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.aux_name)
    }

    /// Single batched statement mirroring every main key into the aux table.
    pub fn mirror_sql(&self) -> String {
        format!(
            "INSERT OR IGNORE INTO {aux} ({id}) SELECT {id} FROM {main}",
            aux = self.aux_name,
            id = self.id_column,
            main = self.name
        )
    }
}

// =============================================================================
// Primary keys
// =============================================================================

/// A primary-key type usable as cache key.
pub trait PrimaryKey:
    Clone + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    fn to_value(&self) -> SqlValue;

    fn read(row: &SqliteRow, column: &str) -> Result<Self, sqlx::Error>;

    /// Key for a database-generated rowid, if this key type can be generated.
    fn from_generated(rowid: i64) -> Option<Self>;
}

impl PrimaryKey for i64 {
    fn to_value(&self) -> SqlValue {
        SqlValue::Integer(*self)
    }

    fn read(row: &SqliteRow, column: &str) -> Result<Self, sqlx::Error> {
        row.try_get(column)
    }

    fn from_generated(rowid: i64) -> Option<Self> {
        Some(rowid)
    }
}

impl PrimaryKey for String {
    fn to_value(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }

    fn read(row: &SqliteRow, column: &str) -> Result<Self, sqlx::Error> {
        row.try_get(column)
    }

    fn from_generated(_rowid: i64) -> Option<Self> {
        None
    }
}

// =============================================================================
// Records
// =============================================================================

/// Column mapping between a record type and its table.
///
/// `Default` is the unpopulated value a stub entity carries before it is
/// loaded.
pub trait Record: Clone + Default + Send + Sync + 'static {
    type Id: PrimaryKey;

    fn table() -> &'static TableDef;

    /// Column values in [`TableDef::columns`] order.
    fn values(&self) -> Vec<SqlValue>;

    /// Reads the non-key columns from a full result row.
    fn read(row: &SqliteRow) -> Result<Self, sqlx::Error>;
}

/// Maps a domain parse error into the sqlx decode error `Record::read` returns.
pub fn decode_error<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    static NOTES: TableDef = TableDef {
        name: "notes",
        aux_name: "notes_aux",
        id_column: "id",
        columns: &["body", "pinned"],
        schema: "id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL, pinned INTEGER NOT NULL",
        aux_schema: "id INTEGER PRIMARY KEY",
        order_column: "id",
        key_kind: KeyKind::Generated,
    };

    #[test]
    fn test_generated_sql() {
        assert_eq!(
            NOTES.select_template(true),
            "SELECT id, body, pinned FROM notes WHERE "
        );
        assert_eq!(NOTES.select_template(false), "SELECT id FROM notes WHERE ");
        assert_eq!(
            NOTES.insert_sql(false),
            "INSERT INTO notes (body, pinned) VALUES (?, ?)"
        );
        assert_eq!(
            NOTES.insert_sql(true),
            "INSERT INTO notes (id, body, pinned) VALUES (?, ?, ?)"
        );
        assert_eq!(
            NOTES.update_sql(),
            "UPDATE notes SET body = ?, pinned = ? WHERE id = ?"
        );
        assert_eq!(
            NOTES.mirror_sql(),
            "INSERT OR IGNORE INTO notes_aux (id) SELECT id FROM notes"
        );
    }

    #[test]
    fn test_key_generation_by_type() {
        assert_eq!(i64::from_generated(7), Some(7));
        assert_eq!(String::from_generated(7), None);
        assert_eq!("GBP".to_string().to_value(), SqlValue::Text("GBP".into()));
    }
}
