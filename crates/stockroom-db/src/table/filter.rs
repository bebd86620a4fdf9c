//! # Filters
//!
//! A [`FilterStatement`] completes the bulk-query template a table accessor
//! hands it (`SELECT <columns> FROM <table> WHERE `) into a full statement.
//! The accessor never inspects the filter; every bulk result is ordered by
//! the table's order column so repeated loads see rows in the same order.

use crate::connection::Connection;
use crate::statement::{SqlValue, Statement};

/// Completes a bulk-query template.
pub trait FilterStatement: Send + Sync {
    /// `template` ends in `WHERE `; `order_column` must end up in an
    /// `ORDER BY` clause.
    fn create(&self, conn: &Connection, template: &str, order_column: &str) -> Statement;
}

/// Every row of the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllRows;

impl FilterStatement for AllRows {
    fn create(&self, conn: &Connection, template: &str, order_column: &str) -> Statement {
        let base = template.trim_end().trim_end_matches("WHERE").trim_end();
        conn.prepare(format!("{base} ORDER BY {order_column}"))
    }
}

/// Rows whose `column` equals `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnEquals {
    pub column: &'static str,
    pub value: SqlValue,
}

impl ColumnEquals {
    pub fn new(column: &'static str, value: impl Into<SqlValue>) -> Self {
        ColumnEquals {
            column,
            value: value.into(),
        }
    }
}

impl FilterStatement for ColumnEquals {
    fn create(&self, conn: &Connection, template: &str, order_column: &str) -> Statement {
        conn.prepare(format!(
            "{template}{} = ? ORDER BY {order_column}",
            self.column
        ))
        .bind(self.value.clone())
    }
}

/// A free-form `WHERE` clause with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    clause: String,
    params: Vec<SqlValue>,
}

impl Predicate {
    pub fn new(clause: impl Into<String>) -> Self {
        Predicate {
            clause: clause.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl FilterStatement for Predicate {
    fn create(&self, conn: &Connection, template: &str, order_column: &str) -> Statement {
        conn.prepare(format!(
            "{template}{} ORDER BY {order_column}",
            self.clause
        ))
        .bind_all(self.params.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::testing::memory;

    const TEMPLATE: &str = "SELECT id FROM notes WHERE ";

    #[tokio::test]
    async fn test_all_rows_drops_where() {
        let conn = memory().await;
        let stmt = AllRows.create(&conn, TEMPLATE, "id");
        assert_eq!(stmt.sql(), "SELECT id FROM notes ORDER BY id");
        assert!(stmt.params().is_empty());
    }

    #[tokio::test]
    async fn test_column_equals_binds_value() {
        let conn = memory().await;
        let stmt = ColumnEquals::new("status", "available").create(&conn, TEMPLATE, "id");
        assert_eq!(
            stmt.sql(),
            "SELECT id FROM notes WHERE status = ? ORDER BY id"
        );
        assert_eq!(stmt.params(), &[SqlValue::Text("available".into())]);
    }

    #[tokio::test]
    async fn test_predicate_keeps_param_order() {
        let conn = memory().await;
        let stmt = Predicate::new("id BETWEEN ? AND ?")
            .bind(3_i64)
            .bind(9_i64)
            .create(&conn, TEMPLATE, "id");
        assert_eq!(
            stmt.sql(),
            "SELECT id FROM notes WHERE id BETWEEN ? AND ? ORDER BY id"
        );
        assert_eq!(stmt.params(), &[SqlValue::Integer(3), SqlValue::Integer(9)]);
    }
}
