//! # Statements
//!
//! Owned, parameterized SQL statements. A [`Statement`] is built by the
//! table layer (never by the connection), carries its bound values, and is
//! released when it goes out of scope.

use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

/// A bindable SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Integer(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// SQL text plus its positional (`?`) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Binds the next positional parameter.
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Binds several positional parameters in order.
    pub fn bind_all(mut self, values: impl IntoIterator<Item = SqlValue>) -> Self {
        self.params.extend(values);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// Builds the sqlx query with every parameter bound.
    pub(crate) fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        self.params
            .iter()
            .fold(sqlx::query(&self.sql), |query, value| match value {
                SqlValue::Null => query.bind(None::<i64>),
                SqlValue::Integer(v) => query.bind(*v),
                SqlValue::Real(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.as_str()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_collects_params_in_order() {
        let stmt = Statement::new("UPDATE rates SET rate_micros = ? WHERE code = ?")
            .bind(790_000_i64)
            .bind("GBP");

        assert_eq!(
            stmt.params(),
            &[SqlValue::Integer(790_000), SqlValue::Text("GBP".to_string())]
        );
    }

    #[test]
    fn test_option_and_bool_conversions() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(3_i64)), SqlValue::Integer(3));
        assert_eq!(SqlValue::from(true), SqlValue::Integer(1));
    }
}
