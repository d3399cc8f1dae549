//! The structural contract between entity structs and the generic store.
//!
//! Every persisted struct exposes its table name and the list of non-empty
//! `(column, value)` pairs. "Empty" follows the original schema convention:
//! zero numerics and empty strings are omitted, optional columns are bound
//! only when set. Field order is declaration order, so generated SQL is
//! deterministic and testable.

use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;

/// A scalar bound into a dynamically-built query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    U64(u64),
    Str(String),
    Bool(bool),
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// A persisted entity: table routing plus non-empty field extraction.
pub trait Entity {
    /// Unqualified table name; the store prefixes the logical database.
    const TABLE: &'static str;

    /// Non-empty `(column, value)` pairs in declaration order.
    fn fields(&self) -> Vec<(&'static str, SqlValue)>;
}

pub(crate) type FieldVec = Vec<(&'static str, SqlValue)>;

pub(crate) fn push_u64(fields: &mut FieldVec, column: &'static str, value: u64) {
    if value != 0 {
        fields.push((column, SqlValue::U64(value)));
    }
}

pub(crate) fn push_str(fields: &mut FieldVec, column: &'static str, value: &str) {
    if !value.is_empty() {
        fields.push((column, SqlValue::Str(value.to_string())));
    }
}

pub(crate) fn push_opt_u64(fields: &mut FieldVec, column: &'static str, value: Option<u64>) {
    if let Some(v) = value {
        fields.push((column, SqlValue::U64(v)));
    }
}

pub(crate) fn push_opt_str(fields: &mut FieldVec, column: &'static str, value: Option<&str>) {
    if let Some(v) = value {
        fields.push((column, SqlValue::Str(v.to_string())));
    }
}

pub(crate) fn push_opt_bool(fields: &mut FieldVec, column: &'static str, value: Option<bool>) {
    if let Some(v) = value {
        fields.push((column, SqlValue::Bool(v)));
    }
}

/// Bind a [`SqlValue`] onto a dynamically-built query.
pub(crate) fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::U64(v) => query.bind(*v),
        SqlValue::Str(v) => query.bind(v.clone()),
        SqlValue::Bool(v) => query.bind(*v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_and_empty_are_omitted() {
        let mut fields = FieldVec::new();
        push_u64(&mut fields, "id", 0);
        push_str(&mut fields, "name", "");
        push_opt_str(&mut fields, "description", None);
        assert!(fields.is_empty());

        push_u64(&mut fields, "id", 5);
        push_str(&mut fields, "name", "x");
        push_opt_bool(&mut fields, "explicit", Some(false));
        assert_eq!(
            fields,
            vec![
                ("id", SqlValue::U64(5)),
                ("name", SqlValue::Str("x".to_string())),
                ("explicit", SqlValue::Bool(false)),
            ]
        );
    }

    #[test]
    fn test_some_zero_is_kept() {
        // Optional numeric columns keep an explicit zero (faq ordering 0).
        let mut fields = FieldVec::new();
        push_opt_u64(&mut fields, "ordering", Some(0));
        assert_eq!(fields, vec![("ordering", SqlValue::U64(0))]);
    }
}
