//! Conversions between [`SqlValue`]/[`Row`] and SQLite storage classes.
//!
//! SQLite has no boolean, JSON or timestamp storage class. Booleans are
//! stored as 0/1, JSON as text and timestamps as RFC 3339 text. On the way
//! back, the declared column type decides: `BOOL`/`BOOLEAN` columns decode
//! to booleans and `JSON`/`JSONB` columns to parsed JSON.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use serde_json::{Number, Value};

use crate::sql::{Row, SqlValue};

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*b))),
            SqlValue::Int(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Json(v) => ToSqlOutput::Owned(SqliteValue::Text(v.to_string())),
            SqlValue::Timestamp(ts) => ToSqlOutput::Owned(SqliteValue::Text(ts.to_rfc3339())),
        })
    }
}

/// Name and declared type of a result column.
#[derive(Debug, Clone)]
pub(super) struct ColumnInfo {
    pub name: String,
    pub decl_type: Option<String>,
}

impl ColumnInfo {
    fn is_bool(&self) -> bool {
        matches!(self.decl_type.as_deref(), Some("BOOL" | "BOOLEAN"))
    }

    fn is_json(&self) -> bool {
        matches!(self.decl_type.as_deref(), Some("JSON" | "JSONB"))
    }
}

pub(super) fn columns(stmt: &rusqlite::Statement<'_>) -> Vec<ColumnInfo> {
    stmt.columns()
        .iter()
        .map(|c| ColumnInfo {
            name: c.name().to_string(),
            decl_type: c.decl_type().map(|t| t.to_ascii_uppercase()),
        })
        .collect()
}

pub(super) fn decode_row(row: &rusqlite::Row<'_>, columns: &[ColumnInfo]) -> rusqlite::Result<Row> {
    let mut out = Row::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        out.insert(column.name.clone(), decode_value(row.get_ref(i)?, column));
    }
    Ok(out)
}

fn decode_value(value: ValueRef<'_>, column: &ColumnInfo) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if column.is_bool() => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if column.is_json() {
                // Anything that isn't valid JSON comes back as the raw text.
                serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
            } else {
                Value::String(text.into_owned())
            }
        }
        ValueRef::Blob(bytes) => Value::String(BASE64.encode(bytes)),
    }
}
