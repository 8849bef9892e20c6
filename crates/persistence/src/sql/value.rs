//! Bind values and write-position values.
//!
//! [`SqlValue`] is the engine-neutral bind parameter. Each engine converts it
//! to its native representation at bind time, and converts result columns
//! back into JSON values so callers see the same [`Row`] shape from either
//! engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FilterError;

/// A result row: column name to value, in select-list order.
pub type Row = Map<String, Value>;

/// An engine-neutral bind parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean; stored as 0/1 on SQLite.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// Text.
    Text(String),
    /// A composite value; JSONB on PostgreSQL, JSON text on SQLite.
    Json(Value),
    /// A UTC timestamp; RFC 3339 text on SQLite.
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    /// Returns `true` for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Converts the value back into JSON.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Float(f) => Value::from(*f),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Json(v) => v.clone(),
            SqlValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        }
    }

    /// Renders scalar values as text, for text-typed binds.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Json(Value::String(s)) => Some(s.clone()),
            SqlValue::Json(v) => Some(v.to_string()),
            SqlValue::Timestamp(ts) => Some(ts.to_rfc3339()),
        }
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlValue::Text(s),
            composite => SqlValue::Json(composite),
        }
    }
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        SqlValue::from(value.clone())
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident as $conv:ty),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    SqlValue::$variant(<$conv>::from(v))
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool as bool,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float as f64,
    String => Text as String,
    &str => Text as String,
    DateTime<Utc> => Timestamp as DateTime<Utc>,
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A value in a write position (`INSERT` values, `UPDATE ... SET`).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// An ordinary bound value.
    Value(SqlValue),
    /// One more than the largest value of this column among rows with
    /// primary key `row_id` (0 when there is none).
    ///
    /// Used for append-only history tables where each new row of an entity
    /// takes the next version number.
    NextVersion {
        /// Primary key shared by the versioned rows.
        row_id: i64,
    },
}

impl FieldValue {
    /// Shorthand for [`FieldValue::NextVersion`].
    pub fn next_version(row_id: i64) -> Self {
        FieldValue::NextVersion { row_id }
    }
}

impl<T: Into<SqlValue>> From<T> for FieldValue {
    fn from(v: T) -> Self {
        FieldValue::Value(v.into())
    }
}

/// Column assignments for an insert or update, in caller order.
///
/// ```
/// use quarry_persistence::sql::{FieldValue, RowValues};
/// use serde_json::json;
///
/// let values = RowValues::new()
///     .set("author", "Leo Tolstoy")
///     .set("pages", 728)
///     .set("_version", FieldValue::next_version(7));
/// assert_eq!(values.len(), 3);
///
/// let from_json = RowValues::from_json(json!({"author": "Leo Tolstoy"})).unwrap();
/// assert_eq!(from_json.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowValues {
    entries: Vec<(String, FieldValue)>,
}

impl RowValues {
    /// Creates an empty set of assignments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an assignment, replacing an earlier one for the same column.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(column, value);
        self
    }

    /// Adds an assignment in place.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<FieldValue>) {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    /// Builds assignments from a JSON object.
    pub fn from_json(value: Value) -> Result<Self, FilterError> {
        match value {
            Value::Object(map) => Ok(Self::from(map)),
            other => Err(FilterError::malformed(format!(
                "row values must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Iterates over the assignments.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Returns the column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    /// Number of assignments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no assignments.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Map<String, Value>> for RowValues {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(k, v)| (k, FieldValue::Value(v.into())))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for RowValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values = RowValues::new();
        for (k, v) in iter {
            values.insert(k, v);
        }
        values
    }
}
