//! Conversions between [`SqlValue`]/[`Row`] and PostgreSQL types.
//!
//! Binding is driven by the parameter type the server inferred for the
//! placeholder, so an `Int` bound against a `numeric` column or a `Text`
//! bound against a `timestamptz` column is converted rather than rejected.

use std::error::Error;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres_types::{IsNull, ToSql, Type, to_sql_checked};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Number, Value};

use crate::sql::{Row, SqlValue};

type BoxError = Box<dyn Error + Sync + Send>;

fn mismatch(value: &SqlValue, ty: &Type) -> BoxError {
    format!("cannot bind {:?} as {}", value, ty).into()
}

/// Parses RFC 3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC) or a bare date
/// (midnight UTC).
pub(super) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

impl SqlValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Json(Value::Number(n)) => n.as_i64(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(i) => Some(*i as f64),
            SqlValue::Float(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Json(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(i) => Some(*i != 0),
            SqlValue::Json(Value::Bool(b)) => Some(*b),
            SqlValue::Text(s) => match s.to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "yes" | "on" => Some(true),
                "f" | "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            SqlValue::Timestamp(ts) => Some(*ts),
            SqlValue::Text(s) | SqlValue::Json(Value::String(s)) => parse_timestamp(s),
            _ => None,
        }
    }

    fn as_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::Int(i) => Some(Decimal::from(*i)),
            SqlValue::Float(f) => Decimal::try_from(*f).ok(),
            SqlValue::Text(s) => Decimal::from_str(s.trim()).ok(),
            SqlValue::Json(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        let err = || mismatch(self, ty);
        match *ty {
            Type::BOOL => self.as_bool().ok_or_else(err)?.to_sql(ty, out),
            Type::INT2 => {
                let v = self.as_i64().ok_or_else(err)?;
                i16::try_from(v)?.to_sql(ty, out)
            }
            Type::INT4 => {
                let v = self.as_i64().ok_or_else(err)?;
                i32::try_from(v)?.to_sql(ty, out)
            }
            Type::INT8 => self.as_i64().ok_or_else(err)?.to_sql(ty, out),
            Type::FLOAT4 => (self.as_f64().ok_or_else(err)? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.as_f64().ok_or_else(err)?.to_sql(ty, out),
            Type::NUMERIC => self.as_decimal().ok_or_else(err)?.to_sql(ty, out),
            Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
            Type::JSONPATH => {
                // Binary format: version byte, then the path text.
                let text = self.to_text().ok_or_else(err)?;
                out.put_u8(1);
                out.put_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            Type::TIMESTAMPTZ => self.as_timestamp().ok_or_else(err)?.to_sql(ty, out),
            Type::TIMESTAMP => self
                .as_timestamp()
                .ok_or_else(err)?
                .naive_utc()
                .to_sql(ty, out),
            Type::DATE => self
                .as_timestamp()
                .ok_or_else(err)?
                .date_naive()
                .to_sql(ty, out),
            Type::UUID => {
                let text = self.to_text().ok_or_else(err)?;
                uuid::Uuid::parse_str(&text)?.to_sql(ty, out)
            }
            // Text-like and user-defined types take the text rendering.
            _ => {
                let text = self.to_text().ok_or_else(err)?;
                out.put_slice(text.as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

pub(super) fn decode_row(row: &tokio_postgres::Row) -> Result<Row, tokio_postgres::Error> {
    let mut out = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_value(row, idx, column.type_())?);
    }
    Ok(out)
}

fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> Result<Value, tokio_postgres::Error> {
    macro_rules! get {
        ($t:ty, $map:expr) => {
            row.try_get::<_, Option<$t>>(idx)?
                .map($map)
                .unwrap_or(Value::Null)
        };
    }

    Ok(match *ty {
        Type::BOOL => get!(bool, Value::Bool),
        Type::INT2 => get!(i16, Value::from),
        Type::INT4 => get!(i32, Value::from),
        Type::INT8 => get!(i64, Value::from),
        Type::OID => get!(u32, Value::from),
        Type::FLOAT4 => get!(f32, |f| float(f64::from(f))),
        Type::FLOAT8 => get!(f64, float),
        Type::NUMERIC => get!(Decimal, decimal),
        Type::JSON | Type::JSONB => get!(Value, |v| v),
        Type::TIMESTAMPTZ => get!(DateTime<Utc>, |ts| Value::String(ts.to_rfc3339())),
        Type::TIMESTAMP => get!(NaiveDateTime, |ts| Value::String(ts.and_utc().to_rfc3339())),
        Type::DATE => get!(NaiveDate, |d| Value::String(d.format("%Y-%m-%d").to_string())),
        Type::UUID => get!(uuid::Uuid, |u| Value::String(u.to_string())),
        Type::BYTEA => get!(Vec<u8>, |b| Value::String(BASE64.encode(b))),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get!(String, Value::String)
        }
        _ => {
            tracing::debug!(column = idx, ty = %ty, "no decoder for column type");
            Value::Null
        }
    })
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Whole decimals become integers when they fit; the rest become floats.
fn decimal(d: Decimal) -> Value {
    if d.fract().is_zero()
        && let Some(i) = d.to_i64()
    {
        return Value::from(i);
    }
    d.to_f64().map(float).unwrap_or(Value::Null)
}
