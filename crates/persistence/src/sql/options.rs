//! Ordering, paging and locking options for selects.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::dialect::{Dialect, ParamStack};
use super::ident::{quote_identifier, quote_qualified};
use super::value::SqlValue;
use crate::error::FilterError;

/// SQL functions allowed in an [`OrderOperator`] expression.
const ORDER_FUNCTIONS: &[&str] = &["ABS", "LOWER", "UPPER", "LENGTH", "COALESCE", "ROUND"];
/// Binary operators allowed in an [`OrderOperator`] expression.
const ORDER_BINOPS: &[&str] = &["+", "-", "*", "/"];

/// Options appended after the `WHERE` clause of a select.
///
/// Deserializes from the JSON shape
/// `{"orderBy": "name", "orderDesc": true, "limit": 10, "offset": 20,
///   "nocase": true, "forupdate": true, "fields": ["id", "name"]}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    /// Sort order.
    pub order_by: Option<OrderBy>,
    /// Sort descending. Ignored for random order.
    pub order_desc: bool,
    /// Case-insensitive ordering. Applies to plain field ordering.
    pub nocase: bool,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: Option<u64>,
    /// Lock the selected rows (PostgreSQL only).
    pub for_update: bool,
    /// Columns to return; all columns when `None`.
    pub fields: Option<Vec<String>>,
}

/// How to order the result.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderBy {
    /// By a column.
    Field(String),
    /// Random order.
    Random,
    /// By approximate distance from a point.
    Distance {
        /// Latitude of the reference point.
        lat: f64,
        /// Longitude of the reference point.
        long: f64,
        /// Column holding row latitudes.
        lat_field: String,
        /// Column holding row longitudes.
        long_field: String,
    },
    /// By an allow-listed expression over a column and a target value.
    Operator {
        /// The expression tree.
        operator: OrderOperator,
        /// Value bound wherever the expression says `target`.
        target: SqlValue,
        /// Column referenced wherever the expression says `field`.
        field: String,
    },
}

/// An order-by expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOperator {
    /// The bound target value.
    Target,
    /// The sanitized field.
    Field,
    /// An allow-listed SQL function.
    Function {
        /// Function name, upper case.
        name: String,
        /// Arguments.
        args: Vec<OrderOperator>,
    },
    /// An allow-listed binary operator.
    BinOp {
        /// Operator symbol.
        op: String,
        /// Left operand.
        left: Box<OrderOperator>,
        /// Right operand.
        right: Box<OrderOperator>,
    },
}

impl SelectOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders by a column, ascending.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy::Field(field.into()));
        self
    }

    /// Orders descending.
    pub fn desc(mut self) -> Self {
        self.order_desc = true;
        self
    }

    /// Sets the row limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Locks selected rows.
    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    /// Parses the JSON options shape.
    pub fn from_json(value: &Value) -> Result<Self, FilterError> {
        let obj = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(obj) => obj,
            other => {
                return Err(FilterError::malformed(format!(
                    "select options must be an object, got {}",
                    other
                )));
            }
        };

        let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);

        let fields = match obj.get("fields") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            FilterError::malformed(format!("invalid field name {}", item))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(other) => {
                return Err(FilterError::malformed(format!(
                    "'fields' must be an array, got {}",
                    other
                )));
            }
        };

        Ok(Self {
            order_by: obj.get("orderBy").map(parse_order_by).transpose()?.flatten(),
            order_desc: flag("orderDesc"),
            nocase: flag("nocase"),
            limit: parse_count("limit", obj.get("limit"))?,
            offset: parse_count("offset", obj.get("offset"))?,
            for_update: flag("forupdate"),
            fields,
        })
    }

    /// The select list: quoted `fields`, or `*`.
    pub fn projection(&self) -> Result<String, FilterError> {
        match &self.fields {
            Some(fields) if !fields.is_empty() => Ok(fields
                .iter()
                .map(|f| quote_qualified(f))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")),
            _ => Ok("*".to_string()),
        }
    }

    /// Compiles `ORDER BY`, `LIMIT`, `OFFSET` and `FOR UPDATE`.
    ///
    /// Values in order expressions are bound onto `params`, after whatever the
    /// `WHERE` clause bound. Returns an empty string when there is nothing to
    /// add.
    ///
    /// ```
    /// use quarry_persistence::sql::{Dialect, ParamStack, SelectOptions};
    ///
    /// let options = SelectOptions::new().order_by("name").desc().limit(10).offset(20);
    /// let mut params = ParamStack::new(Dialect::Postgres);
    /// assert_eq!(
    ///     options.compile(&mut params).unwrap(),
    ///     "ORDER BY \"name\" DESC LIMIT 10 OFFSET 20"
    /// );
    /// ```
    pub fn compile(&self, params: &mut ParamStack) -> Result<String, FilterError> {
        let dialect = params.dialect();
        let mut parts = Vec::new();

        if let Some(order_by) = &self.order_by {
            parts.push(format!("ORDER BY {}", self.order_expression(order_by, params)?));
        }

        match (self.limit, self.offset, dialect) {
            (Some(limit), _, _) => parts.push(format!("LIMIT {}", limit)),
            (None, Some(_), Dialect::Sqlite) => parts.push("LIMIT -1".to_string()),
            _ => {}
        }
        if let Some(offset) = self.offset {
            parts.push(format!("OFFSET {}", offset));
        }

        if self.for_update && dialect == Dialect::Postgres {
            parts.push("FOR UPDATE".to_string());
        }

        Ok(parts.join(" "))
    }

    fn order_expression(
        &self,
        order_by: &OrderBy,
        params: &mut ParamStack,
    ) -> Result<String, FilterError> {
        let dialect = params.dialect();
        let expr = match order_by {
            OrderBy::Random => return Ok("RANDOM()".to_string()),
            OrderBy::Field(field) => {
                let column = quote_qualified(field)?;
                match (self.nocase, dialect) {
                    (false, _) => column,
                    (true, Dialect::Postgres) => format!("lower({})", column),
                    (true, Dialect::Sqlite) => format!("{} COLLATE NOCASE", column),
                }
            }
            OrderBy::Distance {
                lat,
                long,
                lat_field,
                long_field,
            } => {
                let lat_col = quote_qualified(lat_field)?;
                let long_col = quote_qualified(long_field)?;
                let cos_lat_2 = lat.to_radians().cos().powi(2);
                let lat_a = params.bind(*lat);
                let lat_b = params.bind(*lat);
                let long_a = params.bind(*long);
                let long_b = params.bind(*long);
                let factor = params.bind(cos_lat_2);
                format!(
                    "(({lat_col} - {lat_a})*({lat_col} - {lat_b})) + \
                     (({long_col} - {long_a})*({long_col} - {long_b})*{factor})"
                )
            }
            OrderBy::Operator {
                operator,
                target,
                field,
            } => {
                let field = quote_identifier(field)?;
                render_operator(operator, target, &field, params)?
            }
        };
        Ok(if self.order_desc {
            format!("{} DESC", expr)
        } else {
            expr
        })
    }
}

impl<'de> Deserialize<'de> for SelectOptions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        SelectOptions::from_json(&value).map_err(serde::de::Error::custom)
    }
}

fn render_operator(
    operator: &OrderOperator,
    target: &SqlValue,
    field: &str,
    params: &mut ParamStack,
) -> Result<String, FilterError> {
    match operator {
        OrderOperator::Target => Ok(params.bind(target.clone())),
        OrderOperator::Field => Ok(field.to_string()),
        OrderOperator::Function { name, args } => {
            let upper = name.to_ascii_uppercase();
            if !ORDER_FUNCTIONS.contains(&upper.as_str()) {
                return Err(FilterError::DisallowedExpression { name: name.clone() });
            }
            let args = args
                .iter()
                .map(|arg| render_operator(arg, target, field, params))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("{}({})", upper, args.join(", ")))
        }
        OrderOperator::BinOp { op, left, right } => {
            if !ORDER_BINOPS.contains(&op.as_str()) {
                return Err(FilterError::DisallowedExpression { name: op.clone() });
            }
            let left = render_operator(left, target, field, params)?;
            let right = render_operator(right, target, field, params)?;
            Ok(format!("({} {} {})", left, op, right))
        }
    }
}

fn parse_count(name: &'static str, value: Option<&Value>) -> Result<Option<u64>, FilterError> {
    let invalid = |v: &Value| FilterError::InvalidCount {
        name,
        value: v.to_string(),
    };
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => {
            if let Some(u) = n.as_u64() {
                Ok(Some(u))
            } else {
                // Whole floats such as 10.0 are accepted.
                match n.as_f64() {
                    Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
                        Ok(Some(f as u64))
                    }
                    _ => Err(invalid(v)),
                }
            }
        }
        Some(v @ Value::String(s)) => s.trim().parse::<u64>().map(Some).map_err(|_| invalid(v)),
        Some(other) => Err(invalid(other)),
    }
}

fn parse_order_by(value: &Value) -> Result<Option<OrderBy>, FilterError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) if s.eq_ignore_ascii_case("RANDOM()") => Ok(Some(OrderBy::Random)),
        Value::String(s) => Ok(Some(OrderBy::Field(s.clone()))),
        Value::Object(obj) => {
            if let Some(distance) = obj.get("distance") {
                return parse_distance(distance).map(Some);
            }
            if let Some(operator) = obj.get("operator") {
                let field = obj.get("field").and_then(Value::as_str).ok_or_else(|| {
                    FilterError::malformed("operator ordering requires a string 'field'")
                })?;
                return Ok(Some(OrderBy::Operator {
                    operator: parse_operator(operator)?,
                    target: obj.get("target").map(SqlValue::from).unwrap_or(SqlValue::Null),
                    field: field.to_string(),
                }));
            }
            Err(FilterError::malformed(format!(
                "unsupported orderBy object {}",
                value
            )))
        }
        other => Err(FilterError::malformed(format!("invalid orderBy {}", other))),
    }
}

fn number(obj: &Map<String, Value>, key: &str) -> Result<f64, FilterError> {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite())
    .ok_or_else(|| FilterError::malformed(format!("distance ordering requires a numeric '{}'", key)))
}

fn parse_distance(value: &Value) -> Result<OrderBy, FilterError> {
    let obj = value
        .as_object()
        .ok_or_else(|| FilterError::malformed("'distance' must be an object"))?;
    let field = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| FilterError::malformed(format!("distance ordering requires '{}'", key)))
    };
    Ok(OrderBy::Distance {
        lat: number(obj, "lat")?,
        long: number(obj, "long")?,
        lat_field: field("latField")?,
        long_field: field("longField")?,
    })
}

fn parse_operator(value: &Value) -> Result<OrderOperator, FilterError> {
    match value {
        Value::String(s) if s == "target" => Ok(OrderOperator::Target),
        Value::String(s) if s == "field" => Ok(OrderOperator::Field),
        Value::Object(obj) => {
            let kind = obj.get("type").and_then(Value::as_str).unwrap_or_default();
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| FilterError::malformed("order operator requires a 'name'"))?;
            let args = match obj.get("args") {
                Some(Value::Array(args)) => args
                    .iter()
                    .map(parse_operator)
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
                Some(other) => {
                    return Err(FilterError::malformed(format!(
                        "order operator args must be an array, got {}",
                        other
                    )));
                }
            };
            match kind {
                "SqlFun" => Ok(OrderOperator::Function {
                    name: name.to_string(),
                    args,
                }),
                "SqlBinOp" => {
                    let mut args = args.into_iter();
                    match (args.next(), args.next(), args.next()) {
                        (Some(left), Some(right), None) => Ok(OrderOperator::BinOp {
                            op: name.to_string(),
                            left: Box::new(left),
                            right: Box::new(right),
                        }),
                        _ => Err(FilterError::malformed(format!(
                            "binary operator '{}' requires exactly two arguments",
                            name
                        ))),
                    }
                }
                other => Err(FilterError::DisallowedExpression {
                    name: other.to_string(),
                }),
            }
        }
        other => Err(FilterError::malformed(format!(
            "invalid order operator {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(options: serde_json::Value, dialect: Dialect) -> (String, Vec<SqlValue>) {
        let options = SelectOptions::from_json(&options).unwrap();
        let mut params = ParamStack::new(dialect);
        let sql = options.compile(&mut params).unwrap();
        (sql, params.into_values())
    }

    #[test]
    fn test_empty_options() {
        assert_eq!(compile(json!({}), Dialect::Postgres).0, "");
        assert_eq!(SelectOptions::new().projection().unwrap(), "*");
    }

    #[test]
    fn test_nocase_ordering_per_dialect() {
        let opts = json!({"orderBy": "name", "nocase": true, "orderDesc": true});
        assert_eq!(compile(opts.clone(), Dialect::Postgres).0, "ORDER BY lower(\"name\") DESC");
        assert_eq!(
            compile(opts, Dialect::Sqlite).0,
            "ORDER BY \"name\" COLLATE NOCASE DESC"
        );
    }

    #[test]
    fn test_limit_and_offset_accept_numeric_strings() {
        let (sql, _) = compile(json!({"limit": "5", "offset": 10}), Dialect::Postgres);
        assert_eq!(sql, "LIMIT 5 OFFSET 10");
    }

    #[test]
    fn test_offset_without_limit_on_sqlite() {
        assert_eq!(compile(json!({"offset": 3}), Dialect::Sqlite).0, "LIMIT -1 OFFSET 3");
        assert_eq!(compile(json!({"offset": 3}), Dialect::Postgres).0, "OFFSET 3");
    }

    #[test]
    fn test_invalid_counts_rejected() {
        for bad in [json!({"limit": -1}), json!({"limit": "ten"}), json!({"offset": 1.5}), json!({"limit": true})] {
            assert!(
                matches!(SelectOptions::from_json(&bad), Err(FilterError::InvalidCount { .. })),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_for_update_is_postgres_only() {
        assert_eq!(compile(json!({"forupdate": true}), Dialect::Postgres).0, "FOR UPDATE");
        assert_eq!(compile(json!({"forupdate": true}), Dialect::Sqlite).0, "");
    }

    #[test]
    fn test_random_order() {
        assert_eq!(compile(json!({"orderBy": "RANDOM()"}), Dialect::Sqlite).0, "ORDER BY RANDOM()");
    }

    #[test]
    fn test_distance_order_binds_everything() {
        let (sql, params) = compile(
            json!({"orderBy": {"distance": {"lat": 60, "long": 10, "latField": "lat", "longField": "lng"}}}),
            Dialect::Postgres,
        );
        assert_eq!(
            sql,
            "ORDER BY ((\"lat\" - $1)*(\"lat\" - $2)) + ((\"lng\" - $3)*(\"lng\" - $4)*$5)"
        );
        assert_eq!(params.len(), 5);
        match params[4] {
            SqlValue::Float(f) => assert!((f - 0.25).abs() < 1e-9),
            ref other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_operator_order() {
        let (sql, params) = compile(
            json!({"orderBy": {
                "operator": {"type": "SqlFun", "name": "ABS", "args": [
                    {"type": "SqlBinOp", "name": "-", "args": ["field", "target"]}
                ]},
                "target": 42,
                "field": "pages"
            }}),
            Dialect::Postgres,
        );
        assert_eq!(sql, "ORDER BY ABS((\"pages\" - $1))");
        assert_eq!(params, vec![SqlValue::Int(42)]);
    }

    #[test]
    fn test_descending_applies_to_computed_orders() {
        let (sql, params) = compile(
            json!({"orderBy": {"distance": {"lat": 60, "long": 10, "latField": "lat", "longField": "lng"}},
                   "orderDesc": true}),
            Dialect::Sqlite,
        );
        assert_eq!(
            sql,
            "ORDER BY ((\"lat\" - ?)*(\"lat\" - ?)) + ((\"lng\" - ?)*(\"lng\" - ?)*?) DESC"
        );
        assert_eq!(params.len(), 5);

        let (sql, _) = compile(
            json!({"orderBy": {
                "operator": {"type": "SqlFun", "name": "ABS", "args": [
                    {"type": "SqlBinOp", "name": "-", "args": ["field", "target"]}
                ]},
                "target": 42,
                "field": "pages"
            }, "orderDesc": true, "limit": 2}),
            Dialect::Postgres,
        );
        assert_eq!(sql, "ORDER BY ABS((\"pages\" - $1)) DESC LIMIT 2");

        let (sql, _) = compile(json!({"orderBy": "RANDOM()", "orderDesc": true}), Dialect::Sqlite);
        assert_eq!(sql, "ORDER BY RANDOM()");
    }

    #[test]
    fn test_operator_allow_list() {
        let not_allowed = SelectOptions::from_json(&json!({"orderBy": {
            "operator": {"type": "SqlFun", "name": "pg_sleep", "args": ["target"]},
            "target": 10, "field": "x"
        }}))
        .unwrap();
        let err = not_allowed.compile(&mut ParamStack::new(Dialect::Postgres)).unwrap_err();
        assert!(matches!(err, FilterError::DisallowedExpression { .. }));

        let bad_op = SelectOptions::from_json(&json!({"orderBy": {
            "operator": {"type": "SqlBinOp", "name": ";--", "args": ["field", "target"]},
            "target": 1, "field": "x"
        }}))
        .unwrap();
        assert!(bad_op.compile(&mut ParamStack::new(Dialect::Sqlite)).is_err());
    }

    #[test]
    fn test_projection() {
        let opts = SelectOptions::from_json(&json!({"fields": ["id", "first name"]})).unwrap();
        assert_eq!(opts.projection().unwrap(), "\"id\", \"firstname\"");
    }

    #[test]
    fn test_deserialize() {
        let opts: SelectOptions = serde_json::from_value(json!({"orderBy": "id", "limit": 2})).unwrap();
        assert_eq!(opts.order_by, Some(OrderBy::Field("id".to_string())));
        assert_eq!(opts.limit, Some(2));
    }
}
