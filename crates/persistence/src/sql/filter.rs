//! Filter expressions.
//!
//! A [`Where`] is a conjunction of clauses. It can be built in code or parsed
//! from the JSON shape used by callers:
//!
//! ```json
//! {
//!   "author": "Leo Tolstoy",
//!   "pages": {"gt": 500, "equal": true},
//!   "id": {"in": [1, 2, 3]},
//!   "or": [{"genre": "novel"}, {"genre": {"ilike": "epic"}}],
//!   "deleted_at": null,
//!   "isbn": {"not": null},
//!   "title": {"slugify": "war-and-peace"},
//!   "code": {"regex": "^[A-Z]{3}$"},
//!   "eq": [{"field": "owner"}, "alice"]
//! }
//! ```
//!
//! Field-level `{"or": [...]}` lists alternatives for one field; a top-level
//! `"or"` key lists alternative sub-filters. The two are different clauses.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::value::SqlValue;
use crate::error::FilterError;

/// A conjunction of filter clauses, compiled in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    clauses: Vec<Clause>,
}

/// One conjunct of a [`Where`].
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// A condition on one field.
    Field {
        /// Column name, optionally qualified as `table.column`.
        field: String,
        /// The condition the column must satisfy.
        condition: Condition,
    },
    /// At least one sub-filter holds.
    Or(Vec<Where>),
    /// Every sub-filter holds.
    And(Vec<Where>),
    /// The sub-filter does not hold.
    Not(Box<Where>),
    /// Full-text match over a set of text columns.
    FullText(FullTextQuery),
    /// Two operands are equal; a null operand means `IS NULL`.
    Equals(Operand, Operand),
    /// Matches no rows.
    False,
}

/// One side of a [`Clause::Equals`].
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A column reference, `{"field": "name"}` in JSON.
    Column(String),
    /// A bound value.
    Value(SqlValue),
}

/// A condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Equality; [`SqlValue::Null`] means `IS NULL`.
    Eq(SqlValue),
    /// `IS NOT NULL`.
    IsNotNull,
    /// Membership; an empty list matches no rows.
    In(Vec<SqlValue>),
    /// Non-membership; an empty list matches every row.
    NotIn(Vec<SqlValue>),
    /// Any of the alternatives holds (field-level `or`).
    AnyOf(Vec<Condition>),
    /// All of the conditions hold (array value).
    AllOf(Vec<Condition>),
    /// Lower and/or upper bound.
    Range(Range),
    /// Case-insensitive substring match.
    ILike(String),
    /// The column, lowercased with spaces turned into `-`, equals the slug.
    Slugify(String),
    /// Regular-expression match.
    Regex(String),
    /// Membership in a sub-select.
    InSelect(Box<SubSelect>),
    /// Conditions on values inside a JSON column.
    Json(JsonCondition),
    /// Negation of another condition.
    Not(Box<Condition>),
}

/// Bounds for [`Condition::Range`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Range {
    /// Exclusive lower bound, inclusive when `equal` is set.
    pub gt: Option<SqlValue>,
    /// Exclusive upper bound, inclusive when `equal` is set.
    pub lt: Option<SqlValue>,
    /// Makes both bounds inclusive.
    pub equal: bool,
    /// Compares calendar dates only.
    pub day_only: bool,
}

/// `field IN (SELECT ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubSelect {
    /// Table selected from.
    pub table: String,
    /// Column selected (or joined on, with `through`).
    pub field: String,
    /// Filter applied inside the sub-select.
    pub filter: Where,
    /// Tenant whose namespace holds `table`; defaults to the current one.
    pub tenant: Option<String>,
    /// Intermediate table to join through.
    pub through: Option<String>,
    /// Key of the intermediate table; defaults to `id`.
    pub through_pk: Option<String>,
    /// Column of `table` to return when joining through.
    pub val_field: Option<String>,
}

impl SubSelect {
    /// A plain sub-select of `field` from `table`.
    pub fn new(table: impl Into<String>, field: impl Into<String>, filter: Where) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            filter,
            tenant: None,
            through: None,
            through_pk: None,
            val_field: None,
        }
    }
}

/// Conditions on a JSON column.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonCondition {
    /// The value at `path` equals `value`.
    Path {
        /// Path as a list of keys and array indices.
        path: Vec<JsonPathElem>,
        /// Expected value, compared as text.
        value: SqlValue,
    },
    /// Conditions on top-level keys.
    Keys(Vec<(String, JsonKeyCondition)>),
}

/// A key or array index in a JSON path.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonPathElem {
    /// Object key.
    Key(String),
    /// Array index.
    Index(u64),
}

/// A condition on one key of a JSON column.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonKeyCondition {
    /// Equality, compared as text.
    Eq(SqlValue),
    /// Case-insensitive substring match.
    ILike(String),
    /// Inclusive bounds, compared as JSON values.
    Between {
        /// Inclusive lower bound.
        gte: Option<SqlValue>,
        /// Inclusive upper bound.
        lte: Option<SqlValue>,
    },
}

/// A full-text search clause.
#[derive(Debug, Clone, PartialEq)]
pub struct FullTextQuery {
    /// The search term.
    pub term: String,
    /// Text columns searched.
    pub fields: Vec<String>,
    /// Table the columns belong to, for qualified references.
    pub table: Option<String>,
    /// Text search configuration; defaults to `english`.
    pub language: Option<String>,
    /// Parse the term with `websearch_to_tsquery`.
    pub use_websearch: bool,
}

impl FullTextQuery {
    /// A search for `term` over `fields`.
    pub fn new<I, S>(term: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            term: term.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            table: None,
            language: None,
            use_websearch: false,
        }
    }
}

impl Where {
    /// An empty filter, matching every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the clauses in order.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Returns `true` if there are no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Adds a clause.
    pub fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Adds a condition on `field`.
    pub fn field(self, field: impl Into<String>, condition: Condition) -> Self {
        self.clause(Clause::Field {
            field: field.into(),
            condition,
        })
    }

    /// `field = value`, or `field IS NULL` for a null value.
    pub fn eq(self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.field(field, Condition::Eq(value.into()))
    }

    /// `field IS NOT NULL`.
    pub fn not_null(self, field: impl Into<String>) -> Self {
        self.field(field, Condition::IsNotNull)
    }

    /// `field IN (...)`.
    pub fn is_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.field(
            field,
            Condition::In(values.into_iter().map(Into::into).collect()),
        )
    }

    /// `NOT (field IN (...))`.
    pub fn not_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.field(
            field,
            Condition::NotIn(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Case-insensitive substring match.
    pub fn ilike(self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.field(field, Condition::ILike(needle.into()))
    }

    /// `field > value`.
    pub fn gt(self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.field(
            field,
            Condition::Range(Range {
                gt: Some(value.into()),
                ..Default::default()
            }),
        )
    }

    /// `field < value`.
    pub fn lt(self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.field(
            field,
            Condition::Range(Range {
                lt: Some(value.into()),
                ..Default::default()
            }),
        )
    }

    /// `field` matches the regular expression `pattern`.
    pub fn regex(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.field(field, Condition::Regex(pattern.into()))
    }

    /// `left = right`.
    pub fn equals(self, left: Operand, right: Operand) -> Self {
        self.clause(Clause::Equals(left, right))
    }

    /// Any of `alternatives` holds.
    pub fn or(self, alternatives: Vec<Where>) -> Self {
        self.clause(Clause::Or(alternatives))
    }

    /// `inner` does not hold.
    pub fn not(self, inner: Where) -> Self {
        self.clause(Clause::Not(Box::new(inner)))
    }

    /// Full-text match.
    pub fn full_text(self, query: FullTextQuery) -> Self {
        self.clause(Clause::FullText(query))
    }

    /// Rewrites every field reference to `alias.field`.
    ///
    /// Used when the filter runs inside a join whose columns must be qualified.
    pub fn prefixed(&self, alias: &str) -> Where {
        let prefix = |field: &str| format!("{}.{}", alias, field);
        Where {
            clauses: self
                .clauses
                .iter()
                .map(|clause| match clause {
                    Clause::Field { field, condition } => Clause::Field {
                        field: prefix(field),
                        condition: condition.clone(),
                    },
                    Clause::Or(subs) => Clause::Or(subs.iter().map(|w| w.prefixed(alias)).collect()),
                    Clause::And(subs) => {
                        Clause::And(subs.iter().map(|w| w.prefixed(alias)).collect())
                    }
                    Clause::Not(inner) => Clause::Not(Box::new(inner.prefixed(alias))),
                    Clause::FullText(q) => Clause::FullText(FullTextQuery {
                        table: q.table.clone().or_else(|| Some(alias.to_string())),
                        ..q.clone()
                    }),
                    Clause::Equals(left, right) => {
                        let prefix_operand = |operand: &Operand| match operand {
                            Operand::Column(field) => Operand::Column(prefix(field)),
                            value => value.clone(),
                        };
                        Clause::Equals(prefix_operand(left), prefix_operand(right))
                    }
                    Clause::False => Clause::False,
                })
                .collect(),
        }
    }

    /// Parses the JSON filter shape.
    pub fn from_json(value: &Value) -> Result<Where, FilterError> {
        match value {
            Value::Null => Ok(Where::new()),
            Value::Object(map) => parse_where(map),
            other => Err(FilterError::malformed(format!(
                "filter must be a JSON object, got {}",
                other
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Where {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Where::from_json(&value).map_err(serde::de::Error::custom)
    }
}

fn parse_where(map: &Map<String, Value>) -> Result<Where, FilterError> {
    let mut filter = Where::new();
    for (key, value) in map {
        let clause = match key.as_str() {
            "or" => Clause::Or(parse_where_list(key, value)?),
            "and" => Clause::And(parse_where_list(key, value)?),
            "not" => match value {
                Value::Object(inner) => Clause::Not(Box::new(parse_where(inner)?)),
                other => {
                    return Err(FilterError::malformed(format!(
                        "'not' expects an object, got {}",
                        other
                    )));
                }
            },
            "_fts" => Clause::FullText(parse_full_text(value)?),
            "eq" if value.is_array() => parse_equals(value)?,
            "_false" => {
                if is_truthy(value) {
                    Clause::False
                } else {
                    continue;
                }
            }
            field => Clause::Field {
                field: field.to_string(),
                condition: parse_condition(field, value)?,
            },
        };
        filter.clauses.push(clause);
    }
    Ok(filter)
}

fn parse_equals(value: &Value) -> Result<Clause, FilterError> {
    let operand = |v: &Value| match v {
        Value::Object(obj) if obj.len() == 1 && obj.contains_key("field") => obj["field"]
            .as_str()
            .map(|f| Operand::Column(f.to_string()))
            .ok_or_else(|| FilterError::malformed("'eq' column reference must be a string")),
        other => Ok(Operand::Value(other.into())),
    };
    match value.as_array().map(Vec::as_slice) {
        Some([left, right]) => Ok(Clause::Equals(operand(left)?, operand(right)?)),
        _ => Err(FilterError::malformed("'eq' expects an array of two operands")),
    }
}

fn parse_where_list(key: &str, value: &Value) -> Result<Vec<Where>, FilterError> {
    let items = value.as_array().ok_or_else(|| {
        FilterError::malformed(format!("'{}' expects an array of filters", key))
    })?;
    items.iter().map(Where::from_json).collect()
}

fn parse_condition(field: &str, value: &Value) -> Result<Condition, FilterError> {
    match value {
        Value::Array(items) => Ok(Condition::AllOf(
            items
                .iter()
                .map(|item| parse_condition(field, item))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(ops) => parse_operator(field, ops),
        scalar => Ok(Condition::Eq(scalar.into())),
    }
}

fn parse_operator(field: &str, ops: &Map<String, Value>) -> Result<Condition, FilterError> {
    if ops.is_empty() {
        return Err(FilterError::malformed(format!(
            "empty operator object on field '{}'",
            field
        )));
    }

    let only = |allowed: &[&str]| -> Result<(), FilterError> {
        match ops.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(unknown) => Err(FilterError::UnknownOperator {
                field: field.to_string(),
                operator: unknown.clone(),
            }),
            None => Ok(()),
        }
    };

    if let Some(values) = ops.get("in") {
        only(&["in"])?;
        return Ok(Condition::In(parse_value_list(field, "in", values)?));
    }
    if let Some(alternatives) = ops.get("or") {
        only(&["or"])?;
        let items = alternatives.as_array().ok_or_else(|| {
            FilterError::malformed(format!("'or' on field '{}' expects an array", field))
        })?;
        return Ok(Condition::AnyOf(
            items
                .iter()
                .map(|item| parse_condition(field, item))
                .collect::<Result<_, _>>()?,
        ));
    }
    if let Some(negated) = ops.get("not") {
        only(&["not"])?;
        return Ok(match negated {
            Value::Null => Condition::IsNotNull,
            Value::Object(inner) if inner.len() == 1 && inner.contains_key("in") => {
                Condition::NotIn(parse_value_list(field, "not.in", &inner["in"])?)
            }
            other => Condition::Not(Box::new(parse_condition(field, other)?)),
        });
    }
    if ops.contains_key("gt") || ops.contains_key("lt") {
        only(&["gt", "lt", "equal", "day_only"])?;
        return Ok(Condition::Range(Range {
            gt: ops.get("gt").map(SqlValue::from),
            lt: ops.get("lt").map(SqlValue::from),
            equal: ops.get("equal").is_some_and(is_truthy),
            day_only: ops.get("day_only").is_some_and(is_truthy),
        }));
    }
    if let Some(needle) = ops.get("ilike") {
        only(&["ilike"])?;
        return Ok(Condition::ILike(scalar_text(field, "ilike", needle)?));
    }
    if let Some(slug) = ops.get("slugify") {
        only(&["slugify"])?;
        return Ok(Condition::Slugify(scalar_text(field, "slugify", slug)?));
    }
    if let Some(pattern) = ops.get("regex") {
        only(&["regex"])?;
        return Ok(Condition::Regex(scalar_text(field, "regex", pattern)?));
    }
    if let Some(sub) = ops.get("inSelect") {
        only(&["inSelect"])?;
        return Ok(Condition::InSelect(Box::new(parse_sub_select(field, sub)?)));
    }
    if let Some(json) = ops.get("json") {
        only(&["json"])?;
        return Ok(Condition::Json(parse_json_condition(field, json)?));
    }

    // No recognized operator: report the first key.
    only(&[])?;
    Err(FilterError::malformed(format!(
        "no operator on field '{}'",
        field
    )))
}

fn parse_value_list(field: &str, op: &str, value: &Value) -> Result<Vec<SqlValue>, FilterError> {
    match value {
        Value::Array(items) => Ok(items.iter().map(SqlValue::from).collect()),
        other => Err(FilterError::malformed(format!(
            "'{}' on field '{}' expects an array, got {}",
            op, field, other
        ))),
    }
}

fn scalar_text(field: &str, op: &str, value: &Value) -> Result<String, FilterError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(FilterError::malformed(format!(
            "'{}' on field '{}' expects a scalar, got {}",
            op, field, other
        ))),
    }
}

fn required_str(obj: &Map<String, Value>, key: &str, context: &str) -> Result<String, FilterError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FilterError::malformed(format!("{} requires a string '{}'", context, key)))
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_sub_select(field: &str, value: &Value) -> Result<SubSelect, FilterError> {
    let obj = value.as_object().ok_or_else(|| {
        FilterError::malformed(format!("'inSelect' on field '{}' expects an object", field))
    })?;
    if let Some(unknown) = obj.keys().find(|k| {
        !matches!(
            k.as_str(),
            "table" | "field" | "where" | "tenant" | "through" | "through_pk" | "valField"
        )
    }) {
        return Err(FilterError::UnknownOperator {
            field: field.to_string(),
            operator: format!("inSelect.{}", unknown),
        });
    }

    Ok(SubSelect {
        table: required_str(obj, "table", "inSelect")?,
        field: required_str(obj, "field", "inSelect")?,
        filter: obj.get("where").map(Where::from_json).transpose()?.unwrap_or_default(),
        tenant: optional_str(obj, "tenant"),
        through: optional_str(obj, "through"),
        through_pk: optional_str(obj, "through_pk"),
        val_field: optional_str(obj, "valField"),
    })
}

fn parse_json_path(value: &Value) -> Result<Vec<JsonPathElem>, FilterError> {
    let elem = |v: &Value| match v {
        Value::String(s) => Ok(JsonPathElem::Key(s.clone())),
        Value::Number(n) => n
            .as_u64()
            .map(JsonPathElem::Index)
            .ok_or_else(|| FilterError::malformed(format!("invalid JSON path index {}", n))),
        other => Err(FilterError::malformed(format!(
            "invalid JSON path element {}",
            other
        ))),
    };
    match value {
        Value::Array(items) => items.iter().map(elem).collect(),
        single => Ok(vec![elem(single)?]),
    }
}

fn parse_json_condition(field: &str, value: &Value) -> Result<JsonCondition, FilterError> {
    match value {
        Value::Array(pair) if pair.len() == 2 => Ok(JsonCondition::Path {
            path: parse_json_path(&pair[0])?,
            value: SqlValue::from(&pair[1]),
        }),
        Value::Object(keys) => {
            let mut conditions = Vec::with_capacity(keys.len());
            for (key, cond) in keys {
                let parsed = match cond {
                    Value::Object(ops) if ops.contains_key("ilike") => {
                        JsonKeyCondition::ILike(scalar_text(field, "json.ilike", &ops["ilike"])?)
                    }
                    Value::Object(ops) if ops.contains_key("gte") || ops.contains_key("lte") => {
                        JsonKeyCondition::Between {
                            gte: ops.get("gte").map(SqlValue::from),
                            lte: ops.get("lte").map(SqlValue::from),
                        }
                    }
                    Value::Object(ops) => {
                        return Err(FilterError::UnknownOperator {
                            field: field.to_string(),
                            operator: format!(
                                "json.{}",
                                ops.keys().next().map(String::as_str).unwrap_or("{}")
                            ),
                        });
                    }
                    scalar => JsonKeyCondition::Eq(scalar.into()),
                };
                conditions.push((key.clone(), parsed));
            }
            Ok(JsonCondition::Keys(conditions))
        }
        other => Err(FilterError::malformed(format!(
            "'json' on field '{}' expects [path, value] or an object, got {}",
            field, other
        ))),
    }
}

fn parse_full_text(value: &Value) -> Result<FullTextQuery, FilterError> {
    let obj = value
        .as_object()
        .ok_or_else(|| FilterError::malformed("'_fts' expects an object"))?;
    let term = required_str(obj, "searchTerm", "_fts")?;
    let fields = match obj.get("fields") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok(name.clone()),
                Value::Object(f) => required_str(f, "name", "_fts field"),
                other => Err(FilterError::malformed(format!(
                    "invalid _fts field {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
        Some(other) => {
            return Err(FilterError::malformed(format!(
                "'_fts.fields' expects an array, got {}",
                other
            )));
        }
    };
    Ok(FullTextQuery {
        term,
        fields,
        table: optional_str(obj, "table"),
        language: optional_str(obj, "language"),
        use_websearch: obj.get("use_websearch").is_some_and(is_truthy),
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_condition(filter: &Where, index: usize) -> &Condition {
        match &filter.clauses()[index] {
            Clause::Field { condition, .. } => condition,
            other => panic!("expected field clause, got {:?}", other),
        }
    }

    #[test]
    fn test_scalar_equality_and_null() {
        let filter = Where::from_json(&json!({"author": "Tolstoy", "deleted": null})).unwrap();
        assert_eq!(
            field_condition(&filter, 0),
            &Condition::Eq(SqlValue::Text("Tolstoy".to_string()))
        );
        assert_eq!(field_condition(&filter, 1), &Condition::Eq(SqlValue::Null));
    }

    #[test]
    fn test_key_order_preserved() {
        let filter = Where::from_json(&json!({"z": 1, "a": 2, "m": 3})).unwrap();
        let names: Vec<_> = filter
            .clauses()
            .iter()
            .map(|c| match c {
                Clause::Field { field, .. } => field.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_not_null_sentinel_and_not_in() {
        let filter =
            Where::from_json(&json!({"isbn": {"not": null}, "id": {"not": {"in": [1, 2]}}}))
                .unwrap();
        assert_eq!(field_condition(&filter, 0), &Condition::IsNotNull);
        assert_eq!(
            field_condition(&filter, 1),
            &Condition::NotIn(vec![SqlValue::Int(1), SqlValue::Int(2)])
        );
    }

    #[test]
    fn test_field_level_or_vs_top_level_or() {
        let field_or = Where::from_json(&json!({"genre": {"or": ["a", {"ilike": "b"}]}})).unwrap();
        assert!(matches!(field_condition(&field_or, 0), Condition::AnyOf(alts) if alts.len() == 2));

        let top_or = Where::from_json(&json!({"or": [{"a": 1}, {"b": 2}]})).unwrap();
        assert!(matches!(&top_or.clauses()[0], Clause::Or(subs) if subs.len() == 2));
    }

    #[test]
    fn test_range_with_flags() {
        let filter =
            Where::from_json(&json!({"d": {"gt": "2024-01-01", "lt": "2024-02-01", "day_only": true}}))
                .unwrap();
        assert_eq!(
            field_condition(&filter, 0),
            &Condition::Range(Range {
                gt: Some(SqlValue::Text("2024-01-01".to_string())),
                lt: Some(SqlValue::Text("2024-02-01".to_string())),
                equal: false,
                day_only: true,
            })
        );
    }

    #[test]
    fn test_array_value_is_all_of() {
        let filter = Where::from_json(&json!({"pages": [{"gt": 1}, {"lt": 9}]})).unwrap();
        assert!(matches!(field_condition(&filter, 0), Condition::AllOf(c) if c.len() == 2));
    }

    #[test]
    fn test_unknown_operator_fails_fast() {
        let err = Where::from_json(&json!({"age": {"between": [1, 2]}})).unwrap_err();
        assert_eq!(
            err,
            FilterError::UnknownOperator {
                field: "age".to_string(),
                operator: "between".to_string()
            }
        );

        let err = Where::from_json(&json!({"age": {"gt": 1, "lte": 5}})).unwrap_err();
        assert!(matches!(err, FilterError::UnknownOperator { operator, .. } if operator == "lte"));
    }

    #[test]
    fn test_in_requires_array() {
        assert!(matches!(
            Where::from_json(&json!({"id": {"in": 5}})),
            Err(FilterError::Malformed { .. })
        ));
    }

    #[test]
    fn test_in_select_parsing() {
        let filter = Where::from_json(&json!({
            "author_id": {"inSelect": {
                "table": "authors", "field": "id", "where": {"country": "RU"}, "tenant": "acme"
            }}
        }))
        .unwrap();
        match field_condition(&filter, 0) {
            Condition::InSelect(sub) => {
                assert_eq!(sub.table, "authors");
                assert_eq!(sub.tenant.as_deref(), Some("acme"));
                assert_eq!(sub.filter.clauses().len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_json_conditions() {
        let path = Where::from_json(&json!({"meta": {"json": [["tags", 0], "war"]}})).unwrap();
        assert_eq!(
            field_condition(&path, 0),
            &Condition::Json(JsonCondition::Path {
                path: vec![JsonPathElem::Key("tags".to_string()), JsonPathElem::Index(0)],
                value: SqlValue::Text("war".to_string()),
            })
        );

        let keys =
            Where::from_json(&json!({"meta": {"json": {"lang": "ru", "year": {"gte": 1860}}}}))
                .unwrap();
        assert!(matches!(
            field_condition(&keys, 0),
            Condition::Json(JsonCondition::Keys(k)) if k.len() == 2
        ));
    }

    #[test]
    fn test_fts_and_false() {
        let filter = Where::from_json(&json!({
            "_fts": {"searchTerm": "peace", "fields": ["title", {"name": "blurb"}]},
            "_false": true
        }))
        .unwrap();
        match &filter.clauses()[0] {
            Clause::FullText(q) => assert_eq!(q.fields, vec!["title", "blurb"]),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(filter.clauses()[1], Clause::False);

        let skipped = Where::from_json(&json!({"_false": false})).unwrap();
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_top_level_must_be_object() {
        assert!(Where::from_json(&json!([1, 2])).is_err());
        assert!(Where::from_json(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_deserialize_impl() {
        let filter: Where = serde_json::from_value(json!({"id": {"in": []}})).unwrap();
        assert_eq!(field_condition(&filter, 0), &Condition::In(vec![]));
        assert!(serde_json::from_value::<Where>(json!({"id": {"nope": 1}})).is_err());
    }

    #[test]
    fn test_prefixed_rewrites_fields() {
        let filter = Where::new().eq("name", "x").or(vec![Where::new().eq("age", 3)]);
        let prefixed = filter.prefixed("ss2");
        assert!(matches!(&prefixed.clauses()[0], Clause::Field { field, .. } if field == "ss2.name"));
        match &prefixed.clauses()[1] {
            Clause::Or(subs) => assert!(
                matches!(&subs[0].clauses()[0], Clause::Field { field, .. } if field == "ss2.age")
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parses_leaf_operators() {
        let filter = Where::from_json(&json!({
            "title": {"slugify": "war-and-peace"},
            "code": {"regex": "^A"},
            "eq": [{"field": "owner"}, 7]
        }))
        .unwrap();
        assert_eq!(field_condition(&filter, 0), &Condition::Slugify("war-and-peace".into()));
        assert_eq!(field_condition(&filter, 1), &Condition::Regex("^A".into()));
        assert_eq!(
            filter.clauses()[2],
            Clause::Equals(Operand::Column("owner".into()), Operand::Value(SqlValue::Int(7)))
        );
        assert!(matches!(
            Where::from_json(&json!({"code": {"regex": "^A", "x": 1}})),
            Err(FilterError::UnknownOperator { .. })
        ));

        let prefixed = Where::new()
            .equals(Operand::Column("a".into()), Operand::Value(SqlValue::Int(1)))
            .prefixed("ss2");
        assert_eq!(
            prefixed.clauses()[0],
            Clause::Equals(Operand::Column("ss2.a".into()), Operand::Value(SqlValue::Int(1)))
        );
    }
}
