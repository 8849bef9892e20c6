//! Compiles [`Where`] filters to SQL predicates.
//!
//! Values never appear in the generated SQL. Every value goes through the
//! [`ParamStack`], and every name goes through the identifier sanitizer.
//! The only dialect differences handled here are placeholder style, `ILIKE`
//! versus `LIKE`, date casts, JSON extraction, regular expressions, slugs,
//! full-text search and sub-select namespacing.
//!
//! SQLite has no built-in `REGEXP`; the SQLite engine registers one on every
//! connection it opens.

use serde_json::Value;

use super::dialect::{Dialect, NamespaceStyle, ParamStack, QueryScope};
use super::filter::{
    Clause, Condition, FullTextQuery, JsonCondition, JsonKeyCondition, JsonPathElem, Operand,
    Range, SubSelect, Where,
};
use super::ident::{quote_identifier, quote_qualified};
use super::value::SqlValue;
use crate::error::FilterError;
use crate::tenant::{TenantId, namespace_name};

/// Matches no rows. Used for empty `IN` lists and empty alternatives.
const MATCH_NONE: &str = "1 = 0";
/// Matches every row.
const MATCH_ALL: &str = "1 = 1";

/// Text search configurations accepted for `_fts`.
const FTS_LANGUAGES: &[&str] = &[
    "simple",
    "arabic",
    "armenian",
    "basque",
    "catalan",
    "danish",
    "dutch",
    "english",
    "finnish",
    "french",
    "german",
    "greek",
    "hindi",
    "hungarian",
    "indonesian",
    "irish",
    "italian",
    "lithuanian",
    "nepali",
    "norwegian",
    "portuguese",
    "romanian",
    "russian",
    "serbian",
    "spanish",
    "swedish",
    "tamil",
    "turkish",
    "yiddish",
];

const DEFAULT_FTS_LANGUAGE: &str = "english";

/// A compiled predicate and its bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledWhere {
    /// The predicate, without the `WHERE` keyword. Empty for an empty filter.
    pub sql: String,
    /// Bind values, in placeholder order.
    pub params: Vec<SqlValue>,
}

impl Where {
    /// Compiles the predicate, binding values onto `params`.
    ///
    /// Returns an empty string for an empty filter.
    pub fn compile(&self, scope: &QueryScope, params: &mut ParamStack) -> Result<String, FilterError> {
        WhereCompiler { scope, params }.conjunction(self)
    }

    /// Like [`compile`](Self::compile), but prefixed with `WHERE`.
    ///
    /// Returns an empty string for an empty filter.
    pub fn to_where_clause(
        &self,
        scope: &QueryScope,
        params: &mut ParamStack,
    ) -> Result<String, FilterError> {
        let predicate = self.compile(scope, params)?;
        if predicate.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("WHERE {}", predicate))
        }
    }

    /// Compiles against a fresh parameter stack.
    ///
    /// ```
    /// use quarry_persistence::sql::{Dialect, QueryScope, Where};
    /// use serde_json::json;
    ///
    /// let filter = Where::from_json(&json!({"author": "Tolstoy", "id": {"in": [1, 2]}})).unwrap();
    /// let compiled = filter.to_sql(&QueryScope::unqualified(Dialect::Postgres)).unwrap();
    /// assert_eq!(compiled.sql, "\"author\" = $1 AND \"id\" IN ($2, $3)");
    /// assert_eq!(compiled.params.len(), 3);
    /// ```
    pub fn to_sql(&self, scope: &QueryScope) -> Result<CompiledWhere, FilterError> {
        let mut params = scope.params();
        let sql = self.compile(scope, &mut params)?;
        Ok(CompiledWhere {
            sql,
            params: params.into_values(),
        })
    }
}

struct WhereCompiler<'a> {
    scope: &'a QueryScope,
    params: &'a mut ParamStack,
}

impl WhereCompiler<'_> {
    fn dialect(&self) -> Dialect {
        self.scope.dialect()
    }

    fn conjunction(&mut self, filter: &Where) -> Result<String, FilterError> {
        let parts = filter
            .clauses()
            .iter()
            .map(|clause| self.clause(clause))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join(" AND "))
    }

    /// A sub-filter as a self-contained, parenthesized predicate.
    fn group(&mut self, filter: &Where) -> Result<String, FilterError> {
        let sql = self.conjunction(filter)?;
        Ok(match filter.clauses().len() {
            0 => MATCH_ALL.to_string(),
            1 => sql,
            _ => format!("({})", sql),
        })
    }

    fn clause(&mut self, clause: &Clause) -> Result<String, FilterError> {
        match clause {
            Clause::Field { field, condition } => {
                let column = quote_qualified(field)?;
                self.condition(&column, condition)
            }
            Clause::Or(alternatives) => {
                if alternatives.is_empty() {
                    return Ok(MATCH_NONE.to_string());
                }
                let parts = alternatives
                    .iter()
                    .map(|alt| self.group(alt))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" OR ")))
            }
            Clause::And(conjuncts) => {
                if conjuncts.is_empty() {
                    return Ok(MATCH_ALL.to_string());
                }
                let parts = conjuncts
                    .iter()
                    .map(|sub| self.group(sub))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" AND ")))
            }
            Clause::Not(inner) => Ok(format!("NOT ({})", self.group(inner)?)),
            Clause::FullText(query) => self.full_text(query),
            Clause::Equals(left, right) => self.equals(left, right),
            Clause::False => Ok("FALSE".to_string()),
        }
    }

    fn condition(&mut self, column: &str, condition: &Condition) -> Result<String, FilterError> {
        match condition {
            Condition::Eq(SqlValue::Null) => Ok(format!("{} IS NULL", column)),
            Condition::Eq(value) => Ok(format!("{} = {}", column, self.params.bind(value.clone()))),
            Condition::IsNotNull => Ok(format!("{} IS NOT NULL", column)),
            Condition::In(values) => {
                if values.is_empty() {
                    return Ok(MATCH_NONE.to_string());
                }
                Ok(format!("{} IN ({})", column, self.bind_list(values)))
            }
            Condition::NotIn(values) => {
                if values.is_empty() {
                    return Ok(MATCH_ALL.to_string());
                }
                Ok(format!("NOT ({} IN ({}))", column, self.bind_list(values)))
            }
            Condition::AnyOf(alternatives) => {
                if alternatives.is_empty() {
                    return Ok(MATCH_NONE.to_string());
                }
                let parts = alternatives
                    .iter()
                    .map(|alt| self.condition(column, alt))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" OR ")))
            }
            Condition::AllOf(conditions) => match conditions.as_slice() {
                [] => Ok(MATCH_ALL.to_string()),
                [single] => self.condition(column, single),
                many => {
                    let parts = many
                        .iter()
                        .map(|c| self.condition(column, c))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(format!("({})", parts.join(" AND ")))
                }
            },
            Condition::Range(range) => Ok(self.range(column, range)),
            Condition::ILike(needle) => Ok(self.ilike(column, needle)),
            Condition::Slugify(slug) => Ok(self.slugify(column, slug)),
            Condition::Regex(pattern) => {
                let p = self.params.bind(pattern.as_str());
                Ok(match self.dialect() {
                    Dialect::Postgres => format!("{} ~ {}", column, p),
                    Dialect::Sqlite => format!("{} REGEXP {}", column, p),
                })
            }
            Condition::InSelect(sub) => self.in_select(column, sub),
            Condition::Json(json) => self.json(column, json),
            Condition::Not(inner) => Ok(format!("NOT ({})", self.condition(column, inner)?)),
        }
    }

    fn bind_list(&mut self, values: &[SqlValue]) -> String {
        values
            .iter()
            .map(|v| self.params.bind(v.clone()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn cast_date(&self, expr: &str, day_only: bool) -> String {
        match (day_only, self.dialect()) {
            (false, _) => expr.to_string(),
            (true, Dialect::Postgres) => format!("{}::date", expr),
            (true, Dialect::Sqlite) => format!("date({})", expr),
        }
    }

    fn range(&mut self, column: &str, range: &Range) -> String {
        let eq = if range.equal { "=" } else { "" };
        let lhs = self.cast_date(column, range.day_only);
        let mut parts = Vec::with_capacity(2);
        if let Some(lower) = &range.gt {
            let p = self.params.bind(lower.clone());
            parts.push(format!("{} >{} {}", lhs, eq, self.cast_date(&p, range.day_only)));
        }
        if let Some(upper) = &range.lt {
            let p = self.params.bind(upper.clone());
            parts.push(format!("{} <{} {}", lhs, eq, self.cast_date(&p, range.day_only)));
        }
        match parts.len() {
            0 => MATCH_ALL.to_string(),
            1 => parts.remove(0),
            _ => format!("({})", parts.join(" AND ")),
        }
    }

    fn like_operator(&self) -> &'static str {
        match self.dialect() {
            Dialect::Postgres => "ILIKE",
            // LIKE is case-insensitive for ASCII on SQLite
            Dialect::Sqlite => "LIKE",
        }
    }

    fn ilike(&mut self, expr: &str, needle: &str) -> String {
        let p = self.params.bind(needle);
        format!("{} {} '%' || {} || '%'", expr, self.like_operator(), p)
    }

    fn slugify(&mut self, column: &str, slug: &str) -> String {
        let p = self.params.bind(slug);
        match self.dialect() {
            Dialect::Postgres => format!(
                "REGEXP_REPLACE(REPLACE(LOWER({}), ' ', '-'), '[^\\w-]', '', 'g') = {}",
                column, p
            ),
            Dialect::Sqlite => format!("REPLACE(LOWER({}), ' ', '-') = {}", column, p),
        }
    }

    fn equals(&mut self, left: &Operand, right: &Operand) -> Result<String, FilterError> {
        let is_null = |operand: &Operand| matches!(operand, Operand::Value(SqlValue::Null));
        match (is_null(left), is_null(right)) {
            (true, true) => Ok(MATCH_ALL.to_string()),
            (true, false) => Ok(format!("{} IS NULL", self.operand(right)?)),
            (false, true) => Ok(format!("{} IS NULL", self.operand(left)?)),
            (false, false) => {
                let left = self.operand(left)?;
                Ok(format!("{} = {}", left, self.operand(right)?))
            }
        }
    }

    /// A column reference, or a bound value typed explicitly on PostgreSQL
    /// since a bare `$1 = $2` leaves both parameter types undetermined.
    fn operand(&mut self, operand: &Operand) -> Result<String, FilterError> {
        match operand {
            Operand::Column(field) => quote_qualified(field),
            Operand::Value(value) => {
                let p = self.params.bind(value.clone());
                let cast = match (self.dialect(), value) {
                    (Dialect::Sqlite, _) | (_, SqlValue::Null) => "",
                    (Dialect::Postgres, SqlValue::Bool(_)) => "::boolean",
                    (Dialect::Postgres, SqlValue::Int(_)) => "::bigint",
                    (Dialect::Postgres, SqlValue::Float(_)) => "::float8",
                    (Dialect::Postgres, SqlValue::Text(_)) => "::text",
                    (Dialect::Postgres, SqlValue::Json(_)) => "::jsonb",
                    (Dialect::Postgres, SqlValue::Timestamp(_)) => "::timestamptz",
                };
                Ok(format!("{}{}", p, cast))
            }
        }
    }

    fn in_select(&mut self, column: &str, sub: &SubSelect) -> Result<String, FilterError> {
        let inner_scope = match (&sub.tenant, self.scope.style()) {
            (Some(tenant), NamespaceStyle::Schema) => {
                let tenant = TenantId::new(tenant.as_str());
                if tenant.is_root() {
                    self.scope.root()
                } else {
                    let namespace = namespace_name(tenant.as_str())
                        .map_err(|e| FilterError::malformed(e.to_string()))?;
                    self.scope.with_namespace(namespace)
                }
            }
            _ => self.scope.clone(),
        };
        let table = inner_scope.table(&sub.table)?;

        match (&sub.through, &sub.val_field) {
            (Some(through), Some(val_field)) => {
                let through_table = inner_scope.table(through)?;
                let through_pk = quote_identifier(sub.through_pk.as_deref().unwrap_or("id"))?;
                let inner = sub.filter.prefixed("ss2");
                let mut compiler = WhereCompiler {
                    scope: &inner_scope,
                    params: &mut *self.params,
                };
                let predicate = compiler.conjunction(&inner)?;
                Ok(format!(
                    "{} IN (SELECT ss1.{} FROM {} ss1 JOIN {} ss2 ON ss2.{} = ss1.{}{})",
                    column,
                    quote_identifier(val_field)?,
                    table,
                    through_table,
                    through_pk,
                    quote_identifier(&sub.field)?,
                    where_suffix(&predicate)
                ))
            }
            _ => {
                let mut compiler = WhereCompiler {
                    scope: &inner_scope,
                    params: &mut *self.params,
                };
                let predicate = compiler.conjunction(&sub.filter)?;
                Ok(format!(
                    "{} IN (SELECT {} FROM {}{})",
                    column,
                    quote_identifier(&sub.field)?,
                    table,
                    where_suffix(&predicate)
                ))
            }
        }
    }

    /// Extraction of the value at `path`. With `as_text`, PostgreSQL yields
    /// the value as text; otherwise as `jsonb`.
    fn json_extract(&mut self, column: &str, path: &[JsonPathElem], as_text: bool) -> String {
        let path = self.params.bind(json_path(path));
        match self.dialect() {
            Dialect::Postgres if as_text => {
                format!("jsonb_path_query_first({}, {}::jsonpath) #>> '{{}}'", column, path)
            }
            Dialect::Postgres => format!("jsonb_path_query_first({}, {}::jsonpath)", column, path),
            Dialect::Sqlite => format!("json_extract({}, {})", column, path),
        }
    }

    fn json_value(&mut self, value: &SqlValue) -> String {
        let p = self.params.bind(value.clone());
        match self.dialect() {
            Dialect::Postgres => format!("{}::jsonb", p),
            Dialect::Sqlite => p,
        }
    }

    fn json(&mut self, column: &str, condition: &JsonCondition) -> Result<String, FilterError> {
        match condition {
            JsonCondition::Path { path, value } => {
                let lhs = self.json_extract(column, path, true);
                Ok(format!("{} = {}", lhs, self.params.bind(value.clone())))
            }
            JsonCondition::Keys(keys) => {
                if keys.is_empty() {
                    return Ok(MATCH_ALL.to_string());
                }
                let mut parts = Vec::with_capacity(keys.len());
                for (key, cond) in keys {
                    let path = [JsonPathElem::Key(key.clone())];
                    match cond {
                        JsonKeyCondition::Eq(value) => {
                            let lhs = self.json_extract(column, &path, true);
                            parts.push(format!("{} = {}", lhs, self.params.bind(value.clone())));
                        }
                        JsonKeyCondition::ILike(needle) => {
                            let lhs = self.json_extract(column, &path, true);
                            parts.push(self.ilike(&lhs, needle));
                        }
                        JsonKeyCondition::Between { gte, lte } => {
                            if let Some(lower) = gte {
                                let lhs = self.json_extract(column, &path, false);
                                parts.push(format!("{} >= {}", lhs, self.json_value(lower)));
                            }
                            if let Some(upper) = lte {
                                let lhs = self.json_extract(column, &path, false);
                                parts.push(format!("{} <= {}", lhs, self.json_value(upper)));
                            }
                        }
                    }
                }
                Ok(match parts.len() {
                    0 => MATCH_ALL.to_string(),
                    1 => parts.remove(0),
                    _ => format!("({})", parts.join(" AND ")),
                })
            }
        }
    }

    fn full_text(&mut self, query: &FullTextQuery) -> Result<String, FilterError> {
        let columns = fts_columns(query)?;
        match self.dialect() {
            // No ranking on SQLite, just a substring match over the columns.
            Dialect::Sqlite => {
                let p = self.params.bind(query.term.as_str());
                Ok(format!("{} LIKE '%' || {} || '%'", columns, p))
            }
            Dialect::Postgres => {
                let language = fts_language(query.language.as_deref())?;
                let prefix_match = !query.term.contains(' ');
                let (function, term) = if query.use_websearch {
                    ("websearch_to_tsquery", query.term.clone())
                } else if prefix_match {
                    ("to_tsquery", format!("{}:*", query.term))
                } else {
                    ("plainto_tsquery", query.term.clone())
                };
                let p = self.params.bind(term);
                Ok(format!(
                    "to_tsvector('{lang}', {columns}) @@ {function}('{lang}', {p})",
                    lang = language,
                ))
            }
        }
    }
}

fn where_suffix(predicate: &str) -> String {
    if predicate.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicate)
    }
}

/// `coalesce(col,'')` for each column, sorted and joined with spaces.
pub(crate) fn fts_columns(query: &FullTextQuery) -> Result<String, FilterError> {
    let table = query.table.as_deref().map(quote_identifier).transpose()?;
    let mut columns = query
        .fields
        .iter()
        .map(|field| {
            let column = quote_identifier(field)?;
            Ok(match &table {
                Some(t) => format!("coalesce({}.{},'')", t, column),
                None => format!("coalesce({},'')", column),
            })
        })
        .collect::<Result<Vec<_>, FilterError>>()?;
    if columns.is_empty() {
        return Ok("''".to_string());
    }
    columns.sort();
    Ok(columns.join(" || ' ' || "))
}

/// Validates a text search configuration name against the allow-list.
pub(crate) fn fts_language(language: Option<&str>) -> Result<&'static str, FilterError> {
    let requested = language.unwrap_or(DEFAULT_FTS_LANGUAGE).to_ascii_lowercase();
    FTS_LANGUAGES
        .iter()
        .copied()
        .find(|l| *l == requested)
        .ok_or_else(|| FilterError::UnsupportedLanguage {
            language: requested,
        })
}

/// Renders a JSON path: `$.key`, `$."odd key"`, `$[0]`.
///
/// A single key that is already a path (`$.a.b`, `$[0]`) is passed through.
fn json_path(path: &[JsonPathElem]) -> String {
    if let [JsonPathElem::Key(raw)] = path
        && (raw.starts_with("$.") || raw.starts_with("$["))
    {
        return raw.clone();
    }
    let mut rendered = String::from("$");
    for elem in path {
        match elem {
            JsonPathElem::Index(i) => rendered.push_str(&format!("[{}]", i)),
            JsonPathElem::Key(key) if is_plain_key(key) => {
                rendered.push('.');
                rendered.push_str(key);
            }
            JsonPathElem::Key(key) => {
                rendered.push('.');
                rendered.push_str(&Value::String(key.clone()).to_string());
            }
        }
    }
    rendered
}

fn is_plain_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pg() -> QueryScope {
        QueryScope::new(Dialect::Postgres, NamespaceStyle::Schema, "public", "public")
    }

    fn lite() -> QueryScope {
        QueryScope::new(Dialect::Sqlite, NamespaceStyle::Prefix, "public", "public")
    }

    fn compile(scope: &QueryScope, filter: serde_json::Value) -> CompiledWhere {
        Where::from_json(&filter).unwrap().to_sql(scope).unwrap()
    }

    fn placeholder_count(sql: &str, dialect: Dialect) -> usize {
        match dialect {
            Dialect::Sqlite => sql.matches('?').count(),
            Dialect::Postgres => {
                let mut count = 0;
                let bytes = sql.as_bytes();
                for i in 0..bytes.len() {
                    if bytes[i] == b'$' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) {
                        count += 1;
                    }
                }
                count
            }
        }
    }

    #[test]
    fn test_empty_filter_compiles_to_nothing() {
        let compiled = Where::new().to_sql(&pg()).unwrap();
        assert_eq!(compiled.sql, "");
        assert!(compiled.params.is_empty());

        let mut params = pg().params();
        assert_eq!(Where::new().to_where_clause(&pg(), &mut params).unwrap(), "");
    }

    #[test]
    fn test_equality_and_null() {
        let c = compile(&pg(), json!({"author": "Leo Tolstoy", "deleted": null}));
        assert_eq!(c.sql, "\"author\" = $1 AND \"deleted\" IS NULL");
        assert_eq!(c.params, vec![SqlValue::Text("Leo Tolstoy".to_string())]);
    }

    #[test]
    fn test_sqlite_placeholders() {
        let c = compile(&lite(), json!({"a": 1, "b": {"in": [2, 3]}}));
        assert_eq!(c.sql, "\"a\" = ? AND \"b\" IN (?, ?)");
        assert_eq!(c.params.len(), 3);
    }

    #[test]
    fn test_offset_continues_numbering() {
        let filter = Where::new().eq("a", 1).eq("b", 2);
        let mut params = ParamStack::with_offset(Dialect::Postgres, 3);
        let sql = filter.to_where_clause(&pg(), &mut params).unwrap();
        assert_eq!(sql, "WHERE \"a\" = $4 AND \"b\" = $5");
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let c = compile(&pg(), json!({"id": {"in": []}}));
        assert_eq!(c.sql, "1 = 0");
        assert!(c.params.is_empty());

        let c = compile(&pg(), json!({"id": {"not": {"in": []}}}));
        assert_eq!(c.sql, "1 = 1");
    }

    #[test]
    fn test_not_in_and_not_null() {
        let c = compile(&pg(), json!({"id": {"not": {"in": [1, 2]}}, "isbn": {"not": null}}));
        assert_eq!(c.sql, "NOT (\"id\" IN ($1, $2)) AND \"isbn\" IS NOT NULL");
    }

    #[test]
    fn test_field_level_or() {
        let c = compile(&pg(), json!({"genre": {"or": ["novel", {"ilike": "epic"}]}}));
        assert_eq!(c.sql, "(\"genre\" = $1 OR \"genre\" ILIKE '%' || $2 || '%')");
        assert_eq!(c.params.len(), 2);
    }

    #[test]
    fn test_top_level_or_and_not() {
        let c = compile(
            &pg(),
            json!({"or": [{"a": 1, "b": 2}, {"c": 3}], "not": {"d": 4}}),
        );
        assert_eq!(
            c.sql,
            "((\"a\" = $1 AND \"b\" = $2) OR \"c\" = $3) AND NOT (\"d\" = $4)"
        );
    }

    #[test]
    fn test_and_combinator() {
        let c = compile(&lite(), json!({"and": [{"a": 1}, {"b": 2}]}));
        assert_eq!(c.sql, "(\"a\" = ? AND \"b\" = ?)");
    }

    #[test]
    fn test_ranges() {
        let c = compile(&pg(), json!({"pages": {"gt": 100, "lt": 900, "equal": true}}));
        assert_eq!(c.sql, "(\"pages\" >= $1 AND \"pages\" <= $2)");

        let c = compile(&pg(), json!({"d": {"gt": "2024-01-01", "day_only": true}}));
        assert_eq!(c.sql, "\"d\"::date > $1::date");

        let c = compile(&lite(), json!({"d": {"lt": "2024-01-01", "day_only": true}}));
        assert_eq!(c.sql, "date(\"d\") < date(?)");
    }

    #[test]
    fn test_ilike_dialects() {
        assert_eq!(
            compile(&lite(), json!({"name": {"ilike": "doug"}})).sql,
            "\"name\" LIKE '%' || ? || '%'"
        );
    }

    #[test]
    fn test_false_clause() {
        assert_eq!(compile(&pg(), json!({"_false": true})).sql, "FALSE");
    }

    #[test]
    fn test_hostile_field_names_are_sanitized() {
        let c = compile(&pg(), json!({"name\" = '' OR 1=1 --": "x"}));
        assert_eq!(c.sql, "\"nameOR11\" = $1");
        assert!(Where::new().eq("--", 1).to_sql(&pg()).is_err());
    }

    #[test]
    fn test_values_are_never_interpolated() {
        let hostile = "'; DROP TABLE books; --";
        for scope in [pg(), lite()] {
            let c = compile(
                &scope,
                json!({
                    "a": hostile,
                    "b": {"in": [hostile, hostile]},
                    "c": {"ilike": hostile},
                    "d": {"gt": hostile},
                    "or": [{"e": hostile}],
                    "f": {"json": {"k": hostile}},
                }),
            );
            assert!(!c.sql.contains("DROP"), "{}", c.sql);
            assert_eq!(placeholder_count(&c.sql, scope.dialect()), c.params.len(), "{}", c.sql);
        }
    }

    #[test]
    fn test_in_select() {
        let c = compile(
            &pg(),
            json!({"author_id": {"inSelect": {"table": "authors", "field": "id", "where": {"country": "RU"}}}}),
        );
        assert_eq!(
            c.sql,
            "\"author_id\" IN (SELECT \"id\" FROM \"public\".\"authors\" WHERE \"country\" = $1)"
        );
    }

    #[test]
    fn test_in_select_tenant_qualifies_on_postgres_only() {
        let filter = json!({"author_id": {"inSelect": {"table": "authors", "field": "id", "tenant": "Acme-Co"}}});
        assert_eq!(
            compile(&pg(), filter.clone()).sql,
            "\"author_id\" IN (SELECT \"id\" FROM \"acme_co\".\"authors\")"
        );
        assert_eq!(
            compile(&lite(), filter).sql,
            "\"author_id\" IN (SELECT \"id\" FROM \"authors\")"
        );
    }

    #[test]
    fn test_regex_per_dialect() {
        let filter = json!({"code": {"regex": "^[A-Z]{3}$"}});
        let c = compile(&pg(), filter.clone());
        assert_eq!(c.sql, "\"code\" ~ $1");
        assert_eq!(c.params, vec![SqlValue::from("^[A-Z]{3}$")]);
        assert_eq!(compile(&lite(), filter).sql, "\"code\" REGEXP ?");
    }

    #[test]
    fn test_slugify_per_dialect() {
        let filter = json!({"title": {"slugify": "war-and-peace"}});
        assert_eq!(
            compile(&lite(), filter.clone()).sql,
            "REPLACE(LOWER(\"title\"), ' ', '-') = ?"
        );
        let c = compile(&pg(), filter);
        assert_eq!(
            c.sql,
            "REGEXP_REPLACE(REPLACE(LOWER(\"title\"), ' ', '-'), '[^\\w-]', '', 'g') = $1"
        );
        assert_eq!(c.params, vec![SqlValue::from("war-and-peace")]);
    }

    #[test]
    fn test_eq_compares_columns_and_values() {
        let c = compile(&pg(), json!({"eq": [{"field": "owner"}, "alice"], "n": 1}));
        assert_eq!(c.sql, "\"owner\" = $1::text AND \"n\" = $2");

        let c = compile(&pg(), json!({"eq": [3, 3]}));
        assert_eq!(c.sql, "$1::bigint = $2::bigint");
        assert_eq!(c.params.len(), 2);

        let c = compile(&lite(), json!({"eq": [{"field": "a"}, {"field": "b.c"}]}));
        assert_eq!(c.sql, "\"a\" = \"b\".\"c\"");
        assert!(c.params.is_empty());
    }

    #[test]
    fn test_eq_with_null_operands() {
        assert_eq!(compile(&lite(), json!({"eq": [null, {"field": "a"}]})).sql, "\"a\" IS NULL");
        assert_eq!(compile(&pg(), json!({"eq": ["x", null]})).sql, "$1::text IS NULL");
        assert_eq!(compile(&pg(), json!({"eq": [null, null]})).sql, "1 = 1");
    }

    #[test]
    fn test_eq_shape_errors() {
        let three = Where::from_json(&json!({"eq": [1, 2, 3]}));
        assert!(matches!(three, Err(FilterError::Malformed { .. })));
        let bad_ref = Where::from_json(&json!({"eq": [{"field": 1}, 2]}));
        assert!(matches!(bad_ref, Err(FilterError::Malformed { .. })));
        // a column called "eq" still works with a scalar
        assert_eq!(compile(&lite(), json!({"eq": 5})).sql, "\"eq\" = ?");
    }

    #[test]
    fn test_in_select_rejects_reserved_tenant() {
        let filter = json!({"a": {"inSelect": {"table": "pg_authid", "field": "oid", "tenant": "pg_catalog"}}});
        let err = Where::from_json(&filter).unwrap().to_sql(&pg()).unwrap_err();
        assert!(matches!(err, FilterError::Malformed { .. }));
    }

    #[test]
    fn test_in_select_through() {
        let c = compile(
            &pg(),
            json!({"id": {"inSelect": {
                "table": "book_tags", "field": "tag_id", "through": "tags",
                "valField": "book_id", "where": {"name": "war"}
            }}}),
        );
        assert_eq!(
            c.sql,
            "\"id\" IN (SELECT ss1.\"book_id\" FROM \"public\".\"book_tags\" ss1 \
             JOIN \"public\".\"tags\" ss2 ON ss2.\"id\" = ss1.\"tag_id\" WHERE \"ss2\".\"name\" = $1)"
        );
    }

    #[test]
    fn test_in_select_shares_parameter_stack() {
        let c = compile(
            &pg(),
            json!({"a": 1, "b": {"inSelect": {"table": "t", "field": "f", "where": {"c": 2}}}, "d": 3}),
        );
        assert!(c.sql.contains("\"c\" = $2"), "{}", c.sql);
        assert!(c.sql.ends_with("\"d\" = $3"), "{}", c.sql);
    }

    #[test]
    fn test_json_path_condition() {
        let c = compile(&pg(), json!({"meta": {"json": [["tags", 0], "war"]}}));
        assert_eq!(
            c.sql,
            "jsonb_path_query_first(\"meta\", $1::jsonpath) #>> '{}' = $2"
        );
        assert_eq!(c.params[0], SqlValue::Text("$.tags[0]".to_string()));

        let c = compile(&lite(), json!({"meta": {"json": {"year": {"gte": 1860, "lte": 1870}}}}));
        assert_eq!(
            c.sql,
            "(json_extract(\"meta\", ?) >= ? AND json_extract(\"meta\", ?) <= ?)"
        );
    }

    #[test]
    fn test_json_path_escaping() {
        assert_eq!(json_path(&[JsonPathElem::Key("a b".to_string())]), "$.\"a b\"");
        assert_eq!(json_path(&[JsonPathElem::Key("$.x.y".to_string())]), "$.x.y");
        assert_eq!(
            json_path(&[JsonPathElem::Key("q\"".to_string()), JsonPathElem::Index(2)]),
            "$.\"q\\\"\"[2]"
        );
    }

    #[test]
    fn test_full_text_postgres() {
        let c = compile(
            &pg(),
            json!({"_fts": {"searchTerm": "peace", "fields": ["title", "blurb"]}}),
        );
        assert_eq!(
            c.sql,
            "to_tsvector('english', coalesce(\"blurb\",'') || ' ' || coalesce(\"title\",'')) \
             @@ to_tsquery('english', $1)"
        );
        assert_eq!(c.params, vec![SqlValue::Text("peace:*".to_string())]);

        let c = compile(
            &pg(),
            json!({"_fts": {"searchTerm": "war and peace", "fields": ["title"], "language": "russian"}}),
        );
        assert!(c.sql.contains("plainto_tsquery('russian', $1)"));
    }

    #[test]
    fn test_full_text_sqlite_fallback() {
        let c = compile(&lite(), json!({"_fts": {"searchTerm": "peace", "fields": ["title"]}}));
        assert_eq!(c.sql, "coalesce(\"title\",'') LIKE '%' || ? || '%'");
    }

    #[test]
    fn test_full_text_language_allow_list() {
        let err = Where::from_json(&json!({"_fts": {"searchTerm": "x", "fields": [], "language": "english'); --"}}))
            .unwrap()
            .to_sql(&pg())
            .unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedLanguage { .. }));
    }
}
