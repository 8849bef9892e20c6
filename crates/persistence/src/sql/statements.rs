//! Complete statements built from filters, options and row values.

use super::dialect::{ParamStack, QueryScope};
use super::filter::Where;
use super::ident::quote_identifier;
use super::options::SelectOptions;
use super::value::{FieldValue, RowValues, SqlValue};
use crate::error::FilterError;

/// Primary key column used when none is given.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// A SQL statement and its bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// The SQL text, with dialect placeholders.
    pub sql: String,
    /// Bind values, in placeholder order.
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    fn from_parts(parts: Vec<String>, params: ParamStack) -> Self {
        Self {
            sql: parts
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            params: params.into_values(),
        }
    }
}

/// Options for inserts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOptions {
    /// Do not return the generated key.
    pub noid: bool,
    /// Primary key column; defaults to `id`.
    pub pk_name: Option<String>,
    /// Skip rows that violate a unique constraint.
    pub on_conflict_do_nothing: bool,
}

impl InsertOptions {
    /// Default options: return the generated `id`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not return the generated key.
    pub fn noid(mut self) -> Self {
        self.noid = true;
        self
    }

    /// Returns a custom primary key column.
    pub fn pk_name(mut self, pk_name: impl Into<String>) -> Self {
        self.pk_name = Some(pk_name.into());
        self
    }

    /// Skip rows that conflict with a unique constraint.
    pub fn on_conflict_do_nothing(mut self) -> Self {
        self.on_conflict_do_nothing = true;
        self
    }

    fn pk(&self) -> &str {
        self.pk_name.as_deref().unwrap_or(DEFAULT_PRIMARY_KEY)
    }
}

/// `SELECT <projection> FROM <table> [WHERE ..] [ORDER BY ..] [LIMIT ..]`.
pub fn select(
    scope: &QueryScope,
    table: &str,
    filter: &Where,
    options: &SelectOptions,
) -> Result<Statement, FilterError> {
    let mut params = scope.params();
    let table = scope.table(table)?;
    let where_clause = filter.to_where_clause(scope, &mut params)?;
    let suffix = options.compile(&mut params)?;
    Ok(Statement::from_parts(
        vec![
            format!("SELECT {} FROM {}", options.projection()?, table),
            where_clause,
            suffix,
        ],
        params,
    ))
}

/// `SELECT COUNT(*) AS "count" FROM <table> [WHERE ..]`.
pub fn count(scope: &QueryScope, table: &str, filter: &Where) -> Result<Statement, FilterError> {
    let mut params = scope.params();
    let table = scope.table(table)?;
    let where_clause = filter.to_where_clause(scope, &mut params)?;
    Ok(Statement::from_parts(
        vec![format!("SELECT COUNT(*) AS \"count\" FROM {}", table), where_clause],
        params,
    ))
}

/// The SQL for one write-position value.
fn value_expr(
    value: &FieldValue,
    column: &str,
    table: &str,
    pk: &str,
    params: &mut ParamStack,
) -> String {
    match value {
        FieldValue::Value(v) => params.bind(v.clone()),
        FieldValue::NextVersion { row_id } => format!(
            "coalesce((SELECT max({}) FROM {} WHERE {} = {}), 0) + 1",
            column, table, pk, row_id
        ),
    }
}

fn quoted_columns(values: &RowValues) -> Result<Vec<String>, FilterError> {
    values.columns().map(quote_identifier).collect()
}

fn returning(options: &InsertOptions, pk: &str) -> String {
    if options.noid {
        String::new()
    } else {
        format!("RETURNING {}", pk)
    }
}

/// `INSERT INTO <table> (..) VALUES (..) [ON CONFLICT DO NOTHING] [RETURNING "pk"]`.
///
/// ```
/// use quarry_persistence::sql::{Dialect, FieldValue, InsertOptions, QueryScope, RowValues, insert};
///
/// let scope = QueryScope::unqualified(Dialect::Postgres);
/// let values = RowValues::new().set("title", "War and Peace");
/// let stmt = insert(&scope, "books", &values, &InsertOptions::new()).unwrap();
/// assert_eq!(
///     stmt.sql,
///     "INSERT INTO \"books\" (\"title\") VALUES ($1) RETURNING \"id\""
/// );
/// ```
pub fn insert(
    scope: &QueryScope,
    table: &str,
    values: &RowValues,
    options: &InsertOptions,
) -> Result<Statement, FilterError> {
    insert_many(scope, table, std::slice::from_ref(values), options)
}

/// A multi-row insert. Every row must assign the same columns in the same
/// order.
pub fn insert_many(
    scope: &QueryScope,
    table: &str,
    rows: &[RowValues],
    options: &InsertOptions,
) -> Result<Statement, FilterError> {
    let first = rows
        .first()
        .ok_or_else(|| FilterError::malformed("insert requires at least one row"))?;
    let mut params = scope.params();
    let table = scope.table(table)?;
    let pk = quote_identifier(options.pk())?;
    let columns = quoted_columns(first)?;

    let body = if columns.is_empty() {
        if rows.len() > 1 {
            return Err(FilterError::malformed(
                "multi-row insert requires at least one column",
            ));
        }
        "DEFAULT VALUES".to_string()
    } else {
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.columns().eq(first.columns()) {
                return Err(FilterError::malformed(
                    "all rows of a multi-row insert must have the same columns",
                ));
            }
            let exprs = row
                .iter()
                .zip(&columns)
                .map(|((_, value), column)| value_expr(value, column, &table, &pk, &mut params))
                .collect::<Vec<_>>();
            tuples.push(format!("({})", exprs.join(", ")));
        }
        format!("({}) VALUES {}", columns.join(", "), tuples.join(", "))
    };

    let on_conflict = if options.on_conflict_do_nothing {
        "ON CONFLICT DO NOTHING".to_string()
    } else {
        String::new()
    };

    Ok(Statement::from_parts(
        vec![
            format!("INSERT INTO {} {}", table, body),
            on_conflict,
            returning(options, &pk),
        ],
        params,
    ))
}

fn set_list(
    values: &RowValues,
    table: &str,
    pk: &str,
    params: &mut ParamStack,
) -> Result<String, FilterError> {
    if values.is_empty() {
        return Err(FilterError::malformed("update requires at least one column"));
    }
    let mut assignments = Vec::with_capacity(values.len());
    for (column, value) in values.iter() {
        let column = quote_identifier(column)?;
        let expr = value_expr(value, &column, table, pk, params);
        assignments.push(format!("{} = {}", column, expr));
    }
    Ok(assignments.join(", "))
}

/// `UPDATE <table> SET .. WHERE "pk" = <id>`.
pub fn update(
    scope: &QueryScope,
    table: &str,
    values: &RowValues,
    id: &SqlValue,
    pk_name: Option<&str>,
) -> Result<Statement, FilterError> {
    let mut params = scope.params();
    let table = scope.table(table)?;
    let pk = quote_identifier(pk_name.unwrap_or(DEFAULT_PRIMARY_KEY))?;
    let set = set_list(values, &table, &pk, &mut params)?;
    let id = params.bind(id.clone());
    Ok(Statement::from_parts(
        vec![format!("UPDATE {} SET {} WHERE {} = {}", table, set, pk, id)],
        params,
    ))
}

/// `UPDATE <table> SET .. [WHERE ..]`. SET values are bound before the
/// filter's values.
pub fn update_where(
    scope: &QueryScope,
    table: &str,
    values: &RowValues,
    filter: &Where,
) -> Result<Statement, FilterError> {
    let mut params = scope.params();
    let table = scope.table(table)?;
    let pk = quote_identifier(DEFAULT_PRIMARY_KEY)?;
    let set = set_list(values, &table, &pk, &mut params)?;
    let where_clause = filter.to_where_clause(scope, &mut params)?;
    Ok(Statement::from_parts(
        vec![format!("UPDATE {} SET {}", table, set), where_clause],
        params,
    ))
}

/// `DELETE FROM <table> [WHERE ..]`.
pub fn delete(scope: &QueryScope, table: &str, filter: &Where) -> Result<Statement, FilterError> {
    let mut params = scope.params();
    let table = scope.table(table)?;
    let where_clause = filter.to_where_clause(scope, &mut params)?;
    Ok(Statement::from_parts(
        vec![format!("DELETE FROM {}", table), where_clause],
        params,
    ))
}
