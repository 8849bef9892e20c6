//! Dialects, placeholder numbering and table scoping.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ident::{ensure_identifier, quote_identifier};
use super::value::SqlValue;
use crate::error::FilterError;

/// The SQL dialect a statement is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Numbered `$n` placeholders, `ILIKE`, schemas.
    Postgres,
    /// Positional `?` placeholders.
    Sqlite,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Collects bind values and hands out matching placeholders.
///
/// Each call to [`bind`](Self::bind) pushes exactly one value and returns
/// exactly one placeholder, so the compiled SQL always has as many
/// placeholders as there are values.
///
/// ```
/// use quarry_persistence::sql::{Dialect, ParamStack};
///
/// let mut pg = ParamStack::with_offset(Dialect::Postgres, 2);
/// assert_eq!(pg.bind(1), "$3");
/// assert_eq!(pg.bind("a"), "$4");
///
/// let mut lite = ParamStack::new(Dialect::Sqlite);
/// assert_eq!(lite.bind(1), "?");
/// ```
#[derive(Debug, Clone)]
pub struct ParamStack {
    dialect: Dialect,
    offset: usize,
    values: Vec<SqlValue>,
}

impl ParamStack {
    /// Creates an empty stack.
    pub fn new(dialect: Dialect) -> Self {
        Self::with_offset(dialect, 0)
    }

    /// Creates a stack whose first PostgreSQL placeholder is `$offset + 1`.
    ///
    /// Used when the compiled fragment is appended after `offset` parameters
    /// bound elsewhere.
    pub fn with_offset(dialect: Dialect, offset: usize) -> Self {
        Self {
            dialect,
            offset,
            values: Vec::new(),
        }
    }

    /// Binds a value and returns its placeholder.
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> String {
        self.values.push(value.into());
        match self.dialect {
            Dialect::Postgres => format!("${}", self.offset + self.values.len()),
            Dialect::Sqlite => "?".to_string(),
        }
    }

    /// The dialect placeholders are rendered for.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Number of values bound so far.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing has been bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The bound values, in placeholder order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consumes the stack, returning the bound values.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// How an engine places a table inside a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceStyle {
    /// `"namespace"."table"`.
    Schema,
    /// `"namespace__table"`, with bare names in the root namespace.
    Prefix,
    /// Namespaces are ignored.
    Unqualified,
}

/// Separator between namespace and table name for [`NamespaceStyle::Prefix`].
pub const PREFIX_SEPARATOR: &str = "__";

/// The dialect and namespace a statement is compiled against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryScope {
    dialect: Dialect,
    style: NamespaceStyle,
    namespace: String,
    root_namespace: String,
}

impl QueryScope {
    /// Creates a scope for `namespace`.
    pub fn new(
        dialect: Dialect,
        style: NamespaceStyle,
        namespace: impl Into<String>,
        root_namespace: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            style,
            namespace: namespace.into(),
            root_namespace: root_namespace.into(),
        }
    }

    /// A scope that leaves table names unqualified.
    pub fn unqualified(dialect: Dialect) -> Self {
        Self::new(dialect, NamespaceStyle::Unqualified, "", "")
    }

    /// The dialect of this scope.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The namespace style of this scope.
    pub fn style(&self) -> NamespaceStyle {
        self.style
    }

    /// The namespace tables resolve into.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns `true` if the scope points at the root namespace.
    pub fn is_root(&self) -> bool {
        self.namespace == self.root_namespace
    }

    /// The same scope, pointed at another namespace.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..self.clone()
        }
    }

    /// The same scope, pointed at the root namespace.
    pub fn root(&self) -> Self {
        self.with_namespace(self.root_namespace.clone())
    }

    /// The unquoted name the table has inside the database.
    ///
    /// ```
    /// use quarry_persistence::sql::{Dialect, NamespaceStyle, QueryScope};
    ///
    /// let scope = QueryScope::new(Dialect::Sqlite, NamespaceStyle::Prefix, "acme", "public");
    /// assert_eq!(scope.physical_name("books").unwrap(), "acme__books");
    ///
    /// // would alias table "books" of namespace "acme"
    /// assert!(scope.root().physical_name("acme__books").is_err());
    /// ```
    pub fn physical_name(&self, table: &str) -> Result<String, FilterError> {
        let table = ensure_identifier(table)?;
        if self.style == NamespaceStyle::Prefix && table.contains(PREFIX_SEPARATOR) {
            return Err(FilterError::ReservedIdentifier {
                name: table,
                reason: format!("'{PREFIX_SEPARATOR}' separates namespace from table name"),
            });
        }
        match self.style {
            NamespaceStyle::Prefix if !self.is_root() => Ok(format!(
                "{}{}{}",
                ensure_identifier(&self.namespace)?,
                PREFIX_SEPARATOR,
                table
            )),
            _ => Ok(table),
        }
    }

    /// The quoted, namespace-qualified reference to `table`.
    ///
    /// ```
    /// use quarry_persistence::sql::{Dialect, NamespaceStyle, QueryScope};
    ///
    /// let pg = QueryScope::new(Dialect::Postgres, NamespaceStyle::Schema, "acme", "public");
    /// assert_eq!(pg.table("books").unwrap(), "\"acme\".\"books\"");
    ///
    /// let lite = QueryScope::new(Dialect::Sqlite, NamespaceStyle::Prefix, "public", "public");
    /// assert_eq!(lite.table("books").unwrap(), "\"books\"");
    /// ```
    pub fn table(&self, table: &str) -> Result<String, FilterError> {
        self.qualify_object(&self.physical_name(table)?)
    }

    /// Qualifies a schema-level object (index, constraint) by namespace
    /// where the engine supports it.
    pub fn qualify_object(&self, name: &str) -> Result<String, FilterError> {
        match self.style {
            NamespaceStyle::Schema => Ok(format!(
                "{}.{}",
                quote_identifier(&self.namespace)?,
                quote_identifier(name)?
            )),
            NamespaceStyle::Prefix | NamespaceStyle::Unqualified => quote_identifier(name),
        }
    }

    /// Creates an empty parameter stack for this scope's dialect.
    pub fn params(&self) -> ParamStack {
        ParamStack::new(self.dialect)
    }
}
