//! SQL generation.
//!
//! Everything in this module is pure: it turns filters, options and row
//! values into SQL text plus an ordered list of bind values, and never talks
//! to a database. The two dialects differ only in placeholder style and in a
//! handful of operators, all selected through [`Dialect`].
//!
//! # Example
//!
//! ```
//! use quarry_persistence::sql::{self, Dialect, NamespaceStyle, QueryScope, SelectOptions, Where};
//! use serde_json::json;
//!
//! let scope = QueryScope::new(Dialect::Sqlite, NamespaceStyle::Prefix, "public", "public");
//! let filter = Where::from_json(&json!({"author": "Leo Tolstoy"})).unwrap();
//! let options = SelectOptions::new().order_by("title").limit(5);
//!
//! let stmt = sql::select(&scope, "books", &filter, &options).unwrap();
//! assert_eq!(
//!     stmt.sql,
//!     "SELECT * FROM \"books\" WHERE \"author\" = ? ORDER BY \"title\" LIMIT 5"
//! );
//! ```

mod dialect;
mod filter;
mod ident;
mod options;
mod statements;
mod value;
mod where_clause;

pub use dialect::{Dialect, NamespaceStyle, PREFIX_SEPARATOR, ParamStack, QueryScope};
pub use filter::{
    Clause, Condition, FullTextQuery, JsonCondition, JsonKeyCondition, JsonPathElem, Operand,
    Range, SubSelect, Where,
};
pub use ident::{
    ensure_identifier, quote_identifier, quote_qualified, sanitize_identifier, sanitize_qualified,
};
pub use options::{OrderBy, OrderOperator, SelectOptions};
pub use statements::{
    DEFAULT_PRIMARY_KEY, InsertOptions, Statement, count, delete, insert, insert_many, select,
    update, update_where,
};
pub use value::{FieldValue, Row, RowValues, SqlValue};
pub use where_clause::CompiledWhere;

#[cfg_attr(not(feature = "postgres"), allow(unused_imports))]
pub(crate) use where_clause::{fts_columns, fts_language};
