//! Engine abstraction.
//!
//! An [`Engine`] owns the connection resources of one database (a pool, or a
//! single file handle) and hands out [`Session`]s. A session runs statements
//! one at a time and carries at most one open transaction. Everything above
//! this layer talks to the two traits only.

use std::fmt::{self, Debug};

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::sql::{Dialect, NamespaceStyle, QueryScope, Row, SqlValue, quote_identifier};

/// Identifies the database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// PostgreSQL server, pooled.
    Postgres,
    /// SQLite file or in-memory database.
    Sqlite,
}

impl EngineKind {
    /// The SQL dialect statements are compiled for.
    pub fn dialect(self) -> Dialect {
        match self {
            EngineKind::Postgres => Dialect::Postgres,
            EngineKind::Sqlite => Dialect::Sqlite,
        }
    }

    /// How tenant namespaces are laid out.
    pub fn namespace_style(self) -> NamespaceStyle {
        match self {
            EngineKind::Postgres => NamespaceStyle::Schema,
            EngineKind::Sqlite => NamespaceStyle::Prefix,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Postgres => write!(f, "postgres"),
            EngineKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// A checked-out connection.
///
/// Dropping a session with an open transaction rolls the transaction back.
#[async_trait]
pub trait Session: Send {
    /// Runs a statement and returns its rows.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<Vec<Row>>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<u64>;

    /// Runs one or more statements without parameters.
    async fn batch(&mut self, sql: &str) -> StorageResult<()>;

    /// Opens a transaction.
    async fn begin(&mut self) -> StorageResult<()>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> StorageResult<()>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> StorageResult<()>;

    /// Returns `true` while a transaction is open.
    fn in_transaction(&self) -> bool;
}

/// A database engine.
///
/// There are two implementations, one per supported database. The methods
/// returning SQL cover the schema statements whose syntax differs between
/// them; everything else is shared.
#[async_trait]
pub trait Engine: Send + Sync + Debug {
    /// The engine kind.
    fn kind(&self) -> EngineKind;

    /// Short engine name, used in log fields and errors.
    fn name(&self) -> &'static str;

    /// The SQL dialect of this engine.
    fn dialect(&self) -> Dialect {
        self.kind().dialect()
    }

    /// How tenant namespaces are laid out.
    fn namespace_style(&self) -> NamespaceStyle {
        self.kind().namespace_style()
    }

    /// Checks out a session.
    ///
    /// Waits for a free connection; fails with a connection error once the
    /// engine is closed or the wait times out.
    async fn session(&self) -> StorageResult<Box<dyn Session>>;

    /// Releases all connections. Later calls to [`session`](Self::session)
    /// fail with `BackendError::Closed`.
    async fn close(&self);

    /// Returns `true` once [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;

    /// Runs a trivial statement.
    async fn health_check(&self) -> StorageResult<()> {
        let mut session = self.session().await?;
        session.query("SELECT 1", &[]).await?;
        Ok(())
    }

    /// A statement returning the server version in a column named `version`.
    fn version_sql(&self) -> &'static str;

    /// Creates the namespace of a tenant, if the engine has real namespaces.
    fn create_namespace_sql(&self, namespace: &str) -> StorageResult<Option<String>>;

    /// Adds a unique constraint named `name` over `fields`.
    fn add_unique_sql(
        &self,
        scope: &QueryScope,
        table: &str,
        name: &str,
        fields: &[String],
    ) -> StorageResult<String>;

    /// Drops the unique constraint `name`.
    fn drop_unique_sql(&self, scope: &QueryScope, table: &str, name: &str)
    -> StorageResult<String>;

    /// Creates a full-text index, if the engine supports one.
    fn add_fts_index_sql(
        &self,
        scope: &QueryScope,
        table: &str,
        name: &str,
        fields: &[String],
        language: Option<&str>,
    ) -> StorageResult<Option<String>>;

    /// Empties a table.
    fn truncate_sql(&self, scope: &QueryScope, table: &str) -> StorageResult<String>;

    /// Moves the key sequence of a table past its largest key, if the engine
    /// keeps one.
    fn reset_sequence_sql(
        &self,
        scope: &QueryScope,
        table: &str,
        pk: &str,
    ) -> StorageResult<Option<String>>;

    /// Lists the logical names of the tables in the scope's namespace.
    async fn list_tables(
        &self,
        session: &mut dyn Session,
        scope: &QueryScope,
    ) -> StorageResult<Vec<String>>;

    /// Drops every table in the scope's namespace and recreates it empty.
    async fn reset_namespace(&self, session: &mut dyn Session, scope: &QueryScope)
    -> StorageResult<()>;
}

/// `("a", "b")`, each column sanitized and quoted.
pub(crate) fn column_list(fields: &[String]) -> StorageResult<String> {
    let quoted = fields
        .iter()
        .map(|f| quote_identifier(f))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", quoted.join(", ")))
}
