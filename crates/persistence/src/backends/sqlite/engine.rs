//! SQLite engine.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use rusqlite::Connection;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use tokio::sync::Semaphore;

use super::session::SqliteSession;
use crate::config::SqliteConfig;
use crate::core::{Engine, EngineKind, Session, column_list};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::sql::{NamespaceStyle, PREFIX_SEPARATOR, QueryScope, quote_identifier};

/// SQLite engine over a single connection.
///
/// SQLite serializes writers anyway, so the engine keeps exactly one
/// connection and admits one [`SqliteSession`] at a time. Callers queue on
/// an async semaphore instead of blocking a runtime thread on the pool.
/// An in-memory database lives as long as the engine.
pub struct SqliteEngine {
    config: SqliteConfig,
    handle: RwLock<Option<Arc<SqliteHandle>>>,
}

struct SqliteHandle {
    pool: Pool<SqliteConnectionManager>,
    gate: Arc<Semaphore>,
}

impl Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SqliteEngine {
    /// Opens (creating if needed) the database described by `config`.
    pub fn open(config: SqliteConfig) -> StorageResult<Self> {
        let manager = if config.is_memory() {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&config.path)
        };

        let busy_timeout = std::time::Duration::from_millis(u64::from(config.busy_timeout_ms));
        let foreign_keys = config.enable_foreign_keys;
        let wal = config.enable_wal && !config.is_memory();
        let manager = manager.with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", foreign_keys)?;
            register_regexp(conn)?;
            if wal {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })?;
            }
            Ok(())
        });

        // One connection that never expires: an in-memory database is lost
        // when its connection closes.
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(config.open_timeout)
            .build(manager)
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: "sqlite".to_string(),
                    message: e.to_string(),
                })
            })?;

        tracing::info!(path = %config.path.display(), wal, "opened SQLite database");

        Ok(Self {
            config,
            handle: RwLock::new(Some(Arc::new(SqliteHandle {
                pool,
                gate: Arc::new(Semaphore::new(1)),
            }))),
        })
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> StorageResult<Self> {
        Self::open(SqliteConfig::in_memory())
    }

    /// The configuration the engine was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Physical table names in the database, sorted.
    async fn physical_tables(session: &mut dyn Session) -> StorageResult<Vec<String>> {
        let rows = session
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| match row.remove("name") {
                Some(serde_json::Value::String(name)) => Some(name),
                _ => None,
            })
            .collect())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Backs the `REGEXP` operator. `x REGEXP y` calls `regexp(y, x)`.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        regexp,
    )
}

fn regexp(ctx: &Context<'_>) -> rusqlite::Result<Option<bool>> {
    // compiled once per statement
    let pattern: Arc<Regex> =
        ctx.get_or_create_aux(0, |raw| -> Result<Regex, BoxError> { Ok(Regex::new(raw.as_str()?)?) })?;
    let text = match ctx.get_raw(1) {
        ValueRef::Null | ValueRef::Blob(_) => return Ok(None),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
    };
    Ok(Some(pattern.is_match(&text)))
}

/// Maps a physical name to its logical name within the scope's namespace.
fn logical_name(scope: &QueryScope, physical: &str) -> Option<String> {
    match scope.style() {
        NamespaceStyle::Prefix if scope.is_root() => {
            (!physical.contains(PREFIX_SEPARATOR)).then(|| physical.to_string())
        }
        NamespaceStyle::Prefix => physical
            .strip_prefix(scope.namespace())
            .and_then(|rest| rest.strip_prefix(PREFIX_SEPARATOR))
            .map(str::to_string),
        NamespaceStyle::Schema | NamespaceStyle::Unqualified => Some(physical.to_string()),
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn session(&self) -> StorageResult<Box<dyn Session>> {
        let handle = self
            .handle
            .read()
            .clone()
            .ok_or(StorageError::Backend(BackendError::Closed))?;
        let permit = handle
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BackendError::Closed)?;
        let conn = handle.pool.get()?;
        Ok(Box::new(SqliteSession::new(conn, permit)))
    }

    async fn close(&self) {
        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            handle.gate.close();
            tracing::info!(path = %self.config.path.display(), "closed SQLite database");
        }
    }

    fn is_closed(&self) -> bool {
        self.handle.read().is_none()
    }

    fn version_sql(&self) -> &'static str {
        "SELECT sqlite_version() AS \"version\""
    }

    fn create_namespace_sql(&self, _namespace: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    fn add_unique_sql(
        &self,
        scope: &QueryScope,
        table: &str,
        name: &str,
        fields: &[String],
    ) -> StorageResult<String> {
        Ok(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} {}",
            quote_identifier(name)?,
            scope.table(table)?,
            column_list(fields)?
        ))
    }

    fn drop_unique_sql(
        &self,
        _scope: &QueryScope,
        _table: &str,
        name: &str,
    ) -> StorageResult<String> {
        Ok(format!("DROP INDEX IF EXISTS {}", quote_identifier(name)?))
    }

    fn add_fts_index_sql(
        &self,
        _scope: &QueryScope,
        _table: &str,
        _name: &str,
        _fields: &[String],
        _language: Option<&str>,
    ) -> StorageResult<Option<String>> {
        Ok(None)
    }

    fn truncate_sql(&self, scope: &QueryScope, table: &str) -> StorageResult<String> {
        Ok(format!("DELETE FROM {}", scope.table(table)?))
    }

    fn reset_sequence_sql(
        &self,
        _scope: &QueryScope,
        _table: &str,
        _pk: &str,
    ) -> StorageResult<Option<String>> {
        // INTEGER PRIMARY KEY already continues from max(rowid).
        Ok(None)
    }

    async fn list_tables(
        &self,
        session: &mut dyn Session,
        scope: &QueryScope,
    ) -> StorageResult<Vec<String>> {
        Ok(Self::physical_tables(session)
            .await?
            .iter()
            .filter_map(|physical| logical_name(scope, physical))
            .collect())
    }

    async fn reset_namespace(
        &self,
        session: &mut dyn Session,
        scope: &QueryScope,
    ) -> StorageResult<()> {
        let tables = self.list_tables(session, scope).await?;
        let mut sql = String::from("PRAGMA foreign_keys = OFF;");
        for table in &tables {
            sql.push_str(&format!(" DROP TABLE IF EXISTS {};", scope.table(table)?));
        }
        if self.config.enable_foreign_keys {
            sql.push_str(" PRAGMA foreign_keys = ON;");
        }
        tracing::debug!(namespace = scope.namespace(), tables = tables.len(), "resetting namespace");
        session.batch(&sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{Dialect, SqlValue};
    use serde_json::json;

    fn scope(namespace: &str) -> QueryScope {
        QueryScope::new(Dialect::Sqlite, NamespaceStyle::Prefix, namespace, "public")
    }

    #[tokio::test]
    async fn test_regexp_operator() {
        let engine = SqliteEngine::in_memory().unwrap();
        let mut session = engine.session().await.unwrap();
        let rows = session
            .query(
                "SELECT 'ABC' REGEXP ? AS upper, 'abc1' REGEXP ? AS lower, 42 REGEXP ? AS num, \
                 NULL REGEXP ? AS missing",
                &[
                    SqlValue::from("^[A-Z]{3}$"),
                    SqlValue::from("^[A-Z]{3}$"),
                    SqlValue::from("^4"),
                    SqlValue::from("x"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["upper"], json!(1));
        assert_eq!(rows[0]["lower"], json!(0));
        assert_eq!(rows[0]["num"], json!(1));
        assert_eq!(rows[0]["missing"], json!(null));

        let err = session
            .query("SELECT 'a' REGEXP ? AS bad", &[SqlValue::from("(")])
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_session_roundtrip() {
        let engine = SqliteEngine::in_memory().unwrap();
        let mut session = engine.session().await.unwrap();
        session
            .batch("CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT, read BOOLEAN)")
            .await
            .unwrap();
        let inserted = session
            .execute(
                "INSERT INTO books (title, read) VALUES (?, ?)",
                &[SqlValue::from("War and Peace"), SqlValue::Bool(true)],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        let rows = session.query("SELECT title, read FROM books", &[]).await.unwrap();
        assert_eq!(rows[0]["title"], json!("War and Peace"));
        assert_eq!(rows[0]["read"], json!(true));
    }

    #[tokio::test]
    async fn test_in_memory_database_survives_sessions() {
        let engine = SqliteEngine::in_memory().unwrap();
        {
            let mut session = engine.session().await.unwrap();
            session.batch("CREATE TABLE t (v INTEGER)").await.unwrap();
        }
        let mut session = engine.session().await.unwrap();
        let rows = session.query("SELECT count(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(rows[0]["n"], json!(0));
    }

    #[tokio::test]
    async fn test_dropped_session_rolls_back() {
        let engine = SqliteEngine::in_memory().unwrap();
        {
            let mut session = engine.session().await.unwrap();
            session.batch("CREATE TABLE t (v INTEGER)").await.unwrap();
            session.begin().await.unwrap();
            session.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        }
        let mut session = engine.session().await.unwrap();
        assert!(!session.in_transaction());
        let rows = session.query("SELECT count(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(rows[0]["n"], json!(0));
    }

    #[tokio::test]
    async fn test_close_rejects_new_sessions() {
        let engine = SqliteEngine::in_memory().unwrap();
        engine.close().await;
        assert!(engine.is_closed());
        let Err(err) = engine.session().await else { panic!("expected session() to fail after close") };
        assert!(matches!(err, StorageError::Backend(BackendError::Closed)));
    }

    #[tokio::test]
    async fn test_list_tables_by_namespace() {
        let engine = SqliteEngine::in_memory().unwrap();
        let mut session = engine.session().await.unwrap();
        session
            .batch(
                "CREATE TABLE books (id INTEGER); CREATE TABLE acme__books (id INTEGER); \
                 CREATE TABLE acme__authors (id INTEGER); CREATE TABLE other__x (id INTEGER);",
            )
            .await
            .unwrap();

        let root = engine.list_tables(session.as_mut(), &scope("public")).await.unwrap();
        assert_eq!(root, vec!["books"]);
        let acme = engine.list_tables(session.as_mut(), &scope("acme")).await.unwrap();
        assert_eq!(acme, vec!["authors", "books"]);

        engine.reset_namespace(session.as_mut(), &scope("acme")).await.unwrap();
        assert!(engine.list_tables(session.as_mut(), &scope("acme")).await.unwrap().is_empty());
        assert_eq!(
            engine.list_tables(session.as_mut(), &scope("other")).await.unwrap(),
            vec!["x"]
        );
    }

    #[test]
    fn test_ddl() {
        let engine = SqliteEngine::in_memory().unwrap();
        let scope = scope("acme");
        assert_eq!(
            engine
                .add_unique_sql(&scope, "books", "acme__books_isbn_unique", &["isbn".to_string()])
                .unwrap(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"acme__books_isbn_unique\" ON \"acme__books\" (\"isbn\")"
        );
        assert_eq!(engine.truncate_sql(&scope, "books").unwrap(), "DELETE FROM \"acme__books\"");
        assert!(engine.create_namespace_sql("acme").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SqliteEngine::open(SqliteConfig::file(dir.path().join("q.db"))).unwrap();
        let mut session = engine.session().await.unwrap();
        let rows = session.query("PRAGMA journal_mode", &[]).await.unwrap();
        assert_eq!(rows[0]["journal_mode"], json!("wal"));
    }
}
