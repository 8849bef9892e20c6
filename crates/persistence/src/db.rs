//! The database facade.
//!
//! [`Database`] is the single operation surface over either engine. Every
//! call resolves the ambient tenant to a namespace, compiles its statement
//! for the engine's dialect, and runs it on the ambient transaction's
//! session if the call chain is inside [`Database::with_transaction`], or
//! on a fresh session otherwise.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::config::{ConnectionDescriptor, DatabaseConfig, TenancyConfig};
use crate::core::{Engine, EngineKind, transaction};
use crate::error::{ConfigError, RowError, StorageError, StorageResult};
use crate::sql::{
    self, InsertOptions, QueryScope, Row, RowValues, SelectOptions, SqlValue, Statement, Where,
    quote_identifier, sanitize_identifier,
};
use crate::tenant::{TenantId, TenantRouter, current_tenant};

/// Tables whose logical name starts with this prefix belong to the
/// platform itself rather than to users.
pub const SYSTEM_TABLE_PREFIX: &str = "_sys_";

static NEXT_DB_ID: AtomicU64 = AtomicU64::new(1);

/// Which tables [`Database::list_tables`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableFilter {
    /// Every table in the namespace.
    #[default]
    All,
    /// Tables without the system prefix.
    UserDefined,
    /// Tables with the system prefix.
    System,
}

impl TableFilter {
    fn matches(self, table: &str) -> bool {
        match self {
            TableFilter::All => true,
            TableFilter::UserDefined => !table.starts_with(SYSTEM_TABLE_PREFIX),
            TableFilter::System => table.starts_with(SYSTEM_TABLE_PREFIX),
        }
    }
}

/// A connected database.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Database {
    id: u64,
    engine: RwLock<Arc<dyn Engine>>,
    descriptor: RwLock<ConnectionDescriptor>,
    router: TenantRouter,
    sql_logging: AtomicBool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("engine", &self.engine.read())
            .field("router", &self.router)
            .finish()
    }
}

async fn build_engine(descriptor: &ConnectionDescriptor) -> StorageResult<Arc<dyn Engine>> {
    match descriptor {
        #[cfg(feature = "postgres")]
        ConnectionDescriptor::Postgres(config) => Ok(Arc::new(
            crate::backends::postgres::PostgresEngine::connect(config.clone()).await?,
        )),
        #[cfg(feature = "sqlite")]
        ConnectionDescriptor::Sqlite(config) => Ok(Arc::new(
            crate::backends::sqlite::SqliteEngine::open(config.clone())?,
        )),
        #[allow(unreachable_patterns)]
        other => Err(ConfigError::EngineDisabled {
            engine: other.engine_name().to_string(),
        }
        .into()),
    }
}

impl Database {
    /// Connects using a resolved configuration.
    pub async fn connect(config: DatabaseConfig) -> StorageResult<Self> {
        let descriptor = config.descriptor();
        let engine = build_engine(&descriptor).await?;
        let db = Self {
            id: NEXT_DB_ID.fetch_add(1, Ordering::Relaxed),
            engine: RwLock::new(engine),
            descriptor: RwLock::new(descriptor),
            router: TenantRouter::new(config.tenancy)?,
            sql_logging: AtomicBool::new(config.sql_logging),
        };
        tracing::info!(
            db = db.id,
            engine = db.engine_kind().to_string(),
            multi_tenant = db.router.is_multi_tenant(),
            "database connected"
        );
        Ok(db)
    }

    /// Connects with [`DatabaseConfig::resolve`].
    pub async fn from_env() -> StorageResult<Self> {
        Self::connect(DatabaseConfig::resolve()?).await
    }

    /// Connects to `descriptor` with default tenancy settings.
    pub async fn open(descriptor: ConnectionDescriptor) -> StorageResult<Self> {
        Self::connect(DatabaseConfig::for_descriptor(descriptor)).await
    }

    /// Connects to `descriptor` with the given tenancy settings.
    pub async fn open_with_tenancy(
        descriptor: ConnectionDescriptor,
        tenancy: TenancyConfig,
    ) -> StorageResult<Self> {
        Self::connect(DatabaseConfig::for_descriptor(descriptor).with_tenancy(tenancy)).await
    }

    /// A private in-memory SQLite database.
    #[cfg(feature = "sqlite")]
    pub async fn sqlite_in_memory() -> StorageResult<Self> {
        Self::open(ConnectionDescriptor::Sqlite(Default::default())).await
    }

    /// Process-unique id of this database, used to match ambient
    /// transactions.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The active engine.
    pub fn engine(&self) -> Arc<dyn Engine> {
        self.engine.read().clone()
    }

    /// Which engine is active.
    pub fn engine_kind(&self) -> EngineKind {
        self.engine.read().kind()
    }

    /// Returns `true` on SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.engine_kind() == EngineKind::Sqlite
    }

    /// The descriptor of the active connection.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        self.descriptor.read().clone()
    }

    /// The tenant router.
    pub fn router(&self) -> &TenantRouter {
        &self.router
    }

    /// The scope statements of the current call chain compile against.
    pub fn scope(&self) -> StorageResult<QueryScope> {
        self.scope_for(&current_tenant())
    }

    fn scope_for(&self, tenant: &TenantId) -> StorageResult<QueryScope> {
        let engine = self.engine();
        Ok(QueryScope::new(
            engine.dialect(),
            engine.namespace_style(),
            self.router.namespace_for(tenant)?,
            self.router.default_namespace(),
        ))
    }

    /// Turns per-statement debug logging on or off.
    pub fn set_sql_logging(&self, enabled: bool) {
        self.sql_logging.store(enabled, Ordering::Relaxed);
    }

    /// Returns `true` if statements are logged.
    pub fn sql_logging(&self) -> bool {
        self.sql_logging.load(Ordering::Relaxed)
    }

    fn log(&self, sql: &str, params: &[SqlValue]) {
        if self.sql_logging() {
            tracing::debug!(db = self.id, sql, params = ?params, "executing statement");
        }
    }

    async fn run_query(&self, sql: &str, params: &[SqlValue]) -> StorageResult<Vec<Row>> {
        self.log(sql, params);
        if let Some(handle) = transaction::ambient(self.id) {
            let mut session = handle.lock().await?;
            return session.query(sql, params).await;
        }
        let mut session = self.engine().session().await?;
        session.query(sql, params).await
    }

    async fn run_execute(&self, sql: &str, params: &[SqlValue]) -> StorageResult<u64> {
        self.log(sql, params);
        if let Some(handle) = transaction::ambient(self.id) {
            let mut session = handle.lock().await?;
            return session.execute(sql, params).await;
        }
        let mut session = self.engine().session().await?;
        session.execute(sql, params).await
    }

    async fn run_batch(&self, sql: &str) -> StorageResult<()> {
        self.log(sql, &[]);
        if let Some(handle) = transaction::ambient(self.id) {
            let mut session = handle.lock().await?;
            return session.batch(sql).await;
        }
        let mut session = self.engine().session().await?;
        session.batch(sql).await
    }

    // Queries

    /// Rows of `table` matching `filter`.
    pub async fn select(
        &self,
        table: &str,
        filter: &Where,
        options: &SelectOptions,
    ) -> StorageResult<Vec<Row>> {
        let stmt = sql::select(&self.scope()?, table, filter, options)?;
        self.run_query(&stmt.sql, &stmt.params).await
    }

    /// The first row matching `filter`; [`RowError::NotFound`] if none does.
    pub async fn select_one(&self, table: &str, filter: &Where) -> StorageResult<Row> {
        let scope = self.scope()?;
        match self.select_maybe_one(table, filter).await? {
            Some(row) => Ok(row),
            None => Err(RowError::NotFound {
                table: table.to_string(),
                predicate: filter.to_sql(&scope)?.sql,
            }
            .into()),
        }
    }

    /// The first row matching `filter`, if any.
    pub async fn select_maybe_one(&self, table: &str, filter: &Where) -> StorageResult<Option<Row>> {
        Ok(self
            .select(table, filter, &SelectOptions::new())
            .await?
            .into_iter()
            .next())
    }

    /// Number of rows matching `filter`.
    pub async fn count(&self, table: &str, filter: &Where) -> StorageResult<u64> {
        let stmt = sql::count(&self.scope()?, table, filter)?;
        let rows = self.run_query(&stmt.sql, &stmt.params).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Runs a raw statement and returns its rows. Table references in `sql`
    /// are not namespace-qualified.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> StorageResult<Vec<Row>> {
        self.run_query(sql, params).await
    }

    /// Runs a raw statement and returns the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> StorageResult<u64> {
        self.run_execute(sql, params).await
    }

    /// Runs parameterless statements separated by `;`.
    pub async fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        self.run_batch(sql).await
    }

    /// Runs a prepared [`Statement`].
    pub async fn run(&self, stmt: &Statement) -> StorageResult<Vec<Row>> {
        self.run_query(&stmt.sql, &stmt.params).await
    }

    // Writes

    /// Inserts one row and returns its generated key, unless
    /// [`InsertOptions::noid`] is set or a conflict skipped the row.
    pub async fn insert(
        &self,
        table: &str,
        values: &RowValues,
        options: &InsertOptions,
    ) -> StorageResult<Option<Value>> {
        let stmt = sql::insert(&self.scope()?, table, values, options)?;
        if options.noid {
            self.run_execute(&stmt.sql, &stmt.params).await?;
            return Ok(None);
        }
        let rows = self.run_query(&stmt.sql, &stmt.params).await?;
        Ok(first_value(rows.into_iter().next()))
    }

    /// Inserts several rows in one statement and returns their generated
    /// keys (empty with [`InsertOptions::noid`]).
    pub async fn insert_many(
        &self,
        table: &str,
        rows: &[RowValues],
        options: &InsertOptions,
    ) -> StorageResult<Vec<Value>> {
        let stmt = sql::insert_many(&self.scope()?, table, rows, options)?;
        if options.noid {
            self.run_execute(&stmt.sql, &stmt.params).await?;
            return Ok(Vec::new());
        }
        let rows = self.run_query(&stmt.sql, &stmt.params).await?;
        Ok(rows.into_iter().filter_map(|row| first_value(Some(row))).collect())
    }

    /// Updates the row whose primary key is `id`.
    pub async fn update(
        &self,
        table: &str,
        values: &RowValues,
        id: impl Into<SqlValue>,
        pk_name: Option<&str>,
    ) -> StorageResult<u64> {
        let stmt = sql::update(&self.scope()?, table, values, &id.into(), pk_name)?;
        self.run_execute(&stmt.sql, &stmt.params).await
    }

    /// Updates every row matching `filter`.
    pub async fn update_where(
        &self,
        table: &str,
        values: &RowValues,
        filter: &Where,
    ) -> StorageResult<u64> {
        let stmt = sql::update_where(&self.scope()?, table, values, filter)?;
        self.run_execute(&stmt.sql, &stmt.params).await
    }

    /// Deletes every row matching `filter`.
    pub async fn delete_where(&self, table: &str, filter: &Where) -> StorageResult<u64> {
        let stmt = sql::delete(&self.scope()?, table, filter)?;
        self.run_execute(&stmt.sql, &stmt.params).await
    }

    // Schema maintenance

    /// Creates an index on one column.
    pub async fn add_index(&self, table: &str, field: &str) -> StorageResult<()> {
        let scope = self.scope()?;
        let name = index_name(&scope, table, &[field], "index")?;
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_identifier(&name)?,
            scope.table(table)?,
            quote_identifier(field)?
        );
        self.run_batch(&sql).await
    }

    /// Drops the index created by [`add_index`](Self::add_index).
    pub async fn drop_index(&self, table: &str, field: &str) -> StorageResult<()> {
        let scope = self.scope()?;
        let name = index_name(&scope, table, &[field], "index")?;
        self.run_batch(&format!("DROP INDEX IF EXISTS {}", scope.qualify_object(&name)?))
            .await
    }

    /// Adds a unique constraint over `fields`.
    pub async fn add_unique_constraint(&self, table: &str, fields: &[&str]) -> StorageResult<()> {
        let scope = self.scope()?;
        let name = index_name(&scope, table, fields, "unique")?;
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let sql = self.engine().add_unique_sql(&scope, table, &name, &fields)?;
        self.run_batch(&sql).await
    }

    /// Drops the constraint created by
    /// [`add_unique_constraint`](Self::add_unique_constraint).
    pub async fn drop_unique_constraint(&self, table: &str, fields: &[&str]) -> StorageResult<()> {
        let scope = self.scope()?;
        let name = index_name(&scope, table, fields, "unique")?;
        let sql = self.engine().drop_unique_sql(&scope, table, &name)?;
        self.run_batch(&sql).await
    }

    /// Creates a full-text index over `fields`. Does nothing on SQLite.
    pub async fn add_fts_index(
        &self,
        table: &str,
        fields: &[&str],
        language: Option<&str>,
    ) -> StorageResult<()> {
        let scope = self.scope()?;
        let name = index_name(&scope, table, &[], "fts_index")?;
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        match self
            .engine()
            .add_fts_index_sql(&scope, table, &name, &fields, language)?
        {
            Some(sql) => self.run_batch(&sql).await,
            None => Ok(()),
        }
    }

    /// Drops the full-text index of `table`.
    pub async fn drop_fts_index(&self, table: &str) -> StorageResult<()> {
        let scope = self.scope()?;
        let name = index_name(&scope, table, &[], "fts_index")?;
        self.run_batch(&format!("DROP INDEX IF EXISTS {}", scope.qualify_object(&name)?))
            .await
    }

    /// Logical names of the tables in the current namespace, sorted.
    pub async fn list_tables(&self, filter: TableFilter) -> StorageResult<Vec<String>> {
        let scope = self.scope()?;
        let engine = self.engine();
        let tables = if let Some(handle) = transaction::ambient(self.id) {
            let mut session = handle.lock().await?;
            engine.list_tables(&mut **session, &scope).await?
        } else {
            let mut session = engine.session().await?;
            engine.list_tables(&mut *session, &scope).await?
        };
        let mut tables: Vec<String> = tables.into_iter().filter(|t| filter.matches(t)).collect();
        tables.sort();
        Ok(tables)
    }

    /// Drops `table` if it exists.
    pub async fn drop_table(&self, table: &str) -> StorageResult<()> {
        let scope = self.scope()?;
        self.run_batch(&format!("DROP TABLE IF EXISTS {}", scope.table(table)?))
            .await
    }

    /// Drops each of `tables` in order.
    pub async fn drop_tables(&self, tables: &[&str]) -> StorageResult<()> {
        for table in tables {
            self.drop_table(table).await?;
        }
        Ok(())
    }

    /// Deletes every row of `table`.
    pub async fn truncate(&self, table: &str) -> StorageResult<()> {
        let scope = self.scope()?;
        let sql = self.engine().truncate_sql(&scope, table)?;
        self.run_batch(&sql).await
    }

    /// Moves the key sequence of `table` past its largest key. Does nothing
    /// on SQLite.
    pub async fn reset_sequence(&self, table: &str, pk_name: Option<&str>) -> StorageResult<()> {
        let scope = self.scope()?;
        let pk = pk_name.unwrap_or(sql::DEFAULT_PRIMARY_KEY);
        match self.engine().reset_sequence_sql(&scope, table, pk)? {
            Some(sql) => self.run_query(&sql, &[]).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Creates the namespace of `tenant` if the engine has real namespaces.
    pub async fn create_namespace(&self, tenant: impl Into<TenantId>) -> StorageResult<()> {
        let scope = self.scope_for(&tenant.into())?;
        match self.engine().create_namespace_sql(scope.namespace())? {
            Some(sql) => self.run_batch(&sql).await,
            None => Ok(()),
        }
    }

    /// Drops every table of the current namespace and recreates it empty.
    ///
    /// Destroys data. Meant for test and setup tooling.
    pub async fn drop_reset_schema(&self) -> StorageResult<()> {
        let scope = self.scope()?;
        let engine = self.engine();
        tracing::info!(db = self.id, namespace = scope.namespace(), "resetting schema");
        if let Some(handle) = transaction::ambient(self.id) {
            let mut session = handle.lock().await?;
            engine.reset_namespace(&mut **session, &scope).await
        } else {
            let mut session = engine.session().await?;
            engine.reset_namespace(&mut *session, &scope).await
        }
    }

    // Administration

    /// The server version string.
    pub async fn version(&self) -> StorageResult<String> {
        let sql = self.engine().version_sql();
        let rows = self.run_query(sql, &[]).await?;
        rows.first()
            .and_then(|row| row.get("version"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                StorageError::Row(RowError::NotFound {
                    table: "version".to_string(),
                    predicate: sql.to_string(),
                })
            })
    }

    /// Runs a trivial statement against the engine.
    pub async fn health_check(&self) -> StorageResult<()> {
        self.engine().health_check().await
    }

    /// Replaces the engine with a fresh one for `descriptor`, or for the
    /// current descriptor if `None`. The old engine is closed once the new
    /// one is up; sessions checked out from it finish normally.
    pub async fn reconnect(&self, descriptor: Option<ConnectionDescriptor>) -> StorageResult<()> {
        let descriptor = descriptor.unwrap_or_else(|| self.descriptor());
        let engine = build_engine(&descriptor).await?;
        let old = std::mem::replace(&mut *self.engine.write(), engine);
        *self.descriptor.write() = descriptor;
        old.close().await;
        tracing::info!(db = self.id, engine = %self.engine_kind(), "database reconnected");
        Ok(())
    }

    /// Closes the engine. Every later operation fails with a connection
    /// error until [`reconnect`](Self::reconnect).
    pub async fn close(&self) {
        self.engine().close().await;
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.engine.read().is_closed()
    }

    // Transactions

    /// Runs `operation` in a transaction. See
    /// [`with_transaction`](crate::core::with_transaction).
    pub async fn with_transaction<F, Fut, T>(&self, operation: F) -> StorageResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        transaction::with_transaction(self.engine(), self.id, operation).await
    }

    /// Runs `operation` in a transaction and maps a failure through
    /// `on_error` after rolling back.
    pub async fn with_transaction_or_else<F, Fut, T, E>(&self, operation: F, on_error: E) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
        E: FnOnce(StorageError) -> T,
    {
        transaction::with_transaction_or_else(self.engine(), self.id, operation, on_error).await
    }

    /// Runs `operation` in a transaction; a failure is rolled back, logged
    /// and turned into `None`.
    pub async fn try_catch_in_transaction<F, Fut, T>(&self, operation: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        transaction::try_catch_in_transaction(self.engine(), self.id, operation).await
    }

    /// Commits the ambient transaction and starts a new one.
    pub async fn commit_and_restart(&self) -> StorageResult<()> {
        transaction::commit_and_restart(self.id).await
    }

    /// Returns `true` inside [`with_transaction`](Self::with_transaction).
    pub fn in_transaction(&self) -> bool {
        transaction::in_transaction(self.id)
    }
}

/// `<physical table>_<fields..>_<suffix>`, unique per namespace.
fn index_name(
    scope: &QueryScope,
    table: &str,
    fields: &[&str],
    suffix: &str,
) -> StorageResult<String> {
    let mut parts = vec![scope.physical_name(table)?];
    parts.extend(fields.iter().map(|f| sanitize_identifier(f)));
    parts.push(suffix.to_string());
    Ok(parts.join("_"))
}

fn first_value(row: Option<Row>) -> Option<Value> {
    row.and_then(|row| row.into_iter().next().map(|(_, v)| v))
}
