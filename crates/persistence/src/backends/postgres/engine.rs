//! PostgreSQL engine.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime, SslMode};
use parking_lot::RwLock;
use tokio_postgres::NoTls;

use super::session::PostgresSession;
use crate::config::{PostgresConfig, PostgresSslMode};
use crate::core::{Engine, EngineKind, Session, column_list};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::sql::{FullTextQuery, QueryScope, SqlValue, fts_columns, fts_language, quote_identifier};

/// PostgreSQL engine backed by a `deadpool-postgres` pool.
///
/// Each tenant namespace is a schema.
pub struct PostgresEngine {
    config: PostgresConfig,
    pool: RwLock<Option<Pool>>,
}

impl Debug for PostgresEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresEngine")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("dbname", &self.config.dbname)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PostgresEngine {
    /// Creates the pool. No connection is made until the first session.
    pub fn new(config: PostgresConfig) -> StorageResult<Self> {
        let pool = Self::create_pool(&config)?;
        Ok(Self {
            config,
            pool: RwLock::new(Some(pool)),
        })
    }

    /// Creates the pool and verifies the server is reachable.
    pub async fn connect(config: PostgresConfig) -> StorageResult<Self> {
        let engine = Self::new(config)?;
        engine.health_check().await?;
        Ok(engine)
    }

    /// Connects using a `postgres://` URL.
    pub async fn from_connection_string(url: &str) -> StorageResult<Self> {
        Self::connect(PostgresConfig::parse_connection_string(url)?).await
    }

    /// Connects using the `PG*` environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::connect(PostgresConfig::from_env()?).await
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    fn create_pool(config: &PostgresConfig) -> StorageResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = config.password.clone();
        cfg.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        cfg.options = Some(format!("-c statement_timeout={}", config.statement_timeout_ms));
        cfg.ssl_mode = Some(match config.ssl_mode {
            PostgresSslMode::Disable => SslMode::Disable,
            PostgresSslMode::Prefer => SslMode::Prefer,
            PostgresSslMode::Require => SslMode::Require,
        });

        let pool = cfg
            .builder(NoTls)
            .map_err(|e| {
                StorageError::Backend(BackendError::Internal {
                    backend_name: "postgres".to_string(),
                    message: format!("Failed to create pool builder: {}", e),
                    source: None,
                })
            })?
            .max_size(config.max_connections)
            .wait_timeout(Some(config.pool_timeout))
            .create_timeout(Some(Duration::from_secs(config.connect_timeout_secs)))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: "postgres".to_string(),
                    message: e.to_string(),
                })
            })?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            max_connections = config.max_connections,
            "created PostgreSQL pool"
        );
        Ok(pool)
    }
}

#[async_trait]
impl Engine for PostgresEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn session(&self) -> StorageResult<Box<dyn Session>> {
        let pool = self
            .pool
            .read()
            .clone()
            .ok_or(StorageError::Backend(BackendError::Closed))?;
        let client = pool.get().await?;
        Ok(Box::new(PostgresSession::new(client)))
    }

    async fn close(&self) {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close();
            tracing::info!(host = %self.config.host, "closed PostgreSQL pool");
        }
    }

    fn is_closed(&self) -> bool {
        self.pool.read().is_none()
    }

    fn version_sql(&self) -> &'static str {
        "SELECT current_setting('server_version') AS \"version\""
    }

    fn create_namespace_sql(&self, namespace: &str) -> StorageResult<Option<String>> {
        Ok(Some(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_identifier(namespace)?
        )))
    }

    fn add_unique_sql(
        &self,
        scope: &QueryScope,
        table: &str,
        name: &str,
        fields: &[String],
    ) -> StorageResult<String> {
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE {}",
            scope.table(table)?,
            quote_identifier(name)?,
            column_list(fields)?
        ))
    }

    fn drop_unique_sql(
        &self,
        scope: &QueryScope,
        table: &str,
        name: &str,
    ) -> StorageResult<String> {
        Ok(format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            scope.table(table)?,
            quote_identifier(name)?
        ))
    }

    fn add_fts_index_sql(
        &self,
        scope: &QueryScope,
        table: &str,
        name: &str,
        fields: &[String],
        language: Option<&str>,
    ) -> StorageResult<Option<String>> {
        let language = fts_language(language)?;
        let document = fts_columns(&FullTextQuery::new("", fields.iter().cloned()))?;
        Ok(Some(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN (to_tsvector('{}', {}))",
            quote_identifier(name)?,
            scope.table(table)?,
            language,
            document
        )))
    }

    fn truncate_sql(&self, scope: &QueryScope, table: &str) -> StorageResult<String> {
        Ok(format!("TRUNCATE {}", scope.table(table)?))
    }

    fn reset_sequence_sql(
        &self,
        scope: &QueryScope,
        table: &str,
        pk: &str,
    ) -> StorageResult<Option<String>> {
        let qualified = scope.table(table)?;
        let pk = quote_identifier(pk)?;
        // Sanitized names never contain quotes, so the literal is safe.
        Ok(Some(format!(
            "SELECT setval(pg_get_serial_sequence('{qualified}', '{}'), \
             coalesce(max({pk}), 0) + 1, false) FROM {qualified}",
            pk.trim_matches('"'),
        )))
    }

    async fn list_tables(
        &self,
        session: &mut dyn Session,
        scope: &QueryScope,
    ) -> StorageResult<Vec<String>> {
        let rows = session
            .query(
                "SELECT table_name::text AS \"name\" FROM information_schema.tables \
                 WHERE table_schema = $1::text AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[SqlValue::Text(scope.namespace().to_string())],
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

    async fn reset_namespace(
        &self,
        session: &mut dyn Session,
        scope: &QueryScope,
    ) -> StorageResult<()> {
        let schema = quote_identifier(scope.namespace())?;
        tracing::info!(schema = scope.namespace(), "dropping and recreating schema");
        session
            .batch(&format!(
                "DROP SCHEMA IF EXISTS {schema} CASCADE; CREATE SCHEMA {schema};"
            ))
            .await
    }
}
