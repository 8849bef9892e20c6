//! PostgreSQL sessions.

use async_trait::async_trait;
use deadpool_postgres::Object;
use postgres_types::ToSql;

use super::values;
use crate::core::Session;
use crate::error::{BackendError, StorageResult};
use crate::sql::{Row, SqlValue};

/// A pooled client checked out for one logical operation.
pub struct PostgresSession {
    client: Option<Object>,
    in_transaction: bool,
}

impl std::fmt::Debug for PostgresSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSession")
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl PostgresSession {
    pub(super) fn new(client: Object) -> Self {
        Self {
            client: Some(client),
            in_transaction: false,
        }
    }

    fn client(&self) -> StorageResult<&Object> {
        self.client.as_ref().ok_or_else(|| BackendError::Closed.into())
    }
}

fn bind_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Session for PostgresSession {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<Vec<Row>> {
        let client = self.client()?;
        let stmt = client.prepare_cached(sql).await?;
        let rows = client.query(&stmt, &bind_refs(params)).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(values::decode_row(row)?);
        }
        Ok(out)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<u64> {
        let client = self.client()?;
        let stmt = client.prepare_cached(sql).await?;
        Ok(client.execute(&stmt, &bind_refs(params)).await?)
    }

    async fn batch(&mut self, sql: &str) -> StorageResult<()> {
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn begin(&mut self) -> StorageResult<()> {
        self.client()?.batch_execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.client()?.batch_execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.in_transaction = false;
        self.client()?.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        let Some(client) = self.client.take() else {
            return;
        };

        // The pool does not reset connections on recycle, so the transaction
        // has to end before the client is reused.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!("PostgreSQL transaction abandoned, rolling back");
                runtime.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        tracing::error!(error = %e, "rollback of abandoned transaction failed, discarding connection");
                        drop(Object::take(client));
                    }
                });
            }
            Err(_) => {
                // Closing the connection makes the server roll back.
                tracing::warn!("PostgreSQL transaction abandoned outside a runtime, discarding connection");
                drop(Object::take(client));
            }
        }
    }
}
