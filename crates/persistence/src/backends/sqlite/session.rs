//! SQLite sessions.

use async_trait::async_trait;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, params_from_iter};
use tokio::sync::OwnedSemaphorePermit;

use super::values;
use crate::core::Session;
use crate::error::{BackendError, StorageResult};
use crate::sql::{Row, SqlValue};

/// Exclusive use of the engine's connection.
///
/// Holds the engine's admission permit for its whole lifetime, so at most one
/// session exists at a time.
pub struct SqliteSession {
    // Declared before the permit: the connection goes back to the pool
    // before the next session is admitted.
    conn: Option<PooledConnection<SqliteConnectionManager>>,
    _permit: OwnedSemaphorePermit,
    in_transaction: bool,
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl SqliteSession {
    pub(super) fn new(
        conn: PooledConnection<SqliteConnectionManager>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            conn: Some(conn),
            _permit: permit,
            in_transaction: false,
        }
    }

    fn conn(&self) -> StorageResult<&Connection> {
        self.conn
            .as_deref()
            .ok_or_else(|| BackendError::Closed.into())
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let columns = values::columns(&stmt);
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(values::decode_row(row, &columns)?);
        }
        Ok(out)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<u64> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let affected = stmt.execute(params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }

    async fn batch(&mut self, sql: &str) -> StorageResult<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    async fn begin(&mut self) -> StorageResult<()> {
        self.conn()?.execute_batch("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.conn()?.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        // Cleared first: a failed ROLLBACK leaves nothing to retry on drop.
        self.in_transaction = false;
        self.conn()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        tracing::warn!("SQLite transaction abandoned, rolling back");
        if let Some(conn) = self.conn.as_deref()
            && let Err(e) = conn.execute_batch("ROLLBACK")
        {
            tracing::error!(error = %e, "rollback of abandoned SQLite transaction failed");
        }
    }
}
