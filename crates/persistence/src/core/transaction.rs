//! Ambient transactions.
//!
//! [`with_transaction`] opens a transaction on a dedicated session and
//! installs that session as the ambient session of the call chain through a
//! `tokio::task_local!`. Every statement the chain issues against the same
//! database, however deeply nested and across any number of `.await` points,
//! runs on that session in program order. Tasks spawned from inside the
//! chain do not inherit it.
//!
//! The transaction always ends: it commits when the operation returns `Ok`,
//! rolls back when it returns `Err`, and rolls back through the session's
//! drop guard when the future is dropped before completion.
//!
//! A nested transaction is a savepoint. A savepoint whose future is dropped
//! cannot be rolled back from `Drop`, so it is marked abandoned instead, and
//! the next [`TransactionHandle::lock`] rolls it back before handing out the
//! session. Its writes never reach the enclosing commit.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use super::engine::{Engine, Session};
use crate::error::{StorageError, StorageResult, TransactionError};

tokio::task_local! {
    static AMBIENT: TransactionHandle;
}

/// The session of an open ambient transaction.
#[derive(Clone)]
pub struct TransactionHandle {
    db_id: u64,
    session: Arc<Mutex<Box<dyn Session>>>,
    savepoints: Arc<parking_lot::Mutex<Savepoints>>,
}

/// Open savepoints of one transaction, oldest first.
#[derive(Debug, Default)]
struct Savepoints {
    open: Vec<String>,
    /// Index into `open` of the oldest savepoint whose future was dropped.
    abandoned: Option<usize>,
}

impl Savepoints {
    fn close(&mut self, name: &str) {
        if let Some(idx) = self.open.iter().position(|n| n == name) {
            self.open.remove(idx);
        }
    }

    fn abandon(&mut self, name: &str) {
        if let Some(idx) = self.open.iter().position(|n| n == name) {
            self.abandoned = Some(self.abandoned.map_or(idx, |a| a.min(idx)));
        }
    }

    /// Takes the savepoint to roll back to, forgetting it and everything
    /// opened after it.
    fn take_abandoned(&mut self) -> Option<String> {
        let idx = self.abandoned.take()?;
        let name = self.open.get(idx).cloned();
        self.open.truncate(idx);
        name
    }
}

/// Marks its savepoint abandoned unless disarmed.
struct SavepointGuard<'a> {
    savepoints: &'a parking_lot::Mutex<Savepoints>,
    name: String,
    armed: bool,
}

impl Drop for SavepointGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(savepoint = %self.name, "savepoint dropped before completion, rolling back");
            self.savepoints.lock().abandon(&self.name);
        }
    }
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("db_id", &self.db_id)
            .finish_non_exhaustive()
    }
}

impl TransactionHandle {
    /// The id of the database the transaction belongs to.
    pub fn db_id(&self) -> u64 {
        self.db_id
    }

    /// Locks the shared session. Hold the guard for one statement only.
    ///
    /// Rolls back any savepoint abandoned since the last lock first.
    pub async fn lock(&self) -> StorageResult<MutexGuard<'_, Box<dyn Session>>> {
        let mut session = self.session.lock().await;
        let abandoned = self.savepoints.lock().take_abandoned();
        if let Some(name) = abandoned {
            session
                .batch(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"))
                .await
                .map_err(|e| TransactionError::RollbackFailed {
                    message: e.to_string(),
                    cause: None,
                })?;
        }
        Ok(session)
    }
}

/// The ambient transaction of database `db_id`, if the current call chain
/// is inside one.
pub fn ambient(db_id: u64) -> Option<TransactionHandle> {
    AMBIENT
        .try_with(|handle| (handle.db_id == db_id).then(|| handle.clone()))
        .ok()
        .flatten()
}

/// Returns `true` if the current call chain is inside a transaction on
/// database `db_id`.
pub fn in_transaction(db_id: u64) -> bool {
    ambient(db_id).is_some()
}

/// Runs `operation` inside a transaction.
///
/// On success the transaction commits and the operation's value is
/// returned. On failure the transaction rolls back and the error comes back
/// wrapped in [`TransactionError::Aborted`]. Called inside an open
/// transaction on the same database, the operation runs inside a savepoint
/// instead.
pub async fn with_transaction<F, Fut, T>(
    engine: Arc<dyn Engine>,
    db_id: u64,
    operation: F,
) -> StorageResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    if let Some(handle) = ambient(db_id) {
        return with_savepoint(&handle, operation).await;
    }

    let mut session = engine.session().await?;
    session
        .begin()
        .await
        .map_err(|e| TransactionError::BeginFailed {
            message: e.to_string(),
        })?;

    let handle = TransactionHandle {
        db_id,
        session: Arc::new(Mutex::new(session)),
        savepoints: Arc::default(),
    };
    let result = AMBIENT.scope(handle.clone(), operation()).await;

    let mut session = match handle.lock().await {
        Ok(session) => session,
        Err(e) => {
            let mut session = handle.session.lock().await;
            let error = result.err().unwrap_or(e);
            return Err(abort(session.rollback().await, error));
        }
    };
    match result {
        Ok(value) => {
            session
                .commit()
                .await
                .map_err(|e| TransactionError::CommitFailed {
                    message: e.to_string(),
                })?;
            Ok(value)
        }
        Err(error) => Err(abort(session.rollback().await, error)),
    }
}

async fn with_savepoint<F, Fut, T>(handle: &TransactionHandle, operation: F) -> StorageResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let name = format!("sp_{}", uuid::Uuid::new_v4().simple());
    handle
        .lock()
        .await?
        .batch(&format!("SAVEPOINT {}", name))
        .await?;
    handle.savepoints.lock().open.push(name.clone());
    let mut guard = SavepointGuard {
        savepoints: &handle.savepoints,
        name,
        armed: true,
    };

    let result = operation().await;

    let mut session = handle.lock().await?;
    guard.armed = false;
    let name = std::mem::take(&mut guard.name);
    handle.savepoints.lock().close(&name);
    match result {
        Ok(value) => {
            session.batch(&format!("RELEASE SAVEPOINT {}", name)).await?;
            Ok(value)
        }
        Err(error) => {
            let rolled_back = session
                .batch(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"))
                .await;
            Err(abort(rolled_back, error))
        }
    }
}

fn abort(rollback: StorageResult<()>, error: StorageError) -> StorageError {
    match rollback {
        Ok(()) => TransactionError::Aborted {
            source: Box::new(error),
        }
        .into(),
        Err(rollback_error) => TransactionError::RollbackFailed {
            message: rollback_error.to_string(),
            cause: Some(Box::new(error)),
        }
        .into(),
    }
}

/// Like [`with_transaction`], but hands a failure to `on_error` after the
/// rollback instead of returning it.
pub async fn with_transaction_or_else<F, Fut, T, E>(
    engine: Arc<dyn Engine>,
    db_id: u64,
    operation: F,
    on_error: E,
) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
    E: FnOnce(StorageError) -> T,
{
    match with_transaction(engine, db_id, operation).await {
        Ok(value) => value,
        Err(error) => on_error(error),
    }
}

/// Like [`with_transaction`], but logs a failure and returns `None`.
pub async fn try_catch_in_transaction<F, Fut, T>(
    engine: Arc<dyn Engine>,
    db_id: u64,
    operation: F,
) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    match with_transaction(engine, db_id, operation).await {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::error!(error = %error, "transaction rolled back");
            None
        }
    }
}

/// Commits the ambient transaction of `db_id` and opens a new one on the same
/// session.
pub async fn commit_and_restart(db_id: u64) -> StorageResult<()> {
    let handle = ambient(db_id).ok_or(TransactionError::NoActiveTransaction)?;
    let mut session = handle.lock().await?;
    session
        .commit()
        .await
        .map_err(|e| TransactionError::CommitFailed {
            message: e.to_string(),
        })?;
    session
        .begin()
        .await
        .map_err(|e| TransactionError::BeginFailed {
            message: e.to_string(),
        })?;
    Ok(())
}
