//! Error types for the query layer.
//!
//! Errors are grouped by where they originate: filter compilation, row lookup,
//! constraint enforcement, tenant resolution, transactions, configuration, and
//! the storage engines themselves. [`StorageError`] wraps all of them.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::tenant::TenantId;

/// The primary error type for all query layer operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A filter, select option or identifier could not be compiled.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Row lookup errors
    #[error(transparent)]
    Row(#[from] RowError),

    /// Integrity constraint violations
    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    /// Tenant resolution errors
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Transaction errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Engine-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors raised while compiling filters and select options.
///
/// These are always returned before any statement reaches the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// The operator object for a field contains a key the compiler does not know.
    #[error("unknown filter operator '{operator}' on field '{field}'")]
    UnknownOperator { field: String, operator: String },

    /// The filter or options have the wrong shape.
    #[error("malformed filter: {message}")]
    Malformed { message: String },

    /// A limit or offset that is not a non-negative integer.
    #[error("invalid {name}: {value}")]
    InvalidCount { name: &'static str, value: String },

    /// An identifier that sanitizes to nothing.
    #[error("identifier '{raw}' is empty after sanitization")]
    EmptyIdentifier { raw: String },

    /// An identifier that is valid SQL but reserved by the namespace layout.
    #[error("identifier '{name}' is reserved: {reason}")]
    ReservedIdentifier { name: String, reason: String },

    /// An order expression names a function or operator outside the allow-list.
    #[error("'{name}' is not allowed in an order expression")]
    DisallowedExpression { name: String },

    /// A full-text search language outside the allow-list.
    #[error("unsupported text search language: {language}")]
    UnsupportedLanguage { language: String },
}

impl FilterError {
    /// Shorthand for [`FilterError::Malformed`].
    pub fn malformed(message: impl Into<String>) -> Self {
        FilterError::Malformed {
            message: message.into(),
        }
    }
}

/// Errors related to row lookup.
#[derive(Error, Debug)]
pub enum RowError {
    /// A single-row lookup matched nothing.
    #[error("no {table} where {predicate}")]
    NotFound { table: String, predicate: String },
}

/// Integrity constraint violations reported by the engine.
#[derive(Error, Debug)]
pub enum ConstraintError {
    /// A unique or primary key constraint was violated.
    #[error("unique constraint violated: {message}")]
    Unique {
        message: String,
        constraint: Option<String>,
    },

    /// A foreign key constraint was violated.
    #[error("foreign key constraint violated: {message}")]
    ForeignKey {
        message: String,
        constraint: Option<String>,
    },

    /// A NOT NULL constraint was violated.
    #[error("not-null constraint violated: {message}")]
    NotNull { message: String },

    /// A CHECK constraint was violated.
    #[error("check constraint violated: {message}")]
    Check {
        message: String,
        constraint: Option<String>,
    },
}

/// Errors related to tenant resolution.
#[derive(Error, Debug)]
pub enum TenantError {
    /// The tenant identifier cannot be mapped to a namespace.
    #[error("invalid tenant {tenant_id}: {reason}")]
    InvalidTenant { tenant_id: TenantId, reason: String },
}

/// Errors related to transactions.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The transaction body failed; the transaction was rolled back.
    #[error("transaction aborted: {source}")]
    Aborted {
        #[source]
        source: Box<StorageError>,
    },

    /// BEGIN could not be issued.
    #[error("failed to begin transaction: {message}")]
    BeginFailed { message: String },

    /// COMMIT failed; the session rolls back on release.
    #[error("failed to commit transaction: {message}")]
    CommitFailed { message: String },

    /// ROLLBACK failed after the body returned an error.
    #[error("failed to roll back transaction: {message}")]
    RollbackFailed {
        message: String,
        #[source]
        cause: Option<Box<StorageError>>,
    },

    /// An operation that needs an ambient transaction ran outside one.
    #[error("no active transaction")]
    NoActiveTransaction,
}

/// Errors in connection configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is out of range or unparsable.
    #[error("invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },

    /// The configuration file could not be read or parsed.
    #[error("failed to load configuration from {path}: {message}")]
    Load { path: String, message: String },

    /// The configured engine was not compiled in.
    #[error("engine '{engine}' is not enabled in this build")]
    EngineDisabled { engine: String },
}

/// Errors originating from the storage engine.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the engine failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// No pooled connection became available in time.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// The engine was closed explicitly.
    #[error("the database connection is closed")]
    Closed,

    /// The database file is locked by another process.
    #[error("{backend_name} database is busy: {message}")]
    Busy {
        backend_name: String,
        message: String,
    },

    /// Internal engine error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

impl StorageError {
    /// Returns the underlying cause, looking through [`TransactionError::Aborted`].
    pub fn root(&self) -> &StorageError {
        match self {
            StorageError::Transaction(TransactionError::Aborted { source }) => source.root(),
            other => other,
        }
    }

    /// Returns `true` if a single-row lookup found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), StorageError::Row(RowError::NotFound { .. }))
    }

    /// Returns `true` for any integrity constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self.root(), StorageError::Constraint(_))
    }

    /// Returns `true` if the filter or options were rejected before execution.
    pub fn is_invalid_filter(&self) -> bool {
        matches!(self.root(), StorageError::Filter(_))
    }

    /// Returns `true` for connection-level failures.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.root(),
            StorageError::Backend(
                BackendError::ConnectionFailed { .. }
                    | BackendError::PoolExhausted { .. }
                    | BackendError::Closed
                    | BackendError::Busy { .. }
            )
        )
    }

    /// Returns `true` if the transaction body failed and was rolled back.
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            StorageError::Transaction(TransactionError::Aborted { .. })
        )
    }
}

/// Result type alias for query layer operations.
pub type StorageResult<T> = Result<T, StorageError>;

// Implement conversions from common error types

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        use rusqlite::ffi;

        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            let message = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::ConstraintViolation => {
                    return StorageError::Constraint(match failure.extended_code {
                        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintError::ForeignKey {
                            message,
                            constraint: None,
                        },
                        ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintError::NotNull { message },
                        ffi::SQLITE_CONSTRAINT_CHECK => ConstraintError::Check {
                            message,
                            constraint: None,
                        },
                        _ => ConstraintError::Unique {
                            message,
                            constraint: None,
                        },
                    });
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return StorageError::Backend(BackendError::Busy {
                        backend_name: "sqlite".to_string(),
                        message,
                    });
                }
                ErrorCode::CannotOpen => {
                    return StorageError::Backend(BackendError::ConnectionFailed {
                        backend_name: "sqlite".to_string(),
                        message,
                    });
                }
                _ => {}
            }
        }

        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        if err.is_closed() {
            return StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "postgres".to_string(),
                message: err.to_string(),
            });
        }

        if let Some(db_error) = err.as_db_error() {
            let message = db_error.message().to_string();
            let constraint = db_error.constraint().map(str::to_string);
            let code = db_error.code();
            if *code == SqlState::UNIQUE_VIOLATION {
                return ConstraintError::Unique {
                    message,
                    constraint,
                }
                .into();
            }
            if *code == SqlState::FOREIGN_KEY_VIOLATION {
                return ConstraintError::ForeignKey {
                    message,
                    constraint,
                }
                .into();
            }
            if *code == SqlState::NOT_NULL_VIOLATION {
                return ConstraintError::NotNull { message }.into();
            }
            if *code == SqlState::CHECK_VIOLATION {
                return ConstraintError::Check {
                    message,
                    constraint,
                }
                .into();
            }
            return StorageError::Backend(BackendError::QueryError {
                message: format!("{} ({})", message, code.code()),
            });
        }

        StorageError::Backend(BackendError::Internal {
            backend_name: "postgres".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        use deadpool_postgres::PoolError;

        match err {
            PoolError::Timeout(_) => StorageError::Backend(BackendError::PoolExhausted {
                backend_name: "postgres".to_string(),
            }),
            PoolError::Closed => StorageError::Backend(BackendError::Closed),
            PoolError::Backend(e) => e.into(),
            other => StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "postgres".to_string(),
                message: other.to_string(),
            }),
        }
    }
}
