//! Quarry Persistence Layer
//!
//! A generic, multi-tenant query layer over PostgreSQL and SQLite. Callers
//! describe what they want with JSON-shaped filters and select options; the
//! crate compiles them into parameterized SQL for the active engine, scopes
//! every statement to the ambient tenant's namespace, and coordinates
//! transactions across `.await` points.
//!
//! # Engine Features
//!
//! ```toml
//! [dependencies]
//! quarry-persistence = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! - `sqlite` (default) - SQLite, file or in-memory
//! - `postgres` - PostgreSQL via `deadpool-postgres`
//!
//! # Architecture
//!
//! - [`sql`] - identifier sanitizing, filter and option compilers, statement
//!   builders (pure, no I/O)
//! - [`core`] - the [`Engine`](core::Engine)/[`Session`](core::Session)
//!   traits and the transaction coordinator
//! - [`backends`] - the two engines
//! - [`tenant`] - ambient tenant context and namespace routing
//! - [`db`] - the [`Database`] facade
//! - [`config`] - connection and tenancy configuration
//! - [`error`] - error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use quarry_persistence::{Database, Where};
//! use quarry_persistence::sql::{InsertOptions, RowValues, SelectOptions};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let db = Database::sqlite_in_memory().await.unwrap();
//! db.execute_batch("CREATE TABLE books (id INTEGER PRIMARY KEY, author TEXT, pages INTEGER)")
//!     .await
//!     .unwrap();
//!
//! let row = RowValues::new().set("author", "Leo Tolstoy").set("pages", 728);
//! db.insert("books", &row, &InsertOptions::new()).await.unwrap();
//!
//! let filter = Where::from_json(&json!({"author": "Leo Tolstoy"})).unwrap();
//! let books = db.select("books", &filter, &SelectOptions::new()).await.unwrap();
//! assert_eq!(books[0]["pages"], json!(728));
//! # });
//! ```
//!
//! # Multitenancy
//!
//! The tenant is ambient. Everything awaited inside [`run_with_tenant`]
//! reads and writes that tenant's namespace:
//!
//! ```no_run
//! use quarry_persistence::{Database, Where, run_with_tenant};
//!
//! # async fn example(db: &Database) -> quarry_persistence::StorageResult<()> {
//! let n = run_with_tenant("acme", db.count("books", &Where::new())).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod sql;
pub mod tenant;

// Re-export commonly used types at crate root
pub use config::{ConnectionDescriptor, DatabaseConfig};
pub use db::{Database, TableFilter};
pub use error::{StorageError, StorageResult};
pub use sql::{SelectOptions, SqlValue, Where};
pub use tenant::{TenantContext, TenantId, run_with_tenant};

// Re-export core traits
pub use core::{Engine, EngineKind, Session};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
