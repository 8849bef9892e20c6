//! PostgreSQL engine.
//!
//! Connections come from a `deadpool-postgres` pool. Every tenant namespace
//! is a schema, so tables are referenced as `"tenant"."table"`.
//!
//! # Example
//!
//! ```no_run
//! use quarry_persistence::backends::postgres::PostgresEngine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PostgresEngine::from_connection_string("postgres://quarry@localhost/quarry").await?;
//! # Ok(())
//! # }
//! ```

mod engine;
mod session;
mod values;

pub use engine::PostgresEngine;
pub use session::PostgresSession;
