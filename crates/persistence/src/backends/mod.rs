//! Database engine implementations.
//!
//! Each engine is gated behind a feature flag.
//!
//! | Engine | Feature | Namespaces |
//! |--------|---------|------------|
//! | SQLite | `sqlite` (default) | table-name prefix |
//! | PostgreSQL | `postgres` | schema |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use quarry_persistence::backends::sqlite::SqliteEngine;
//!
//! # #[cfg(feature = "sqlite")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SqliteEngine::in_memory()?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;
