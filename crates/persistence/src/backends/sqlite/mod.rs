//! SQLite engine.
//!
//! A file or in-memory database behind a single connection. Tenants share
//! the database file; their tables are told apart by a `namespace__` name
//! prefix.
//!
//! # Example
//!
//! ```no_run
//! use quarry_persistence::backends::sqlite::SqliteEngine;
//! use quarry_persistence::config::SqliteConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scratch = SqliteEngine::in_memory()?;
//! let on_disk = SqliteEngine::open(SqliteConfig::file("./data/quarry.db"))?;
//! # Ok(())
//! # }
//! ```

mod engine;
mod session;
mod values;

pub use engine::SqliteEngine;
pub use session::SqliteSession;
