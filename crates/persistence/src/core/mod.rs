//! Engine traits and the transaction coordinator.
//!
//! - [`Engine`] - owns connections and generates engine-specific DDL
//! - [`Session`] - one checked-out connection
//! - [`with_transaction`] and friends - ambient transactions scoped to a call
//!   chain

mod engine;
pub mod transaction;

pub use engine::{Engine, EngineKind, Session};
pub(crate) use engine::column_list;
pub use transaction::{
    TransactionHandle, commit_and_restart, in_transaction, try_catch_in_transaction,
    with_transaction, with_transaction_or_else,
};
