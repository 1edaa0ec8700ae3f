//! Storage backends for the change-detection engine.
//!
//! This crate provides:
//! - `PgStorage`: Postgres persistence for snapshots, activity, errors,
//!   balances and instance state, plus the schema migrations
//! - `MemoryStorage`: a shared-state in-memory backend with scriptable
//!   failures, used by tests and dry runs
//! - `classify_sqlx`: typed transient/fatal classification of sqlx errors

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;

pub use error::{classify_sqlx, is_transient_sqlstate};
pub use memory::{MemoryConnector, MemoryStorage, StorageOp};
pub use postgres::{PgConnector, PgStorage};
