//! `SQLite` backend for [`ThreadStore`](crate::ThreadStore).
//!
//! - **[`connection`]**: `r2d2` pool with WAL mode and foreign keys applied to
//!   every connection.
//! - **[`migrations`]**: versioned schema, embedded at compile time.
//! - **[`thread_store`]**: the store itself. Every write is one transaction;
//!   blocking database work runs on the blocking thread pool.

pub mod connection;
pub mod migrations;
pub mod thread_store;

pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use migrations::{current_version, latest_version, run_migrations};
pub use thread_store::SqliteThreadStore;
