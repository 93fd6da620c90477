//! # warden-store
//!
//! Persistence collaborators consumed by the turn runtime.
//!
//! - **Threads**: [`ThreadStore`] records each conversation's ordered message
//!   history, last gate decision and default run configuration. Writes are
//!   optimistic: every append states the length it expects the thread to have
//!   and fails with [`StoreError::Conflict`] otherwise.
//! - **Policies**: [`PolicyStore`] resolves policy ids to policy text.
//!
//! Backends: [`MemoryThreadStore`] and [`SqliteThreadStore`] for threads,
//! [`MemoryPolicyStore`] and [`DirPolicyStore`] for policies.

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod policy;
pub mod sqlite;
pub mod thread;

pub use errors::{Result, StoreError};
pub use memory::MemoryThreadStore;
pub use policy::{DirPolicyStore, MemoryPolicyStore, PolicyStore};
pub use sqlite::SqliteThreadStore;
pub use thread::{Thread, ThreadStore, TurnCommit};
