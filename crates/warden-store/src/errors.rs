//! Error types for the persistence collaborators.

use thiserror::Error;
use warden_core::ids::ThreadId;

/// Errors returned by thread and policy stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested thread does not exist.
    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),

    /// Requested policy does not exist.
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// The thread changed since the caller read it.
    #[error("conflict on thread {thread_id}: expected {expected} messages, found {actual}")]
    Conflict {
        /// Thread written to.
        thread_id: ThreadId,
        /// Length the caller expected.
        expected: u64,
        /// Length actually found.
        actual: u64,
    },

    /// Internal error (e.g. a failed blocking task).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Error category string.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ThreadNotFound(_) => "thread_not_found",
            Self::PolicyNotFound(_) => "policy_not_found",
            Self::Conflict { .. } => "storage_conflict",
            Self::Sqlite(_)
            | Self::Pool(_)
            | Self::Serde(_)
            | Self::Migration { .. }
            | Self::Io(_)
            | Self::Internal(_) => "storage",
        }
    }

    /// Whether this is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display_and_category() {
        let err = StoreError::Conflict {
            thread_id: ThreadId::from_string("thr_1"),
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "conflict on thread thr_1: expected 2 messages, found 3"
        );
        assert_eq!(err.category(), "storage_conflict");
        assert!(err.is_conflict());
    }

    #[test]
    fn not_found_categories() {
        assert_eq!(
            StoreError::ThreadNotFound(ThreadId::from_string("t")).category(),
            "thread_not_found"
        );
        assert_eq!(
            StoreError::PolicyNotFound("p".into()).category(),
            "policy_not_found"
        );
    }

    #[test]
    fn sqlite_error_is_storage() {
        let err = StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
        assert_eq!(err.category(), "storage");
        assert!(!err.is_conflict());
    }
}
