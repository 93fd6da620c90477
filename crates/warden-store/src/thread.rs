//! Thread record and the [`ThreadStore`] collaborator trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_core::ids::ThreadId;
use warden_core::messages::{Message, NewMessage};
use warden_core::policy::{Decision, RunConfig};

use crate::errors::{Result, StoreError};

/// The persisted record of one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    /// Thread id.
    pub id: ThreadId,
    /// Messages in append order.
    pub messages: Vec<Message>,
    /// Default run configuration for turns that do not supply one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_config: Option<RunConfig>,
    /// Most recent gate decision committed to this thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decision: Option<Decision>,
    /// ISO 8601 creation time.
    pub created_at: String,
}

impl Thread {
    /// A new, empty thread.
    pub fn new(run_config: Option<RunConfig>) -> Self {
        Self {
            id: ThreadId::new(),
            messages: Vec::new(),
            run_config,
            last_decision: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Number of messages, as used for optimistic appends.
    pub fn len(&self) -> u64 {
        self.messages.len() as u64
    }

    /// Whether the thread has no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Fail with [`StoreError::Conflict`] unless the thread has `expected` messages.
    pub fn check_len(&self, expected: u64) -> Result<()> {
        let actual = self.len();
        if actual == expected {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                thread_id: self.id.clone(),
                expected,
                actual,
            })
        }
    }
}

/// Everything one terminal run outcome writes, applied atomically.
#[derive(Clone, Debug, Default)]
pub struct TurnCommit {
    /// Thread length the writer observed.
    pub expected_len: u64,
    /// Messages to append, in order.
    pub messages: Vec<NewMessage>,
    /// Decision to record as the thread's last decision.
    pub decision: Option<Decision>,
}

/// Conversation history collaborator.
///
/// Writes are optimistic: the caller passes the length it last observed, and
/// the store refuses the write with [`StoreError::Conflict`] if another writer
/// got there first.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Create an empty thread.
    async fn create(&self, run_config: Option<RunConfig>) -> Result<Thread>;

    /// Read a thread with its full history.
    async fn get(&self, id: &ThreadId) -> Result<Thread>;

    /// Append one message at position `expected_len`.
    async fn append(&self, id: &ThreadId, expected_len: u64, message: NewMessage)
    -> Result<Message>;

    /// Append several messages and record a decision in one atomic step.
    async fn commit_turn(&self, id: &ThreadId, commit: TurnCommit) -> Result<Vec<Message>>;

    /// Replace the thread's default run configuration.
    async fn set_run_config(&self, id: &ThreadId, run_config: Option<RunConfig>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn check_len_reports_conflict() {
        let thread = Thread::new(None);
        assert!(thread.check_len(0).is_ok());
        assert_matches!(
            thread.check_len(1),
            Err(StoreError::Conflict {
                expected: 1,
                actual: 0,
                ..
            })
        );
    }

    #[test]
    fn serializes_camel_case_without_empty_options() {
        let value = serde_json::to_value(Thread::new(None)).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("runConfig").is_none());
        assert!(value.get("lastDecision").is_none());
    }
}
