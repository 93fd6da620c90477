//! In-process [`ThreadStore`] backend.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use warden_core::ids::ThreadId;
use warden_core::messages::{Message, NewMessage};
use warden_core::policy::RunConfig;

use crate::errors::{Result, StoreError};
use crate::thread::{Thread, ThreadStore, TurnCommit};

/// Threads held in a map behind a lock. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    threads: RwLock<HashMap<ThreadId, Thread>>,
}

impl MemoryThreadStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads held.
    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn create(&self, run_config: Option<RunConfig>) -> Result<Thread> {
        let thread = Thread::new(run_config);
        let _ = self
            .threads
            .write()
            .insert(thread.id.clone(), thread.clone());
        Ok(thread)
    }

    async fn get(&self, id: &ThreadId) -> Result<Thread> {
        self.threads
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ThreadNotFound(id.clone()))
    }

    async fn append(
        &self,
        id: &ThreadId,
        expected_len: u64,
        message: NewMessage,
    ) -> Result<Message> {
        let mut threads = self.threads.write();
        let thread = threads
            .get_mut(id)
            .ok_or_else(|| StoreError::ThreadNotFound(id.clone()))?;
        thread.check_len(expected_len)?;
        let message = Message::from_new(message, expected_len);
        thread.messages.push(message.clone());
        Ok(message)
    }

    async fn commit_turn(&self, id: &ThreadId, commit: TurnCommit) -> Result<Vec<Message>> {
        let mut threads = self.threads.write();
        let thread = threads
            .get_mut(id)
            .ok_or_else(|| StoreError::ThreadNotFound(id.clone()))?;
        thread.check_len(commit.expected_len)?;
        let appended: Vec<Message> = commit
            .messages
            .into_iter()
            .zip(commit.expected_len..)
            .map(|(new, seq)| Message::from_new(new, seq))
            .collect();
        thread.messages.extend(appended.iter().cloned());
        if let Some(decision) = commit.decision {
            thread.last_decision = Some(decision);
        }
        Ok(appended)
    }

    async fn set_run_config(&self, id: &ThreadId, run_config: Option<RunConfig>) -> Result<()> {
        let mut threads = self.threads.write();
        let thread = threads
            .get_mut(id)
            .ok_or_else(|| StoreError::ThreadNotFound(id.clone()))?;
        thread.run_config = run_config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn create_then_get() {
        let store = MemoryThreadStore::new();
        let thread = store.create(None).await.unwrap();
        let back = store.get(&thread.id).await.unwrap();
        assert_eq!(back, thread);
        assert_eq!(store.thread_count(), 1);
    }

    #[tokio::test]
    async fn stale_append_conflicts() {
        let store = MemoryThreadStore::new();
        let thread = store.create(None).await.unwrap();
        let _ = store
            .append(&thread.id, 0, NewMessage::human("a"))
            .await
            .unwrap();
        let err = store
            .append(&thread.id, 0, NewMessage::human("b"))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Conflict { actual: 1, .. });
    }
}
