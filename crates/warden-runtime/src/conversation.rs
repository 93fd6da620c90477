//! Conversation state: the orchestrator's read/write view of a thread.
//!
//! Runs never write while they stream. Each terminal outcome is committed in
//! one atomic [`TurnCommit`], serialized per thread by an async mutex. The
//! turn's human message rides along with whichever run commits first, so a
//! turn whose runs all fail or are cancelled leaves the thread untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use warden_core::ids::ThreadId;
use warden_core::messages::{Message, NewMessage};
use warden_core::policy::{Decision, RunConfig};
use warden_store::{StoreError, Thread, ThreadStore, TurnCommit};

use crate::errors::RunError;

/// Per-turn record of what has already been written.
#[derive(Debug)]
pub struct TurnLedger {
    thread_id: ThreadId,
    human: NewMessage,
    human_committed: AtomicBool,
}

impl TurnLedger {
    /// Ledger for a turn that appends `human` to `thread_id`.
    pub fn new(thread_id: ThreadId, human: NewMessage) -> Self {
        Self {
            thread_id,
            human,
            human_committed: AtomicBool::new(false),
        }
    }

    /// Thread the turn writes to.
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// The turn's human message.
    pub fn human(&self) -> &NewMessage {
        &self.human
    }

    /// Whether some run already committed the human message.
    pub fn human_committed(&self) -> bool {
        self.human_committed.load(Ordering::Acquire)
    }
}

/// What one run writes when it reaches `DONE` or `BLOCKED`.
#[derive(Clone, Debug)]
pub struct RunCommit {
    /// Run messages, already stamped as required.
    pub messages: Vec<NewMessage>,
    /// The run's decision.
    pub decision: Decision,
}

/// Thread access with per-thread write serialization.
pub struct ConversationState {
    threads: Arc<dyn ThreadStore>,
    locks: DashMap<ThreadId, Arc<Mutex<()>>>,
}

impl ConversationState {
    /// Wrap a thread store.
    pub fn new(threads: Arc<dyn ThreadStore>) -> Self {
        Self {
            threads,
            locks: DashMap::new(),
        }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.threads
    }

    /// Read a thread.
    pub async fn get(&self, id: &ThreadId) -> Result<Thread, StoreError> {
        self.threads.get(id).await
    }

    /// Create a thread.
    pub async fn create(&self, run_config: Option<RunConfig>) -> Result<Thread, StoreError> {
        let thread = self.threads.create(run_config).await?;
        debug!(thread_id = %thread.id, "thread created");
        Ok(thread)
    }

    /// Replace a thread's default run config.
    pub async fn set_run_config(
        &self,
        id: &ThreadId,
        run_config: Option<RunConfig>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock(id).await;
        self.threads.set_run_config(id, run_config).await
    }

    /// Commit one run's terminal outcome.
    ///
    /// On a length conflict the thread is re-read and the commit retried
    /// once; a second conflict is [`RunError::StorageConflict`].
    pub async fn commit(&self, ledger: &TurnLedger, run: RunCommit) -> Result<Vec<Message>, RunError> {
        let id = ledger.thread_id();
        let _guard = self.write_lock(id).await;

        let mut retried = false;
        loop {
            let thread = self.threads.get(id).await?;
            let include_human = !ledger.human_committed();
            let mut messages = Vec::with_capacity(run.messages.len() + 1);
            if include_human {
                messages.push(ledger.human().clone());
            }
            messages.extend(run.messages.iter().cloned());

            let commit = TurnCommit {
                expected_len: thread.len(),
                messages,
                decision: Some(run.decision.clone()),
            };
            match self.threads.commit_turn(id, commit).await {
                Ok(appended) => {
                    if include_human {
                        ledger.human_committed.store(true, Ordering::Release);
                    }
                    debug!(
                        thread_id = %id,
                        run_tag = %run.decision.run_tag,
                        appended = appended.len(),
                        "run committed"
                    );
                    return Ok(appended);
                }
                Err(e) if e.is_conflict() && !retried => {
                    warn!(thread_id = %id, error = %e, "commit conflict, retrying with fresh read");
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn write_lock(&self, id: &ThreadId) -> ThreadWriteGuard<'_> {
        let lock = Arc::clone(
            self.locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        ThreadWriteGuard {
            locks: &self.locks,
            id: id.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Exclusive write access to one thread.
///
/// On release the thread's lock entry is pruned unless another writer holds
/// or awaits it.
struct ThreadWriteGuard<'a> {
    locks: &'a DashMap<ThreadId, Arc<Mutex<()>>>,
    id: ThreadId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ThreadWriteGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let _ = self
            .locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use warden_core::ids::{RunId, RunTag};
    use warden_core::messages::Role;
    use warden_store::MemoryThreadStore;

    /// Store that reports a conflict on the first `failures` commits.
    struct Flaky {
        inner: MemoryThreadStore,
        failures: usize,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl ThreadStore for Flaky {
        async fn create(&self, run_config: Option<RunConfig>) -> warden_store::Result<Thread> {
            self.inner.create(run_config).await
        }
        async fn get(&self, id: &ThreadId) -> warden_store::Result<Thread> {
            self.inner.get(id).await
        }
        async fn append(&self, id: &ThreadId, expected_len: u64, message: NewMessage) -> warden_store::Result<Message> {
            self.inner.append(id, expected_len, message).await
        }
        async fn commit_turn(&self, id: &ThreadId, commit: TurnCommit) -> warden_store::Result<Vec<Message>> {
            if self.commits.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(StoreError::Conflict {
                    thread_id: id.clone(),
                    expected: commit.expected_len,
                    actual: commit.expected_len + 1,
                });
            }
            self.inner.commit_turn(id, commit).await
        }
        async fn set_run_config(&self, id: &ThreadId, run_config: Option<RunConfig>) -> warden_store::Result<()> {
            self.inner.set_run_config(id, run_config).await
        }
    }

    fn decision(tag: &str, allow: bool) -> Decision {
        Decision {
            allow,
            rationale: "r".into(),
            run_id: RunId::new(),
            run_tag: RunTag::from(tag),
        }
    }

    async fn setup(failures: usize) -> (ConversationState, Arc<Flaky>, ThreadId) {
        let store = Arc::new(Flaky {
            inner: MemoryThreadStore::new(),
            failures,
            commits: AtomicUsize::new(0),
        });
        let state = ConversationState::new(store.clone());
        let thread = state.create(None).await.unwrap();
        (state, store, thread.id)
    }

    #[tokio::test]
    async fn human_message_rides_with_first_commit_only() {
        let (state, _, id) = setup(0).await;
        let ledger = TurnLedger::new(id.clone(), NewMessage::human("tell me a joke"));

        let first = state
            .commit(
                &ledger,
                RunCommit {
                    messages: vec![NewMessage::agent("a").with_run_tag(Some(RunTag::from("lenient")))],
                    decision: decision("lenient", true),
                },
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].role, Role::Human);
        assert!(ledger.human_committed());

        let second = state
            .commit(
                &ledger,
                RunCommit {
                    messages: Vec::new(),
                    decision: decision("strict", false),
                },
            )
            .await
            .unwrap();
        assert!(second.is_empty());

        let thread = state.get(&id).await.unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.last_decision.unwrap().run_tag.as_str(), "strict");
    }

    #[tokio::test]
    async fn one_conflict_is_retried() {
        let (state, store, id) = setup(1).await;
        let ledger = TurnLedger::new(id.clone(), NewMessage::human("q"));
        let appended = state
            .commit(
                &ledger,
                RunCommit {
                    messages: vec![NewMessage::agent("a")],
                    decision: decision("default", true),
                },
            )
            .await
            .unwrap();
        assert_eq!(appended.len(), 2);
        assert_eq!(store.commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_conflict_is_fatal_and_writes_nothing() {
        let (state, store, id) = setup(2).await;
        let ledger = TurnLedger::new(id.clone(), NewMessage::human("q"));
        let err = state
            .commit(
                &ledger,
                RunCommit {
                    messages: vec![NewMessage::agent("a")],
                    decision: decision("default", true),
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err, RunError::StorageConflict { .. });
        assert_eq!(store.commits.load(Ordering::SeqCst), 2);
        assert!(!ledger.human_committed());
        assert!(state.get(&id).await.unwrap().messages.is_empty());
        assert!(state.locks.is_empty());
    }

    #[tokio::test]
    async fn concurrent_commits_serialize() {
        let (state, _, id) = setup(0).await;
        let state = Arc::new(state);
        let ledger = Arc::new(TurnLedger::new(id.clone(), NewMessage::human("q")));
        let mut handles = Vec::new();
        for tag in ["a", "b", "c", "d"] {
            let state = Arc::clone(&state);
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                state
                    .commit(
                        &ledger,
                        RunCommit {
                            messages: vec![NewMessage::agent(tag).with_run_tag(Some(RunTag::from(tag)))],
                            decision: decision(tag, true),
                        },
                    )
                    .await
            }));
        }
        for handle in handles {
            let _ = handle.await.unwrap().unwrap();
        }
        let thread = state.get(&id).await.unwrap();
        assert_eq!(thread.messages.len(), 5);
        assert_eq!(
            thread.messages.iter().filter(|m| m.role == Role::Human).count(),
            1
        );
        assert!(state.locks.is_empty());
    }

    #[tokio::test]
    async fn write_locks_are_released_per_thread() {
        let (state, _, id) = setup(0).await;
        let other = state.create(None).await.unwrap().id;

        let held = state.write_lock(&id).await;
        state.set_run_config(&other, None).await.unwrap();
        assert_eq!(state.locks.len(), 1);
        assert!(state.locks.contains_key(&id));

        drop(held);
        assert!(state.locks.is_empty());
    }
}
