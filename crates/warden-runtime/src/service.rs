//! Service facade: validates a turn request, resolves its thread and run
//! config, and starts the multiplexer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use warden_core::ids::{ThreadId, TurnId};
use warden_core::policy::RunConfig;
use warden_store::Thread;

use crate::conversation::ConversationState;
use crate::errors::TurnError;
use crate::multiplexer::{CompareMultiplexer, TurnPlan, TurnStream};
use crate::orchestrator::TurnDeps;
use crate::registry::TurnRegistry;

/// Inbound turn request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Existing thread, or `None` to create one.
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    /// The human message.
    pub human_content: String,
    /// Policy bundles for this turn; falls back to the thread default, then
    /// the configured default.
    #[serde(default)]
    pub run_config: Option<RunConfig>,
    /// Save the resolved config as the thread default.
    #[serde(default)]
    pub persist_run_config: bool,
}

impl TurnRequest {
    /// A request on a new thread.
    pub fn new(human_content: impl Into<String>) -> Self {
        Self {
            human_content: human_content.into(),
            ..Self::default()
        }
    }

    /// Continue an existing thread.
    #[must_use]
    pub fn on_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Use an explicit run config.
    #[must_use]
    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = Some(run_config);
        self
    }
}

/// Entry point for starting, aborting and inspecting turns.
pub struct TurnService {
    deps: Arc<TurnDeps>,
    multiplexer: CompareMultiplexer,
    registry: Arc<TurnRegistry>,
    default_run_config: RunConfig,
    shutdown: CancellationToken,
}

impl TurnService {
    /// Service over `deps`, using `default_run_config` when neither the
    /// request nor the thread names one.
    pub fn new(deps: TurnDeps, default_run_config: RunConfig) -> Self {
        let deps = Arc::new(deps);
        Self {
            multiplexer: CompareMultiplexer::new(Arc::clone(&deps)),
            deps,
            registry: Arc::new(TurnRegistry::new()),
            default_run_config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Thread access.
    pub fn conversation(&self) -> &Arc<ConversationState> {
        &self.deps.conversation
    }

    /// Live turns.
    pub fn registry(&self) -> &Arc<TurnRegistry> {
        &self.registry
    }

    /// Start a turn and return its event stream.
    #[instrument(skip_all, fields(thread_id = ?request.thread_id))]
    pub async fn start_turn(&self, request: TurnRequest) -> Result<TurnStream, TurnError> {
        if self.shutdown.is_cancelled() {
            return Err(TurnError::ShuttingDown);
        }
        if request.human_content.trim().is_empty() {
            return Err(TurnError::EmptyContent);
        }

        let conversation = &self.deps.conversation;
        let existing = match &request.thread_id {
            Some(id) => Some(conversation.get(id).await?),
            None => None,
        };

        let run_config = request
            .run_config
            .or_else(|| existing.as_ref().and_then(|t| t.run_config.clone()))
            .unwrap_or_else(|| self.default_run_config.clone());
        run_config
            .validate(self.deps.options.max_bundles)
            .map_err(TurnError::InvalidRunConfig)?;

        let persisted = request.persist_run_config.then(|| run_config.clone());
        let thread = match existing {
            Some(thread) => {
                if persisted.is_some() {
                    conversation.set_run_config(&thread.id, persisted).await?;
                }
                thread
            }
            None => conversation.create(persisted).await?,
        };

        let turn_id = TurnId::new();
        let cancel = self.shutdown.child_token();
        let guard = self.registry.register(turn_id.clone(), cancel.clone());
        debug!(
            thread_id = %thread.id,
            %turn_id,
            history = thread.messages.len(),
            "turn accepted"
        );

        let plan = TurnPlan {
            thread_id: thread.id,
            turn_id,
            human_content: request.human_content,
            run_config,
            history: thread.messages,
        };
        Ok(self.multiplexer.start(plan, cancel).with_registration(guard))
    }

    /// Read a thread.
    pub async fn thread(&self, id: &ThreadId) -> Result<Thread, TurnError> {
        Ok(self.deps.conversation.get(id).await?)
    }

    /// Cancel every run of a live turn.
    pub fn abort(&self, turn_id: &TurnId) -> bool {
        self.registry.abort(turn_id)
    }

    /// Number of live turns.
    pub fn active_turns(&self) -> usize {
        self.registry.active_count()
    }

    /// Refuse new turns and cancel the live ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let cancelled = self.registry.cancel_all();
        info!(cancelled, "turn service shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
