//! Turn orchestrator: drives one run through the state machine.
//!
//! ```text
//! START         snapshot history, add the human message to the run's view
//! GATE_RUNNING  decision gate over the bundle's policy text
//! BLOCKED       commit the decision, no task output
//! ALLOWED       hand the rationale to the task agent as a directive
//! TASK_RUNNING  stream the task agent until done, then commit
//! DONE / ERROR  emit `end`
//! ```
//!
//! Every run emits exactly one `end`, after every other event of the run.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use warden_core::events::{FragmentAttribution, Node, RunEvent, RunEventKind, RunOutcome};
use warden_core::ids::{RunId, RunTag, ThreadId, TurnId};
use warden_core::messages::{Message, NewMessage};
use warden_core::policy::PolicyBundle;
use warden_llm::{ModelClient, ModelRequest};
use warden_settings::RuntimeSettings;
use warden_store::PolicyStore;

use crate::conversation::{ConversationState, RunCommit, TurnLedger};
use crate::errors::RunError;
use crate::executor::RunExecutor;
use crate::gate::{DecisionGate, GateVerdict};
use crate::prompts::{GATE_TOOL_NAME, task_system_prompt};
use crate::sink::EventSink;
use crate::state::{StateMachine, TurnState};

/// Orchestrator knobs.
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    /// Attribution of id-less gate fragments.
    pub fragment_attribution: FragmentAttribution,
    /// Cap on distinct gate call ids.
    pub max_tool_calls: usize,
    /// Cap on bundles per turn.
    pub max_bundles: usize,
    /// Capacity of the turn's event channel.
    pub channel_capacity: usize,
    /// Base system prompt of the task agent.
    pub task_system_prompt: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from(&RuntimeSettings::default())
    }
}

impl From<&RuntimeSettings> for RuntimeOptions {
    fn from(settings: &RuntimeSettings) -> Self {
        Self {
            fragment_attribution: settings.fragment_attribution,
            max_tool_calls: settings.max_tool_calls.max(1),
            max_bundles: settings.max_bundles,
            channel_capacity: settings.channel_capacity.max(1),
            task_system_prompt: settings.task_system_prompt.clone(),
        }
    }
}

/// Collaborators shared by every run.
pub struct TurnDeps {
    /// Model driving the gate agent.
    pub gate_client: Arc<dyn ModelClient>,
    /// Model driving the task agent.
    pub task_client: Arc<dyn ModelClient>,
    /// Policy documents.
    pub policies: Arc<dyn PolicyStore>,
    /// Thread access.
    pub conversation: Arc<ConversationState>,
    /// Knobs.
    pub options: RuntimeOptions,
}

/// Per-run inputs.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// Thread the turn belongs to.
    pub thread_id: ThreadId,
    /// Turn id.
    pub turn_id: TurnId,
    /// Bundle this run evaluates.
    pub bundle: PolicyBundle,
    /// Tag stamped on committed messages; `None` outside compare mode.
    pub stamp: Option<RunTag>,
    /// Thread history as read at turn start.
    pub history: Arc<Vec<Message>>,
    /// Turn ledger shared with sibling runs.
    pub ledger: Arc<TurnLedger>,
}

/// One run of a turn.
pub struct TurnOrchestrator {
    deps: Arc<TurnDeps>,
    ctx: RunContext,
    run_id: RunId,
    machine: StateMachine,
}

impl TurnOrchestrator {
    /// A run at [`TurnState::Start`].
    pub fn new(deps: Arc<TurnDeps>, ctx: RunContext) -> Self {
        let machine = StateMachine::new(ctx.bundle.tag.clone());
        Self {
            deps,
            ctx,
            run_id: RunId::new(),
            machine,
        }
    }

    /// Id of this run.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn tag(&self) -> &RunTag {
        &self.ctx.bundle.tag
    }

    fn event(&self, node: Node, kind: RunEventKind) -> RunEvent {
        RunEvent::new(self.tag().clone(), node, kind)
    }

    /// Drive the run to a terminal state, emitting its events and the final
    /// `end` to `sink`.
    #[instrument(skip_all, fields(
        thread_id = %self.ctx.thread_id,
        turn_id = %self.ctx.turn_id,
        run_tag = %self.ctx.bundle.tag,
        run_id = %self.run_id,
    ))]
    pub async fn run(mut self, sink: EventSink, cancel: CancellationToken) -> RunOutcome {
        let (outcome, node) = match self.drive(&sink, &cancel).await {
            Ok(outcome) => (outcome, Node::Task),
            Err(RunError::Cancelled) => {
                let node = self.failing_node();
                info!(state = %self.machine.state(), "run cancelled");
                self.machine.fail();
                (RunOutcome::Error, node)
            }
            Err(err) => {
                let node = self.failing_node();
                self.machine.fail();
                warn!(category = err.category(), error = %err, %node, "run failed");
                let reported = sink
                    .emit(self.event(
                        node,
                        RunEventKind::Error {
                            category: err.category().to_owned(),
                            message: err.to_string(),
                        },
                    ))
                    .await;
                if reported.is_err() {
                    info!("consumer gone before error could be reported");
                }
                (RunOutcome::Error, node)
            }
        };

        let end_node = if outcome == RunOutcome::Blocked { Node::Gate } else { node };
        let delivered = sink
            .emit_terminal(self.event(end_node, RunEventKind::End { outcome }))
            .await;
        info!(?outcome, delivered, history = ?self.machine.history(), "run finished");
        outcome
    }

    /// Node blamed for a failure in the current state.
    fn failing_node(&self) -> Node {
        match self.machine.state() {
            TurnState::Allowed | TurnState::TaskRunning | TurnState::Done => Node::Task,
            _ => Node::Gate,
        }
    }

    async fn drive(&mut self, sink: &EventSink, cancel: &CancellationToken) -> Result<RunOutcome, RunError> {
        // START: run-local view of history plus the new human message.
        let mut view: Vec<Message> = self
            .ctx
            .history
            .iter()
            .filter(|m| m.visible_to(self.tag()))
            .cloned()
            .collect();
        let human = self.ctx.ledger.human().clone();
        view.push(Message::from_new(human, self.ctx.history.len() as u64));

        self.machine.advance(TurnState::GateRunning)?;
        let policy_text = self.policy_text().await?;
        let verdict = self.run_gate(view.clone(), &policy_text, sink, cancel).await?;
        let decision = verdict.decision.clone();

        sink.emit(self.event(
            Node::Gate,
            RunEventKind::ToolResult {
                tool_call_id: verdict.call_id.clone(),
                name: Some(GATE_TOOL_NAME.to_owned()),
                content: json!({
                    "allow": decision.allow,
                    "rationale": decision.rationale,
                    "runId": decision.run_id,
                }),
                is_error: false,
            },
        ))
        .await?;

        if !decision.allow {
            self.machine.advance(TurnState::Blocked)?;
            self.commit(Vec::new(), verdict, cancel).await?;
            return Ok(RunOutcome::Blocked);
        }

        self.machine.advance(TurnState::Allowed)?;
        self.machine.advance(TurnState::TaskRunning)?;
        let messages = self.run_task(view, &decision.rationale, sink, cancel).await?;
        self.commit(messages, verdict, cancel).await?;
        self.machine.advance(TurnState::Done)?;
        Ok(RunOutcome::Done)
    }

    async fn policy_text(&self) -> Result<String, RunError> {
        let mut parts = Vec::with_capacity(self.ctx.bundle.policy_ids.len());
        for id in &self.ctx.bundle.policy_ids {
            parts.push(self.deps.policies.get(id).await?);
        }
        Ok(parts.join("\n\n"))
    }

    async fn run_gate(
        &self,
        view: Vec<Message>,
        policy_text: &str,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<GateVerdict, RunError> {
        let options = &self.deps.options;
        let executor = RunExecutor::new(Arc::clone(&self.deps.gate_client), Node::Gate, self.tag().clone());
        DecisionGate::new(executor, options.fragment_attribution, options.max_tool_calls)
            .decide(view, policy_text, self.run_id.clone(), self.tag().clone(), sink, cancel)
            .await
    }

    /// Stream the task agent; returns the messages to commit.
    async fn run_task(
        &self,
        view: Vec<Message>,
        rationale: &str,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewMessage>, RunError> {
        let prompt = task_system_prompt(&self.deps.options.task_system_prompt, rationale);
        let executor = RunExecutor::new(Arc::clone(&self.deps.task_client), Node::Task, self.tag().clone());
        let mut stream = executor.execute(ModelRequest::new(Node::Task, prompt, view), cancel);

        let mut text = String::new();
        let mut messages = Vec::new();
        while let Some(item) = stream.next().await {
            let event = item?;
            match &event.kind {
                RunEventKind::TextChunk { text: chunk } => text.push_str(chunk),
                RunEventKind::ToolResult {
                    tool_call_id,
                    name,
                    content,
                    is_error,
                } => messages.push(NewMessage::tool_result(json!({
                    "toolCallId": tool_call_id,
                    "name": name,
                    "content": content,
                    "isError": is_error,
                }))),
                _ => {}
            }
            sink.emit(event).await?;
        }
        messages.push(NewMessage::agent(text));
        Ok(messages)
    }

    async fn commit(
        &self,
        messages: Vec<NewMessage>,
        verdict: GateVerdict,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let messages = messages
            .into_iter()
            .map(|m| m.with_run_tag(self.ctx.stamp.clone()))
            .collect();
        let _ = self
            .deps
            .conversation
            .commit(
                &self.ctx.ledger,
                RunCommit {
                    messages,
                    decision: verdict.decision,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_settings() {
        let settings = RuntimeSettings {
            fragment_attribution: FragmentAttribution::Strict,
            max_tool_calls: 0,
            channel_capacity: 0,
            ..RuntimeSettings::default()
        };
        let options = RuntimeOptions::from(&settings);
        assert_eq!(options.fragment_attribution, FragmentAttribution::Strict);
        assert_eq!(options.max_tool_calls, 1);
        assert_eq!(options.channel_capacity, 1);
        assert_eq!(options.max_bundles, settings.max_bundles);
    }
}
