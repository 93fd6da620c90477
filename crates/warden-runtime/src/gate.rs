//! Decision gate: one gate-agent invocation whose only valid output is a
//! single `allow_or_block` call.
//!
//! Fragments are buffered in a [`ToolCallAccumulator`] and parsed once the
//! stream ends. A second call id or a tool result fails the run early with
//! [`RunError::ProtocolViolation`]; a stream with no call at all fails with
//! [`RunError::NoDecision`]. Nothing is defaulted.

use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use warden_core::events::{FragmentAttribution, RunEventKind};
use warden_core::ids::{RunId, RunTag};
use warden_core::messages::Message;
use warden_core::policy::Decision;
use warden_llm::{ModelRequest, ToolCallAccumulator};

use crate::errors::RunError;
use crate::executor::RunExecutor;
use crate::prompts::{GATE_TOOL_NAME, gate_system_prompt, gate_tool};
use crate::sink::EventSink;

/// Argument set of the `allow_or_block` call.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateArgs {
    /// Whether the task agent may run.
    pub allow: bool,
    /// Optional justification.
    #[serde(default)]
    pub rationale: Option<String>,
}

/// A decision together with the call that produced it.
#[derive(Clone, Debug)]
pub struct GateVerdict {
    /// The decision.
    pub decision: Decision,
    /// Id of the `allow_or_block` call.
    pub call_id: String,
}

/// Drives the gate agent to a [`Decision`].
pub struct DecisionGate {
    executor: RunExecutor,
    attribution: FragmentAttribution,
    max_calls: usize,
}

impl DecisionGate {
    /// Gate over `executor`.
    pub fn new(executor: RunExecutor, attribution: FragmentAttribution, max_calls: usize) -> Self {
        Self {
            executor,
            attribution,
            max_calls,
        }
    }

    /// Evaluate `history` against `policy_text`, forwarding the gate's
    /// output to `sink` as it streams.
    #[instrument(skip_all, fields(run_id = %run_id, run_tag = %run_tag))]
    pub async fn decide(
        &self,
        history: Vec<Message>,
        policy_text: &str,
        run_id: RunId,
        run_tag: RunTag,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<GateVerdict, RunError> {
        let request = ModelRequest::new(
            self.executor.node(),
            gate_system_prompt(policy_text),
            history,
        )
        .with_tool(gate_tool())
        .with_tool_choice(GATE_TOOL_NAME);

        let mut accumulator = ToolCallAccumulator::new(self.attribution).with_max_calls(self.max_calls);
        let mut text = String::new();
        let mut stream = self.executor.execute(request, cancel);

        while let Some(item) = stream.next().await {
            let event = item?;
            match &event.kind {
                RunEventKind::TextChunk { text: chunk } => text.push_str(chunk),
                RunEventKind::ToolCallChunk(fragment) => {
                    accumulator.push(fragment)?;
                    if accumulator.len() > 1 {
                        return Err(RunError::ProtocolViolation(format!(
                            "gate opened {} tool calls, expected one",
                            accumulator.len()
                        )));
                    }
                }
                RunEventKind::ToolResult { .. } => {
                    return Err(RunError::ProtocolViolation(
                        "gate agent ran a tool instead of deciding".into(),
                    ));
                }
                RunEventKind::Error { .. } | RunEventKind::End { .. } => {}
            }
            sink.emit(event).await?;
        }
        drop(stream);

        let verdict = Self::finish(&accumulator, &text, run_id, run_tag)?;
        debug!(
            allow = verdict.decision.allow,
            call_id = %verdict.call_id,
            "gate decided"
        );
        Ok(verdict)
    }

    fn finish(
        accumulator: &ToolCallAccumulator,
        text: &str,
        run_id: RunId,
        run_tag: RunTag,
    ) -> Result<GateVerdict, RunError> {
        let call = match accumulator.calls() {
            [] if accumulator.has_pending() => {
                return Err(RunError::MalformedToolCall {
                    call_id: String::new(),
                    message: "argument fragments arrived without any call id".into(),
                });
            }
            [] => return Err(RunError::NoDecision),
            [call] => call,
            calls => {
                return Err(RunError::ProtocolViolation(format!(
                    "gate opened {} tool calls, expected one",
                    calls.len()
                )));
            }
        };
        if call.name != GATE_TOOL_NAME {
            return Err(RunError::ProtocolViolation(format!(
                "gate called `{}`, expected `{GATE_TOOL_NAME}`",
                call.name
            )));
        }

        let args: GateArgs = accumulator.finalize_as(&call.id)?;
        let rationale = args
            .rationale
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| text.trim().to_owned());

        Ok(GateVerdict {
            decision: Decision {
                allow: args.allow,
                rationale,
                run_id,
                run_tag,
            },
            call_id: call.id.clone(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;
    use warden_core::events::{ModelEvent, Node, RunEvent, ToolCallFragment};
    use warden_llm::ModelClient;
    use warden_llm::scripted::{ScriptStep, ScriptedModelClient, gate_decision};

    fn gate_over(steps: Vec<ModelEvent>) -> (DecisionGate, Arc<ScriptedModelClient>) {
        gate_with(FragmentAttribution::Latest, move |_| {
            Ok(steps.iter().cloned().map(ScriptStep::Event).collect())
        })
    }

    fn gate_with<F>(attribution: FragmentAttribution, script: F) -> (DecisionGate, Arc<ScriptedModelClient>)
    where
        F: Fn(&ModelRequest) -> warden_llm::ProviderResult<Vec<ScriptStep>> + Send + Sync + 'static,
    {
        let client = Arc::new(ScriptedModelClient::from_fn("gate", script));
        let dyn_client: Arc<dyn ModelClient> = client.clone();
        let executor = RunExecutor::new(dyn_client, Node::Gate, RunTag::default_tag());
        (DecisionGate::new(executor, attribution, 4), client)
    }

    async fn run(gate: &DecisionGate) -> (Result<GateVerdict, RunError>, Vec<RunEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let sink = EventSink::new(tx, CancellationToken::new());
        let result = gate
            .decide(
                Vec::new(),
                "No violence.",
                RunId::new(),
                RunTag::default_tag(),
                &sink,
                &CancellationToken::new(),
            )
            .await;
        drop(sink);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    fn done() -> ModelEvent {
        ModelEvent::Done {
            stop_reason: "tool_calls".into(),
        }
    }

    fn frag(fragment: ToolCallFragment) -> ModelEvent {
        ModelEvent::ToolCallDelta { fragment }
    }

    #[tokio::test]
    async fn split_arguments_accumulate_to_decision() {
        let (gate, client) = gate_over(vec![
            frag(ToolCallFragment::open("a", GATE_TOOL_NAME)),
            frag(ToolCallFragment::args("a", "{\"al")),
            frag(ToolCallFragment::args("a", "low\":true}")),
            done(),
        ]);
        let (result, events) = run(&gate).await;
        let verdict = result.unwrap();
        assert!(verdict.decision.allow);
        assert_eq!(verdict.call_id, "a");
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.node == Node::Gate));

        let request = &client.calls()[0].request;
        assert_eq!(request.tool_choice.as_deref(), Some(GATE_TOOL_NAME));
        assert!(request.system_prompt.contains("No violence."));
    }

    #[tokio::test]
    async fn scripted_decision_with_rationale() {
        let (gate, _) = gate_with(FragmentAttribution::Strict, |_| {
            Ok(gate_decision("call_1", false, "graphic violence"))
        });
        let verdict = run(&gate).await.0.unwrap();
        assert!(!verdict.decision.allow);
        assert_eq!(verdict.decision.rationale, "graphic violence");
    }

    #[tokio::test]
    async fn rationale_falls_back_to_streamed_text() {
        let (gate, _) = gate_over(vec![
            ModelEvent::TextDelta {
                delta: " benign request ".into(),
            },
            frag(ToolCallFragment::open("a", GATE_TOOL_NAME)),
            frag(ToolCallFragment::orphan_args("{\"allow\": true}")),
            done(),
        ]);
        let verdict = run(&gate).await.0.unwrap();
        assert_eq!(verdict.decision.rationale, "benign request");
    }

    #[tokio::test]
    async fn text_only_is_no_decision() {
        let (gate, _) = gate_over(vec![
            ModelEvent::TextDelta {
                delta: "I think this is fine".into(),
            },
            done(),
        ]);
        assert_matches!(run(&gate).await.0, Err(RunError::NoDecision));
    }

    #[tokio::test]
    async fn second_call_is_protocol_violation() {
        let (gate, _) = gate_over(vec![
            frag(ToolCallFragment::open("a", GATE_TOOL_NAME)),
            frag(ToolCallFragment::open("b", GATE_TOOL_NAME)),
            done(),
        ]);
        let (result, events) = run(&gate).await;
        assert_matches!(result, Err(RunError::ProtocolViolation(_)));
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn other_tool_is_protocol_violation() {
        let (gate, _) = gate_over(vec![
            frag(ToolCallFragment::open("a", "web_search")),
            frag(ToolCallFragment::args("a", "{}")),
            done(),
        ]);
        assert_matches!(run(&gate).await.0, Err(RunError::ProtocolViolation(m)) if m.contains("web_search"));
    }

    #[tokio::test]
    async fn tool_result_is_protocol_violation() {
        let (gate, _) = gate_over(vec![
            ModelEvent::ToolResult {
                tool_call_id: "x".into(),
                name: None,
                content: serde_json::json!("ok"),
                is_error: false,
            },
            done(),
        ]);
        assert_matches!(run(&gate).await.0, Err(RunError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn unparseable_or_extra_arguments_are_malformed() {
        let (gate, _) = gate_over(vec![
            frag(ToolCallFragment::open("a", GATE_TOOL_NAME)),
            frag(ToolCallFragment::args("a", "{\"allow\": tru")),
            done(),
        ]);
        assert_matches!(run(&gate).await.0, Err(RunError::MalformedToolCall { call_id, .. }) if call_id == "a");

        let (gate, _) = gate_over(vec![
            frag(ToolCallFragment::open("a", GATE_TOOL_NAME)),
            frag(ToolCallFragment::args("a", "{\"allow\": true, \"confidence\": 0.9}")),
            done(),
        ]);
        assert_matches!(run(&gate).await.0, Err(RunError::MalformedToolCall { .. }));
    }

    #[tokio::test]
    async fn orphan_fragments_without_any_id_are_malformed() {
        let (gate, _) = gate_over(vec![
            frag(ToolCallFragment::orphan_args("{\"allow\": true}")),
            done(),
        ]);
        assert_matches!(run(&gate).await.0, Err(RunError::MalformedToolCall { .. }));
    }

    #[tokio::test]
    async fn strict_attribution_rejects_orphans_before_open() {
        let (gate, _) = gate_with(FragmentAttribution::Strict, |_| {
            Ok(vec![
                ScriptStep::Event(frag(ToolCallFragment::orphan_args("{"))),
                ScriptStep::Event(done()),
            ])
        });
        assert_matches!(run(&gate).await.0, Err(RunError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn provider_failure_is_external() {
        let (gate, _) = gate_with(FragmentAttribution::Latest, |_| {
            Ok(vec![ScriptStep::Fail(warden_llm::ProviderError::Timeout { after_ms: 10 })])
        });
        assert_matches!(run(&gate).await.0, Err(RunError::ExternalCallFailure(_)));
    }
}
