//! Deterministic [`ModelClient`] driven by scripts.
//!
//! Each request is answered by a script produced from the request itself, so a
//! single client can play the gate for several policy bundles (keyed on the
//! system prompt) or the task agent for several turns. Every request and the
//! cancellation token handed with it is recorded for later inspection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use warden_core::events::{ModelEvent, ToolCallFragment};

use crate::provider::{ModelClient, ModelEventStream, ModelRequest, ProviderError, ProviderResult};

/// One step of a scripted stream.
#[derive(Debug)]
pub enum ScriptStep {
    /// Yield an event.
    Event(ModelEvent),
    /// Yield an error and end the stream.
    Fail(ProviderError),
    /// Sleep before the next step.
    Pause(Duration),
    /// Never yield again (until cancelled).
    Hang,
}

impl From<ModelEvent> for ScriptStep {
    fn from(event: ModelEvent) -> Self {
        Self::Event(event)
    }
}

type ScriptFn = dyn Fn(&ModelRequest) -> ProviderResult<Vec<ScriptStep>> + Send + Sync;

/// A request as seen by the scripted client.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    /// The request.
    pub request: ModelRequest,
    /// The token the caller supplied.
    pub cancel: CancellationToken,
}

/// Scripted model client.
pub struct ScriptedModelClient {
    name: String,
    script: Box<ScriptFn>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedModelClient {
    /// Answer every request with a script built from it. Returning `Err`
    /// makes [`ModelClient::stream`] itself fail.
    pub fn from_fn<F>(name: impl Into<String>, script: F) -> Self
    where
        F: Fn(&ModelRequest) -> ProviderResult<Vec<ScriptStep>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            script: Box::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every request with the same events.
    pub fn always(name: impl Into<String>, events: Vec<ModelEvent>) -> Self {
        Self::from_fn(name, move |_| {
            Ok(events.iter().cloned().map(ScriptStep::Event).collect())
        })
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of requests received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: &ModelRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<ModelEventStream> {
        self.calls.lock().push(RecordedCall {
            request: request.clone(),
            cancel: cancel.clone(),
        });
        let steps = (self.script)(request)?;

        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Event(event) => {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let v: ProviderResult<ModelEvent> = Ok(event);
                        yield v;
                    }
                    ScriptStep::Fail(err) => {
                        let v: ProviderResult<ModelEvent> = Err(err);
                        yield v;
                        return;
                    }
                    ScriptStep::Pause(duration) => {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            () = tokio::time::sleep(duration) => {}
                        }
                    }
                    ScriptStep::Hang => {
                        cancel.cancelled().await;
                        return;
                    }
                }
            }
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Script builders
// ─────────────────────────────────────────────────────────────────────────────

/// A plain text reply streamed as the given chunks.
pub fn text_reply(chunks: &[&str]) -> Vec<ScriptStep> {
    let mut steps = vec![ScriptStep::Event(ModelEvent::Start)];
    steps.extend(chunks.iter().map(|c| {
        ScriptStep::Event(ModelEvent::TextDelta {
            delta: (*c).to_owned(),
        })
    }));
    steps.push(ScriptStep::Event(ModelEvent::Done {
        stop_reason: "stop".into(),
    }));
    steps
}

/// A gate decision: one `allow_or_block` call whose argument text is split
/// into small fragments, with the id only on the first fragment.
pub fn gate_decision(call_id: &str, allow: bool, rationale: &str) -> Vec<ScriptStep> {
    let args = json!({"allow": allow, "rationale": rationale}).to_string();
    let mut steps = vec![
        ScriptStep::Event(ModelEvent::Start),
        ScriptStep::Event(ModelEvent::ToolCallDelta {
            fragment: ToolCallFragment::open(call_id, "allow_or_block"),
        }),
    ];
    let chars: Vec<char> = args.chars().collect();
    steps.extend(chars.chunks(5).map(|piece| {
        ScriptStep::Event(ModelEvent::ToolCallDelta {
            fragment: ToolCallFragment::orphan_args(piece.iter().collect::<String>()),
        })
    }));
    steps.push(ScriptStep::Event(ModelEvent::Done {
        stop_reason: "tool_calls".into(),
    }));
    steps
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
