//! Run executor: drives one agent over the model-call collaborator.
//!
//! The model stream is opened lazily on first poll and re-emitted as
//! [`RunEvent`]s tagged with the run and node. The returned stream owns a
//! child cancellation token that fires when the stream is dropped, so a
//! consumer that stops listening also stops the underlying invocation.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, instrument};
use warden_core::events::{ModelEvent, Node, RunEvent, RunEventKind};
use warden_core::ids::RunTag;
use warden_llm::{ModelClient, ModelRequest, ProviderError};

use crate::errors::RunError;

type Item = Result<RunEvent, RunError>;

/// Events of one agent invocation.
///
/// Ends after the model's `done`, or after yielding exactly one error.
pub struct RunEventStream {
    inner: Pin<Box<dyn Stream<Item = Item> + Send>>,
    _cancel_on_drop: DropGuard,
}

impl Stream for RunEventStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Drives one agent (gate or task) for one run.
#[derive(Clone)]
pub struct RunExecutor {
    client: Arc<dyn ModelClient>,
    node: Node,
    run_tag: RunTag,
}

impl RunExecutor {
    /// Executor for `node` of the run tagged `run_tag`.
    pub fn new(client: Arc<dyn ModelClient>, node: Node, run_tag: RunTag) -> Self {
        Self {
            client,
            node,
            run_tag,
        }
    }

    /// Node this executor drives.
    pub fn node(&self) -> Node {
        self.node
    }

    /// Open the invocation. Nothing is sent until the stream is polled.
    #[instrument(skip_all, fields(run_tag = %self.run_tag, node = %self.node, client = self.client.name()))]
    pub fn execute(&self, request: ModelRequest, parent: &CancellationToken) -> RunEventStream {
        let token = parent.child_token();
        let cancel = token.clone();
        let client = Arc::clone(&self.client);
        let node = self.node;
        let run_tag = self.run_tag.clone();

        let inner = async_stream::stream! {
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ProviderError::Cancelled),
                opened = client.stream(&request, cancel.clone()) => opened,
            };
            let mut events = match opened {
                Ok(events) => events,
                Err(e) => {
                    let v: Item = Err(e.into());
                    yield v;
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    next = events.next() => Some(next),
                };
                let event = match next {
                    None => {
                        let v: Item = Err(RunError::Cancelled);
                        yield v;
                        return;
                    }
                    Some(None) => {
                        let v: Item = Err(if cancel.is_cancelled() {
                            RunError::Cancelled
                        } else {
                            RunError::ExternalCallFailure(ProviderError::Other {
                                message: "model stream ended before done".into(),
                            })
                        });
                        yield v;
                        return;
                    }
                    Some(Some(Err(e))) => {
                        let v: Item = Err(e.into());
                        yield v;
                        return;
                    }
                    Some(Some(Ok(event))) => event,
                };

                let kind = match event {
                    ModelEvent::Start => continue,
                    ModelEvent::TextDelta { delta } if delta.is_empty() => continue,
                    ModelEvent::TextDelta { delta } => RunEventKind::TextChunk { text: delta },
                    ModelEvent::ToolCallDelta { fragment } => RunEventKind::ToolCallChunk(fragment),
                    ModelEvent::ToolResult { tool_call_id, name, content, is_error } => {
                        RunEventKind::ToolResult { tool_call_id, name, content, is_error }
                    }
                    ModelEvent::Done { stop_reason } => {
                        debug!(%node, %run_tag, stop_reason = %stop_reason, "model stream done");
                        return;
                    }
                    ModelEvent::Error { error } => {
                        let v: Item = Err(RunError::ExternalCallFailure(ProviderError::Other {
                            message: error,
                        }));
                        yield v;
                        return;
                    }
                };
                let v: Item = Ok(RunEvent::new(run_tag.clone(), node, kind));
                yield v;
            }
        };

        RunEventStream {
            inner: Box::pin(inner),
            _cancel_on_drop: token.drop_guard(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use warden_core::events::ToolCallFragment;
    use warden_llm::scripted::{ScriptStep, ScriptedModelClient, text_reply};

    fn request() -> ModelRequest {
        ModelRequest::new(Node::Task, "be helpful", Vec::new())
    }

    fn executor(client: &Arc<ScriptedModelClient>) -> RunExecutor {
        let client: Arc<dyn ModelClient> = client.clone();
        RunExecutor::new(client, Node::Task, RunTag::from("lenient"))
    }

    async fn collect(stream: RunEventStream) -> Vec<Item> {
        stream.collect().await
    }

    #[tokio::test]
    async fn tags_events_and_stops_at_done() {
        let client = Arc::new(ScriptedModelClient::from_fn("task", |_| {
            let mut steps = text_reply(&["Why ", "", "did..."]);
            steps.push(ScriptStep::Event(ModelEvent::TextDelta {
                delta: "after done".into(),
            }));
            Ok(steps)
        }));
        let items = collect(executor(&client).execute(request(), &CancellationToken::new())).await;
        let texts: Vec<_> = items
            .into_iter()
            .map(|item| {
                let event = item.unwrap();
                assert_eq!(event.run_tag.as_str(), "lenient");
                assert_eq!(event.node, Node::Task);
                match event.kind {
                    RunEventKind::TextChunk { text } => text,
                    other => panic!("unexpected {other:?}"),
                }
            })
            .collect();
        assert_eq!(texts, vec!["Why ", "did..."]);
    }

    #[tokio::test]
    async fn forwards_fragments_and_tool_results() {
        let client = Arc::new(ScriptedModelClient::always(
            "task",
            vec![
                ModelEvent::ToolCallDelta {
                    fragment: ToolCallFragment::open("c1", "search"),
                },
                ModelEvent::ToolResult {
                    tool_call_id: "c1".into(),
                    name: Some("search".into()),
                    content: serde_json::json!({"hits": 1}),
                    is_error: false,
                },
                ModelEvent::Done {
                    stop_reason: "stop".into(),
                },
            ],
        ));
        let items = collect(executor(&client).execute(request(), &CancellationToken::new())).await;
        assert_eq!(items.len(), 2);
        assert_matches!(&items[0], Ok(e) if matches!(e.kind, RunEventKind::ToolCallChunk(_)));
        assert_matches!(&items[1], Ok(e) if e.kind.type_name() == "tool_result");
    }

    #[tokio::test]
    async fn missing_done_is_external_failure() {
        let client = Arc::new(ScriptedModelClient::always(
            "task",
            vec![ModelEvent::TextDelta { delta: "half".into() }],
        ));
        let items = collect(executor(&client).execute(request(), &CancellationToken::new())).await;
        assert_matches!(items.last(), Some(Err(RunError::ExternalCallFailure(_))));
    }

    #[tokio::test]
    async fn in_band_error_and_open_failure_surface() {
        let client = Arc::new(ScriptedModelClient::always(
            "task",
            vec![ModelEvent::Error {
                error: "overloaded".into(),
            }],
        ));
        let items = collect(executor(&client).execute(request(), &CancellationToken::new())).await;
        assert_matches!(&items[..], [Err(RunError::ExternalCallFailure(e))] if e.to_string() == "overloaded");

        let client = Arc::new(ScriptedModelClient::from_fn("task", |_| {
            Err(ProviderError::Auth {
                message: "bad key".into(),
            })
        }));
        let items = collect(executor(&client).execute(request(), &CancellationToken::new())).await;
        assert_matches!(&items[..], [Err(RunError::ExternalCallFailure(ProviderError::Auth { .. }))]);
    }

    #[tokio::test]
    async fn opening_is_lazy() {
        let client = Arc::new(ScriptedModelClient::from_fn("task", |_| Ok(text_reply(&["x"]))));
        let stream = executor(&client).execute(request(), &CancellationToken::new());
        assert_eq!(client.call_count(), 0);
        drop(stream);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_invocation() {
        let client = Arc::new(ScriptedModelClient::from_fn("task", |_| {
            Ok(vec![
                ScriptStep::Event(ModelEvent::TextDelta { delta: "a".into() }),
                ScriptStep::Hang,
            ])
        }));
        let parent = CancellationToken::new();
        let mut stream = executor(&client).execute(request(), &parent);
        assert!(stream.next().await.unwrap().is_ok());
        let token = client.calls()[0].cancel.clone();
        assert!(!token.is_cancelled());

        drop(stream);
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancel_ends_with_cancelled() {
        let client = Arc::new(ScriptedModelClient::from_fn("task", |_| Ok(vec![ScriptStep::Hang])));
        let parent = CancellationToken::new();
        let stream = executor(&client).execute(request(), &parent);
        let handle = tokio::spawn(collect(stream));
        tokio::task::yield_now().await;
        parent.cancel();
        let items = handle.await.unwrap();
        assert_matches!(&items[..], [Err(RunError::Cancelled)]);
    }
}
