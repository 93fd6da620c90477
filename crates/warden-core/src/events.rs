//! Event types for turn execution.
//!
//! Two event families:
//!
//! - **[`ModelEvent`]**: low-level units yielded by the external model-call
//!   collaborator (text deltas, tool-call fragments, tool results, done/error).
//! - **[`RunEvent`]**: what the client receives, tagged with the run that
//!   produced it and the logical node (gate or task agent) it came from.
//!
//! `ModelEvent` is purely in-memory. `RunEvent` serializes to the outbound
//! frame `{"type", "run_tag", "node", "payload"}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::RunTag;

// ─────────────────────────────────────────────────────────────────────────────
// ModelEvent: model stream units
// ─────────────────────────────────────────────────────────────────────────────

/// A partial tool invocation as streamed by a model.
///
/// Every field is optional: providers typically send the id and name on the
/// first fragment of a call and only argument text afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Call id, when present on this fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Fragment of the tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fragment of the JSON argument text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallFragment {
    /// Opening fragment of a call.
    pub fn open(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: None,
        }
    }

    /// Argument fragment correlated by id.
    pub fn args(id: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
            arguments: Some(arguments.into()),
        }
    }

    /// Argument fragment without an id.
    pub fn orphan_args(arguments: impl Into<String>) -> Self {
        Self {
            id: None,
            name: None,
            arguments: Some(arguments.into()),
        }
    }
}

/// How id-less tool-call fragments are attributed to calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentAttribution {
    /// Continue the most recently opened call.
    #[default]
    Latest,
    /// Continue the open call only when exactly one call is open.
    Strict,
}

/// Units yielded by a model stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelEvent {
    /// Stream opened.
    Start,
    /// Incremental text.
    TextDelta {
        /// Text fragment.
        delta: String,
    },
    /// Incremental tool-call construction.
    #[serde(rename = "toolcall_delta")]
    ToolCallDelta {
        /// The fragment.
        fragment: ToolCallFragment,
    },
    /// Result of a tool the agent ran inside its own loop.
    ToolResult {
        /// Call the result answers.
        tool_call_id: String,
        /// Tool name, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Result payload.
        content: Value,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: bool,
    },
    /// Stream completed.
    Done {
        /// Provider stop reason.
        stop_reason: String,
    },
    /// Provider-reported failure inside an open stream.
    Error {
        /// Error message.
        error: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// RunEvent: outbound frames
// ─────────────────────────────────────────────────────────────────────────────

/// Logical node of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// The moderation-evaluating agent.
    Gate,
    /// The task-performing agent.
    Task,
}

impl Node {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gate => "gate",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Gate allowed and the task agent completed.
    Done,
    /// Gate blocked; the task agent never ran.
    Blocked,
    /// The run failed.
    Error,
}

/// Payload of a [`RunEvent`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RunEventKind {
    /// Incremental agent text.
    TextChunk {
        /// Text fragment.
        text: String,
    },
    /// Incremental tool-call fragment.
    ToolCallChunk(ToolCallFragment),
    /// A tool result (task-agent tools, or the gate's decision).
    ToolResult {
        /// Call the result answers.
        tool_call_id: String,
        /// Tool name, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Result payload.
        content: Value,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: bool,
    },
    /// Fatal run error.
    Error {
        /// Stable error category.
        category: String,
        /// Human-readable message.
        message: String,
    },
    /// Terminal event; exactly one per run.
    End {
        /// Terminal state of the run.
        outcome: RunOutcome,
    },
}

impl RunEventKind {
    /// Frame type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TextChunk { .. } => "text_chunk",
            Self::ToolCallChunk(_) => "tool_call_chunk",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::End { .. } => "end",
        }
    }
}

/// One outbound event, tagged with its run and node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Bundle tag of the run.
    pub run_tag: RunTag,
    /// Node that produced the event.
    pub node: Node,
    /// Event payload.
    #[serde(flatten)]
    pub kind: RunEventKind,
}

impl RunEvent {
    /// Create an event.
    pub fn new(run_tag: RunTag, node: Node, kind: RunEventKind) -> Self {
        Self {
            run_tag,
            node,
            kind,
        }
    }

    /// Whether this is the run's terminal `end`.
    pub fn is_end(&self) -> bool {
        matches!(self.kind, RunEventKind::End { .. })
    }

    /// Whether this is an `error` event.
    pub fn is_error(&self) -> bool {
        matches!(self.kind, RunEventKind::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_event_frame_shape() {
        let event = RunEvent::new(
            RunTag::from("strict"),
            Node::Task,
            RunEventKind::TextChunk {
                text: "Why did...".into(),
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "text_chunk",
                "run_tag": "strict",
                "node": "task",
                "payload": {"text": "Why did..."}
            })
        );
    }

    #[test]
    fn end_frame_shape() {
        let event = RunEvent::new(
            RunTag::default_tag(),
            Node::Gate,
            RunEventKind::End {
                outcome: RunOutcome::Blocked,
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "end");
        assert_eq!(value["node"], "gate");
        assert_eq!(value["payload"]["outcome"], "blocked");
        assert!(event.is_end());
        assert!(!event.is_error());
    }

    #[test]
    fn tool_call_chunk_payload_is_fragment() {
        let event = RunEvent::new(
            RunTag::default_tag(),
            Node::Gate,
            RunEventKind::ToolCallChunk(ToolCallFragment::args("a", "{\"al")),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"], json!({"id": "a", "arguments": "{\"al"}));
    }

    #[test]
    fn type_names_match_serde() {
        let kinds = [
            RunEventKind::TextChunk { text: String::new() },
            RunEventKind::ToolCallChunk(ToolCallFragment::default()),
            RunEventKind::ToolResult {
                tool_call_id: "t".into(),
                name: None,
                content: Value::Null,
                is_error: false,
            },
            RunEventKind::Error {
                category: "c".into(),
                message: "m".into(),
            },
            RunEventKind::End {
                outcome: RunOutcome::Done,
            },
        ];
        for kind in kinds {
            let value = serde_json::to_value(&kind).unwrap();
            assert_eq!(value["type"], kind.type_name());
        }
    }

    #[test]
    fn model_event_wire_names() {
        let event = ModelEvent::ToolCallDelta {
            fragment: ToolCallFragment::open("c1", "allow_or_block"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "toolcall_delta");
        assert_eq!(value["fragment"]["name"], "allow_or_block");

        let done: ModelEvent =
            serde_json::from_value(json!({"type": "done", "stop_reason": "stop"})).unwrap();
        assert_eq!(
            done,
            ModelEvent::Done {
                stop_reason: "stop".into()
            }
        );
    }

    #[test]
    fn attribution_default_is_latest() {
        assert_eq!(FragmentAttribution::default(), FragmentAttribution::Latest);
        assert_eq!(
            serde_json::to_string(&FragmentAttribution::Strict).unwrap(),
            "\"strict\""
        );
    }
}
