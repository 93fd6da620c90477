//! Conversation messages.
//!
//! A [`NewMessage`] is what callers hand to the store; the store assigns the
//! id, sequence position and timestamp and hands back a [`Message`]. Messages
//! are immutable once appended.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MessageId, RunTag};

/// Who produced a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The end user.
    Human,
    /// The task agent.
    Agent,
    /// Output of a tool the task agent invoked.
    ToolResult,
    /// Out-of-band instructions.
    System,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
            Self::ToolResult => "tool_result",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Self::Human),
            "agent" => Ok(Self::Agent),
            "tool_result" => Ok(Self::ToolResult),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Message body: plain text or a structured payload.
///
/// Serialized adjacently tagged (`{"kind": "text", "value": "hi"}`) so a
/// structured string payload stays structured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Structured JSON payload (tool results, records).
    Structured(Value),
}

impl MessageContent {
    /// Borrow the text if this is a text body.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Structured(_) => None,
        }
    }

    /// Render the body as text; structured payloads become compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Structured(v) => v.to_string(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// A message not yet appended to a thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Producer of the message.
    pub role: Role,
    /// Body.
    pub content: MessageContent,
    /// Run stamp; `None` for the canonical single-run history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_tag: Option<RunTag>,
}

impl NewMessage {
    /// Create a message with the given role and content.
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            run_tag: None,
        }
    }

    /// A human message.
    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Role::Human, MessageContent::Text(text.into()))
    }

    /// A task-agent message.
    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, MessageContent::Text(text.into()))
    }

    /// A tool result with a structured payload.
    pub fn tool_result(payload: Value) -> Self {
        Self::new(Role::ToolResult, MessageContent::Structured(payload))
    }

    /// A system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    /// Stamp the message with a run tag (or clear the stamp).
    #[must_use]
    pub fn with_run_tag(mut self, run_tag: Option<RunTag>) -> Self {
        self.run_tag = run_tag;
        self
    }
}

/// A message as recorded in a thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id.
    pub id: MessageId,
    /// Producer of the message.
    pub role: Role,
    /// Body.
    pub content: MessageContent,
    /// Run stamp; `None` for the canonical single-run history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_tag: Option<RunTag>,
    /// Zero-based position in the thread (append order).
    pub sequence: u64,
    /// ISO 8601 timestamp of the append.
    pub created_at: String,
}

impl Message {
    /// Materialize a [`NewMessage`] at the given sequence position.
    pub fn from_new(new: NewMessage, sequence: u64) -> Self {
        Self {
            id: MessageId::new(),
            role: new.role,
            content: new.content,
            run_tag: new.run_tag,
            sequence,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Whether a run tagged `run_tag` may see this message.
    ///
    /// Unstamped messages are shared history; stamped messages belong to the
    /// run that produced them.
    pub fn visible_to(&self, run_tag: &RunTag) -> bool {
        self.run_tag.as_ref().is_none_or(|t| t == run_tag)
    }
}
