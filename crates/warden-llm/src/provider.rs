//! # Model Client Trait
//!
//! The external model-call collaborator, reduced to one capability: open a
//! streaming invocation for a conversation prefix and yield [`ModelEvent`]s
//! until `done` or an error.
//!
//! Gate and task agents are both driven through [`ModelClient`]; any
//! implementation that accepts a prefix, emits events and terminates is
//! substitutable.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use warden_core::events::{ModelEvent, Node};
use warden_core::messages::Message;

/// Result type alias for model-call operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed stream of [`ModelEvent`]s returned by [`ModelClient::stream`].
pub type ModelEventStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, ProviderError>> + Send>>;

/// Errors from the model-call collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SSE stream parsing failed.
    #[error("SSE parse error: {message}")]
    SseParse {
        /// Error description.
        message: String,
    },

    /// Credentials were rejected or missing.
    #[error("Auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Rate limited by the provider.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Suggested retry delay in milliseconds, when the provider sent one.
        retry_after_ms: Option<u64>,
        /// Error description.
        message: String,
    },

    /// Provider returned a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
        /// Provider-specific error code.
        code: Option<String>,
    },

    /// The request did not complete in time.
    #[error("Timed out after {after_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        after_ms: u64,
    },

    /// Stream was cancelled by the consumer.
    #[error("Stream cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl ProviderError {
    /// Error category string for event emission.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "network",
            Self::Json(_) | Self::SseParse { .. } => "parse",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Api { .. } => "api",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Other { .. } => "unknown",
        }
    }
}

/// A tool the model may call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// JSON Schema of the argument object.
    pub parameters: Value,
}

/// One streaming invocation request.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    /// Which agent is being driven.
    pub node: Node,
    /// System prompt (policy text for the gate, directive for the task agent).
    pub system_prompt: String,
    /// Conversation prefix, oldest first.
    pub messages: Vec<Message>,
    /// Tools offered to the model.
    pub tools: Vec<ToolSpec>,
    /// Force the model to call this tool.
    pub tool_choice: Option<String>,
}

impl ModelRequest {
    /// Create a request with no tools.
    pub fn new(node: Node, system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            node,
            system_prompt: system_prompt.into(),
            messages,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    /// Offer a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    /// Force a specific tool.
    #[must_use]
    pub fn with_tool_choice(mut self, name: impl Into<String>) -> Self {
        self.tool_choice = Some(name.into());
        self
    }

    /// Text of the most recent human message, if any.
    pub fn last_human_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == warden_core::messages::Role::Human)
            .map(|m| m.content.to_text())
    }
}

/// Streaming model-call collaborator.
///
/// Implementors must stop consuming external resources once `cancel` fires;
/// the returned stream should end (or yield [`ProviderError::Cancelled`])
/// promptly afterwards.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Client identifier for logs.
    fn name(&self) -> &str;

    /// Open a streaming invocation.
    async fn stream(
        &self,
        request: &ModelRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<ModelEventStream>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
