//! Runtime error types.
//!
//! [`RunError`] is fatal to one run and is reported as that run's `error`
//! event. [`TurnError`] rejects a turn before any run starts.

use thiserror::Error;
use warden_core::ids::ThreadId;
use warden_llm::{AccumulatorError, ProviderError};
use warden_store::StoreError;

use crate::state::TurnState;

/// Errors that end a single run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The gate's accumulated tool-call arguments did not parse.
    #[error("malformed tool call {call_id}: {message}")]
    MalformedToolCall {
        /// Call id.
        call_id: String,
        /// Parse failure.
        message: String,
    },

    /// The gate used a wrong tool, more than one tool, or ran a tool.
    #[error("gate protocol violation: {0}")]
    ProtocolViolation(String),

    /// The gate's stream ended without a decision.
    #[error("gate finished without a decision")]
    NoDecision,

    /// The model-call collaborator failed.
    #[error("model call failed: {0}")]
    ExternalCallFailure(ProviderError),

    /// The thread kept changing under the commit.
    #[error("storage conflict on thread {thread_id} after retry")]
    StorageConflict {
        /// Thread being committed to.
        thread_id: ThreadId,
    },

    /// A policy id in the bundle does not resolve.
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// Any other persistence failure.
    #[error("storage error: {0}")]
    Storage(StoreError),

    /// State machine guard rejected a transition.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: TurnState,
        /// Requested state.
        to: TurnState,
    },

    /// Consumer went away or the turn was aborted.
    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    /// Category string carried by the `error` event.
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedToolCall { .. } => "malformed_tool_call",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::NoDecision => "no_decision",
            Self::ExternalCallFailure(_) => "external_call_failure",
            Self::StorageConflict { .. } => "storage_conflict",
            Self::PolicyNotFound(_) => "policy_not_found",
            Self::Storage(_) => "storage",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<ProviderError> for RunError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => Self::Cancelled,
            other => Self::ExternalCallFailure(other),
        }
    }
}

impl From<AccumulatorError> for RunError {
    fn from(err: AccumulatorError) -> Self {
        match err {
            AccumulatorError::MalformedToolCall { call_id, message } => {
                Self::MalformedToolCall { call_id, message }
            }
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PolicyNotFound(id) => Self::PolicyNotFound(id),
            StoreError::Conflict { thread_id, .. } => Self::StorageConflict { thread_id },
            other => Self::Storage(other),
        }
    }
}

/// Errors that reject a turn request.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The human message is empty.
    #[error("human_content must not be empty")]
    EmptyContent,

    /// The resolved run config is unusable.
    #[error("invalid run config: {0}")]
    InvalidRunConfig(String),

    /// The requested thread does not exist.
    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),

    /// The service is shutting down.
    #[error("service is shutting down")]
    ShuttingDown,

    /// Persistence failure while opening the thread.
    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl TurnError {
    /// Stable category string.
    pub fn category(&self) -> &'static str {
        match self {
            Self::EmptyContent => "invalid_request",
            Self::InvalidRunConfig(_) => "invalid_run_config",
            Self::ThreadNotFound(_) => "thread_not_found",
            Self::ShuttingDown => "shutting_down",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether the caller sent something unusable.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::EmptyContent | Self::InvalidRunConfig(_))
    }
}

impl From<StoreError> for TurnError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ThreadNotFound(id) => Self::ThreadNotFound(id),
            other => Self::Storage(other),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
