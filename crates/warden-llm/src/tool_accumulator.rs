//! # Tool-Call Accumulator
//!
//! Reassembles streamed [`ToolCallFragment`]s into complete calls.
//!
//! Fragments are correlated by call id. Name and argument fragments for the
//! same id are concatenated in arrival order; nothing is parsed until the
//! caller asks to [`finalize`](ToolCallAccumulator::finalize) a call, at which
//! point the argument text must be exactly one JSON object.
//!
//! Fragments that arrive without an id are attributed according to
//! [`FragmentAttribution`]:
//!
//! - `Latest`: continue the most recently opened call. Id-less fragments seen
//!   before any id are buffered and folded into the first call that opens.
//! - `Strict`: continue the open call only when exactly one call is open;
//!   anything else is an [`AccumulatorError::AmbiguousFragment`].

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use warden_core::events::{FragmentAttribution, ToolCallFragment};

/// Default cap on distinct call ids per accumulator.
pub const DEFAULT_MAX_CALLS: usize = 16;

const PREVIEW_CHARS: usize = 120;

/// Errors raised while accumulating or finalizing tool calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccumulatorError {
    /// Accumulated argument text is not a single JSON argument object.
    #[error("malformed tool call {call_id}: {message}")]
    MalformedToolCall {
        /// Call id.
        call_id: String,
        /// Parse failure and a preview of the text.
        message: String,
    },

    /// An id-less fragment could not be attributed to exactly one call.
    #[error("cannot attribute id-less fragment: {open_calls} calls open")]
    AmbiguousFragment {
        /// Number of calls open when the fragment arrived.
        open_calls: usize,
    },

    /// More distinct call ids than the configured cap.
    #[error("too many tool calls (max {max})")]
    TooManyCalls {
        /// Configured cap.
        max: usize,
    },

    /// No call with this id was accumulated.
    #[error("unknown tool call: {call_id}")]
    UnknownCall {
        /// Requested id.
        call_id: String,
    },
}

impl AccumulatorError {
    /// Error category string.
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedToolCall { .. } => "malformed_tool_call",
            Self::AmbiguousFragment { .. } => "ambiguous_fragment",
            Self::TooManyCalls { .. } => "too_many_calls",
            Self::UnknownCall { .. } => "unknown_call",
        }
    }
}

/// A call as accumulated so far.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccumulatedCall {
    /// Call id (first non-empty id seen for the call).
    pub id: String,
    /// Concatenated name fragments.
    pub name: String,
    /// Concatenated argument fragments.
    pub args_text: String,
}

/// A finalized call with parsed arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalizedCall {
    /// Call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Parsed argument object.
    pub arguments: Map<String, Value>,
}

/// Buffers tool-call fragments per call id.
#[derive(Debug)]
pub struct ToolCallAccumulator {
    attribution: FragmentAttribution,
    max_calls: usize,
    calls: Vec<AccumulatedCall>,
    index: HashMap<String, usize>,
    latest: Option<usize>,
    pending: Option<AccumulatedCall>,
}

impl ToolCallAccumulator {
    /// Create an accumulator with the given attribution rule.
    pub fn new(attribution: FragmentAttribution) -> Self {
        Self {
            attribution,
            max_calls: DEFAULT_MAX_CALLS,
            calls: Vec::new(),
            index: HashMap::new(),
            latest: None,
            pending: None,
        }
    }

    /// Override the cap on distinct call ids.
    #[must_use]
    pub fn with_max_calls(mut self, max_calls: usize) -> Self {
        self.max_calls = max_calls;
        self
    }

    /// Feed one fragment.
    pub fn push(&mut self, fragment: &ToolCallFragment) -> Result<(), AccumulatorError> {
        let id = fragment.id.as_deref().filter(|id| !id.is_empty());
        let slot = match id {
            Some(id) => self.open_or_continue(id)?,
            None => match self.attribute_orphan()? {
                Some(idx) => idx,
                None => {
                    let pending = self.pending.get_or_insert_with(AccumulatedCall::default);
                    append(pending, fragment);
                    return Ok(());
                }
            },
        };
        append(&mut self.calls[slot], fragment);
        Ok(())
    }

    fn open_or_continue(&mut self, id: &str) -> Result<usize, AccumulatorError> {
        if let Some(&idx) = self.index.get(id) {
            self.latest = Some(idx);
            return Ok(idx);
        }
        if self.calls.len() >= self.max_calls {
            return Err(AccumulatorError::TooManyCalls {
                max: self.max_calls,
            });
        }
        let mut call = self.pending.take().unwrap_or_default();
        id.clone_into(&mut call.id);
        let idx = self.calls.len();
        self.calls.push(call);
        let _ = self.index.insert(id.to_owned(), idx);
        self.latest = Some(idx);
        Ok(idx)
    }

    fn attribute_orphan(&self) -> Result<Option<usize>, AccumulatorError> {
        match self.attribution {
            FragmentAttribution::Latest => Ok(self.latest),
            FragmentAttribution::Strict => {
                if self.calls.len() == 1 {
                    Ok(Some(0))
                } else {
                    Err(AccumulatorError::AmbiguousFragment {
                        open_calls: self.calls.len(),
                    })
                }
            }
        }
    }

    /// Number of distinct calls opened.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no call has been opened.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calls in first-seen order.
    pub fn calls(&self) -> &[AccumulatedCall] {
        &self.calls
    }

    /// Look up a call by id.
    pub fn get(&self, id: &str) -> Option<&AccumulatedCall> {
        self.index.get(id).map(|&idx| &self.calls[idx])
    }

    /// Whether id-less fragments are still waiting for a call to open.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Parse a call's arguments as one JSON object. Empty text is `{}`.
    pub fn finalize(&self, id: &str) -> Result<FinalizedCall, AccumulatorError> {
        let call = self.lookup(id)?;
        let trimmed = call.args_text.trim();
        let arguments = if trimmed.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(malformed(
                        call,
                        &format!("expected a JSON object, got {}", json_kind(&other)),
                    ));
                }
                Err(e) => return Err(malformed(call, &e.to_string())),
            }
        };
        Ok(FinalizedCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        })
    }

    /// Deserialize a call's arguments into a typed argument set.
    pub fn finalize_as<T: DeserializeOwned>(&self, id: &str) -> Result<T, AccumulatorError> {
        let call = self.lookup(id)?;
        let trimmed = call.args_text.trim();
        let text = if trimmed.is_empty() { "{}" } else { trimmed };
        serde_json::from_str(text).map_err(|e| malformed(call, &e.to_string()))
    }

    fn lookup(&self, id: &str) -> Result<&AccumulatedCall, AccumulatorError> {
        self.get(id).ok_or_else(|| AccumulatorError::UnknownCall {
            call_id: id.to_owned(),
        })
    }
}

fn append(call: &mut AccumulatedCall, fragment: &ToolCallFragment) {
    if let Some(name) = &fragment.name {
        call.name.push_str(name);
    }
    if let Some(args) = &fragment.arguments {
        call.args_text.push_str(args);
    }
}

fn malformed(call: &AccumulatedCall, reason: &str) -> AccumulatorError {
    let preview: String = call.args_text.chars().take(PREVIEW_CHARS).collect();
    AccumulatorError::MalformedToolCall {
        call_id: call.id.clone(),
        message: format!("{reason} (args: {preview:?})"),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
