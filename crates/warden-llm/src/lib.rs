//! # warden-llm
//!
//! The model-call seam and the streaming utilities around it.
//!
//! - [`provider::ModelClient`]: the opaque streaming token source every agent
//!   (gate or task) is driven through
//! - [`openai_compat::OpenAiCompatClient`]: streaming `/chat/completions` client
//! - [`sse::SseLineDecoder`]: incremental SSE `data:` line decoder
//! - [`tool_accumulator::ToolCallAccumulator`]: reassembles streamed tool-call
//!   fragments into complete, parseable calls
//! - [`scripted::ScriptedModelClient`]: deterministic client for tests and demos

#![deny(unsafe_code)]

pub mod openai_compat;
pub mod provider;
pub mod scripted;
pub mod sse;
pub mod tool_accumulator;

pub use provider::{ModelClient, ModelEventStream, ModelRequest, ProviderError, ProviderResult, ToolSpec};
pub use tool_accumulator::{AccumulatorError, ToolCallAccumulator};
