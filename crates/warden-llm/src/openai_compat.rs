//! `OpenAI`-compatible chat-completions client implementing [`ModelClient`].
//!
//! Sends a streaming `POST {base_url}/chat/completions` and translates each
//! SSE chunk into [`ModelEvent`]s:
//!
//! - `choices[].delta.content` → `text_delta`
//! - `choices[].delta.tool_calls[]` → `toolcall_delta` (the id is typically
//!   present only on the first fragment of a call)
//! - `choices[].finish_reason` → `done`
//! - an in-band `error` object → `error`
//!
//! The configured timeout bounds both opening the request and every wait for
//! the next body chunk. Cancellation drops the response, which closes the
//! connection.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use warden_core::events::{ModelEvent, ToolCallFragment};
use warden_core::messages::{Message, Role};

use crate::provider::{
    ModelClient, ModelEventStream, ModelRequest, ProviderError, ProviderResult, ToolSpec,
};
use crate::sse::SseLineDecoder;

/// Default base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client configuration.
#[derive(Clone, Debug)]
pub struct OpenAiCompatConfig {
    /// API base URL (without `/chat/completions`).
    pub base_url: String,
    /// Bearer token; omitted from requests when `None`.
    pub api_key: Option<String>,
    /// Model id.
    pub model: String,
    /// Open and idle timeout.
    pub timeout: Duration,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
}

impl OpenAiCompatConfig {
    /// Config for `model` against the default endpoint.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            model: model.into(),
            timeout: Duration::from_secs(60),
            max_tokens: None,
            temperature: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    stream: bool,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: Option<String>,
}

fn convert_message(message: &Message) -> ChatMessage {
    let (role, content) = match message.role {
        Role::Human => ("user", message.content.to_text()),
        Role::Agent => ("assistant", message.content.to_text()),
        Role::System => ("system", message.content.to_text()),
        Role::ToolResult => (
            "assistant",
            format!("[tool result] {}", message.content.to_text()),
        ),
    };
    ChatMessage { role, content }
}

fn convert_tool(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// Call ids by the `index` the provider multiplexes tool calls on.
///
/// Only the opening fragment of a call carries its id; continuations carry
/// the index alone.
type CallIds = HashMap<u32, String>;

/// Translate one SSE data payload into model events.
fn parse_chunk(data: &str, call_ids: &mut CallIds) -> ProviderResult<Vec<ModelEvent>> {
    let chunk: ChatChunk = serde_json::from_str(data)?;
    let mut events = Vec::new();
    if let Some(err) = chunk.error {
        events.push(ModelEvent::Error {
            error: err.message.unwrap_or_else(|| "provider error".into()),
        });
        return Ok(events);
    }
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(ModelEvent::TextDelta { delta: text });
        }
        for call in choice.delta.tool_calls {
            let (name, arguments) = call
                .function
                .map_or((None, None), |f| (f.name, f.arguments));
            let id = match (call.index, call.id) {
                (Some(index), Some(id)) => {
                    let _ = call_ids.insert(index, id.clone());
                    Some(id)
                }
                (Some(index), None) => call_ids.get(&index).cloned(),
                (None, id) => id,
            };
            events.push(ModelEvent::ToolCallDelta {
                fragment: ToolCallFragment {
                    id,
                    name,
                    arguments,
                },
            });
        }
        if let Some(reason) = choice.finish_reason {
            events.push(ModelEvent::Done {
                stop_reason: reason,
            });
        }
    }
    Ok(events)
}

/// Parse an API error body into `(message, code)`.
fn parse_api_error(body: &str, status: u16) -> (String, Option<String>) {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            let error = &json["error"];
            let message = error["message"]
                .as_str()
                .unwrap_or("Unknown error")
                .to_owned();
            let code = error["code"]
                .as_str()
                .or_else(|| error["type"].as_str())
                .map(String::from);
            (message, code)
        }
        Err(_) => (format!("HTTP {status}: {body}"), None),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Streaming chat-completions client.
pub struct OpenAiCompatClient {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
    name: String,
}

impl OpenAiCompatClient {
    /// Create a client.
    pub fn new(config: OpenAiCompatConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()?;
        let name = format!("openai-compat:{}", config.model);
        Ok(Self {
            config,
            client,
            name,
        })
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(key) = &self.config.api_key {
            let value =
                HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| ProviderError::Auth {
                    message: format!("Invalid authorization header: {e}"),
                })?;
            let _ = headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn build_request(&self, request: &ModelRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: request.system_prompt.clone(),
            });
        }
        messages.extend(request.messages.iter().map(convert_message));

        ChatRequest {
            model: self.config.model.clone(),
            stream: true,
            messages,
            tools: request.tools.iter().map(convert_tool).collect(),
            tool_choice: request
                .tool_choice
                .as_ref()
                .map(|name| json!({"type": "function", "function": {"name": name}})),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    async fn check_status(&self, response: reqwest::Response) -> ProviderResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after_ms = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        let (message, code) = parse_api_error(&body, status.as_u16());
        error!(
            client = %self.name,
            status = status.as_u16(),
            code = code.as_deref().unwrap_or("unknown"),
            "model API error"
        );
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth { message },
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                retry_after_ms,
                message,
            },
            _ => ProviderError::Api {
                status: status.as_u16(),
                message,
                code,
            },
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: &ModelRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<ModelEventStream> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = self.build_request(request);
        debug!(
            client = %self.name,
            node = %request.node,
            message_count = body.messages.len(),
            tool_count = body.tools.len(),
            "opening model stream"
        );

        let send = self
            .client
            .post(&url)
            .headers(self.build_headers()?)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = tokio::time::timeout(self.config.timeout, send) => match result {
                Ok(response) => response?,
                Err(_) => {
                    return Err(ProviderError::Timeout {
                        after_ms: self.timeout_ms(),
                    });
                }
            },
        };
        let response = self.check_status(response).await?;

        Ok(Box::pin(decode_body(
            response,
            self.config.timeout,
            cancel,
        )))
    }
}

/// Turn a streaming response body into model events.
#[allow(unused_assignments)] // finished is read after the loop on every exit path
fn decode_body(
    response: reqwest::Response,
    idle: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = ProviderResult<ModelEvent>> + Send {
    type Item = ProviderResult<ModelEvent>;
    let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);

    async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut decoder = SseLineDecoder::new();
        let mut call_ids = CallIds::new();
        let mut finished = false;

        let v: Item = Ok(ModelEvent::Start);
        yield v;

        'read: loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("model stream cancelled by consumer");
                    return;
                }
                next = tokio::time::timeout(idle, body.next()) => next,
            };
            let chunk = match next {
                Err(_) => {
                    let v: Item = Err(ProviderError::Timeout { after_ms: idle_ms });
                    yield v;
                    return;
                }
                Ok(None) => break 'read,
                Ok(Some(Err(e))) => {
                    let v: Item = Err(ProviderError::Http(e));
                    yield v;
                    return;
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            for data in decoder.push(&chunk) {
                match parse_chunk(&data, &mut call_ids) {
                    Ok(events) => {
                        for event in events {
                            finished = matches!(event, ModelEvent::Done { .. } | ModelEvent::Error { .. });
                            let v: Item = Ok(event);
                            yield v;
                            if finished {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable model stream chunk");
                        let v: Item = Err(e);
                        yield v;
                        return;
                    }
                }
            }
            if decoder.saw_done() {
                break 'read;
            }
        }

        if let Some(data) = decoder.finish() {
            match parse_chunk(&data, &mut call_ids) {
                Ok(events) => {
                    for event in events {
                        finished = matches!(event, ModelEvent::Done { .. } | ModelEvent::Error { .. });
                        let v: Item = Ok(event);
                        yield v;
                        if finished {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let v: Item = Err(e);
                    yield v;
                    return;
                }
            }
        }

        if !finished {
            let v: Item = if decoder.saw_done() {
                Ok(ModelEvent::Done { stop_reason: "stop".into() })
            } else {
                Err(ProviderError::SseParse {
                    message: "stream ended before a finish reason".into(),
                })
            };
            yield v;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
