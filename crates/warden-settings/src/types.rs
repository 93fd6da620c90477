//! Settings sections.
//!
//! Every struct uses `#[serde(default)]`, so a settings file only needs the
//! keys it overrides.

use serde::{Deserialize, Serialize};
use warden_core::events::FragmentAttribution;
use warden_core::ids::RunTag;
use warden_core::policy::{PolicyBundle, RunConfig};

use crate::errors::{Result, SettingsError};

/// Root settings object, serialized as camelCase JSON.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenSettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Conversation state persistence.
    pub storage: StorageSettings,
    /// Policy documents and the default run config.
    pub policies: PolicySettings,
    /// Model endpoints for the gate and task agents.
    pub models: ModelSettings,
    /// Orchestrator limits and behavior.
    pub runtime: RuntimeSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl WardenSettings {
    /// Reject values that deserialize fine but cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_bundles == 0 {
            return Err(SettingsError::InvalidValue(
                "runtime.maxBundles must be at least 1".into(),
            ));
        }
        if self.runtime.channel_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "runtime.channelCapacity must be at least 1".into(),
            ));
        }
        if self.models.timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "models.timeoutMs must be positive".into(),
            ));
        }
        self.policies
            .default_run_config
            .validate(self.runtime.max_bundles)
            .map_err(|e| SettingsError::InvalidValue(format!("policies.defaultRunConfig: {e}")))
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Interval between SSE keep-alive comments, in seconds.
    pub keep_alive_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            keep_alive_secs: 15,
        }
    }
}

/// Which thread store backs the conversation state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on restart.
    Memory,
    /// `SQLite` file.
    #[default]
    Sqlite,
}

/// Conversation state persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Backend to use.
    pub backend: StorageBackend,
    /// Database path; relative paths resolve against `~/.warden`.
    pub db_path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            db_path: "warden.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Policy document settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySettings {
    /// Directory of `<id>.md` / `<id>.txt` policies; relative to `~/.warden`.
    pub dir: String,
    /// Run config used when neither the request nor the thread supplies one.
    pub default_run_config: RunConfig,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            dir: "policies".to_string(),
            default_run_config: RunConfig::single(PolicyBundle::new(
                RunTag::default_tag(),
                ["default"],
            )),
        }
    }
}

/// Model endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// OpenAI-compatible API base URL.
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Model used by the gate agent.
    pub gate_model: String,
    /// Model used by the task agent.
    pub task_model: String,
    /// Open and idle timeout per model call, in milliseconds.
    pub timeout_ms: u64,
    /// Completion token cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature for the task agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            gate_model: "gpt-4o-mini".to_string(),
            task_model: "gpt-4o".to_string(),
            timeout_ms: 60_000,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Orchestrator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// How id-less tool-call fragments are attributed.
    pub fragment_attribution: FragmentAttribution,
    /// Maximum bundles in one compare-mode turn.
    pub max_bundles: usize,
    /// Maximum distinct tool calls one gate run may open.
    pub max_tool_calls: usize,
    /// Buffered events between bundle tasks and the client.
    pub channel_capacity: usize,
    /// System prompt for the task agent.
    pub task_system_prompt: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            fragment_attribution: FragmentAttribution::Latest,
            max_bundles: 8,
            max_tool_calls: 16,
            channel_capacity: 256,
            task_system_prompt: "You are a helpful assistant.".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
