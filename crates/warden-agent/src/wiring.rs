//! Construction of stores, model clients and the turn service from settings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use warden_llm::ModelClient;
use warden_llm::openai_compat::{OpenAiCompatClient, OpenAiCompatConfig};
use warden_runtime::conversation::ConversationState;
use warden_runtime::{RuntimeOptions, TurnDeps, TurnService};
use warden_settings::{ModelSettings, StorageBackend, StorageSettings, WardenSettings, resolve_path};
use warden_store::sqlite::ConnectionConfig;
use warden_store::{DirPolicyStore, MemoryThreadStore, PolicyStore, SqliteThreadStore, ThreadStore};

/// Open the configured thread store.
pub fn build_thread_store(storage: &StorageSettings) -> Result<Arc<dyn ThreadStore>> {
    match storage.backend {
        StorageBackend::Memory => {
            warn!("memory thread store: threads are lost on restart");
            Ok(Arc::new(MemoryThreadStore::new()))
        }
        StorageBackend::Sqlite => {
            let path = resolve_path(&storage.db_path);
            let config = ConnectionConfig {
                pool_size: storage.pool_size,
                busy_timeout_ms: storage.busy_timeout_ms,
            };
            let store = SqliteThreadStore::open(&path, &config)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            info!(path = %path.display(), "sqlite thread store ready");
            Ok(Arc::new(store))
        }
    }
}

/// A streaming chat-completions client for `model`.
///
/// The API key is read from the environment variable named in settings; a
/// missing key is allowed for endpoints that do not need one.
pub fn build_model_client(models: &ModelSettings, model: &str) -> Result<Arc<dyn ModelClient>> {
    let api_key = std::env::var(&models.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty());
    if api_key.is_none() {
        warn!(env = %models.api_key_env, model, "no API key set; sending unauthenticated requests");
    }
    let config = OpenAiCompatConfig {
        base_url: models.base_url.clone(),
        api_key,
        timeout: Duration::from_millis(models.timeout_ms),
        max_tokens: models.max_tokens,
        temperature: models.temperature.map(f64::from),
        ..OpenAiCompatConfig::new(model)
    };
    let client = OpenAiCompatClient::new(config)
        .with_context(|| format!("Failed to build model client for {model}"))?;
    Ok(Arc::new(client))
}

/// Wire the turn service from settings.
pub fn build_service(settings: &WardenSettings) -> Result<TurnService> {
    let threads = build_thread_store(&settings.storage)?;
    let policy_dir = resolve_path(&settings.policies.dir);
    info!(dir = %policy_dir.display(), "serving policies");
    let policies: Arc<dyn PolicyStore> = Arc::new(DirPolicyStore::new(policy_dir));

    let deps = TurnDeps {
        gate_client: build_model_client(&settings.models, &settings.models.gate_model)?,
        task_client: build_model_client(&settings.models, &settings.models.task_model)?,
        policies,
        conversation: Arc::new(ConversationState::new(threads)),
        options: RuntimeOptions::from(&settings.runtime),
    };
    Ok(TurnService::new(
        deps,
        settings.policies.default_run_config.clone(),
    ))
}
