//! Policy document collaborator.
//!
//! A policy id resolves to free text that the gate agent evaluates against.
//! The store never interprets the text.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::errors::{Result, StoreError};

/// File extensions tried, in order, by [`DirPolicyStore`].
const POLICY_EXTENSIONS: &[&str] = &["md", "txt"];

/// Resolves policy ids to policy text.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Text of one policy, or [`StoreError::PolicyNotFound`].
    async fn get(&self, policy_id: &str) -> Result<String>;

    /// Known policy ids, sorted.
    async fn list(&self) -> Result<Vec<String>>;
}

/// Whether `id` is a safe policy id: `[A-Za-z0-9_.-]+`, not starting with `.`.
pub fn is_valid_policy_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// Policies held in memory.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    policies: RwLock<BTreeMap<String, String>>,
}

impl MemoryPolicyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with_policy(self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(id, text);
        self
    }

    /// Insert or replace a policy.
    pub fn insert(&self, id: impl Into<String>, text: impl Into<String>) {
        let _ = self.policies.write().insert(id.into(), text.into());
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get(&self, policy_id: &str) -> Result<String> {
        self.policies
            .read()
            .get(policy_id)
            .cloned()
            .ok_or_else(|| StoreError::PolicyNotFound(policy_id.to_owned()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.policies.read().keys().cloned().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory
// ─────────────────────────────────────────────────────────────────────────────

/// Policies read from `<dir>/<id>.md` or `<dir>/<id>.txt`, cached after the
/// first read.
#[derive(Debug)]
pub struct DirPolicyStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl DirPolicyStore {
    /// Serve policies from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Directory served.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop one cached policy, or all of them.
    pub fn invalidate(&self, policy_id: Option<&str>) {
        let mut cache = self.cache.write();
        match policy_id {
            Some(id) => {
                let _ = cache.remove(id);
            }
            None => cache.clear(),
        }
    }

    async fn read_from_disk(&self, policy_id: &str) -> Result<Option<String>> {
        for ext in POLICY_EXTENSIONS {
            let path = self.dir.join(format!("{policy_id}.{ext}"));
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    debug!(policy_id, path = %path.display(), "loaded policy");
                    return Ok(Some(text));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl PolicyStore for DirPolicyStore {
    async fn get(&self, policy_id: &str) -> Result<String> {
        if !is_valid_policy_id(policy_id) {
            warn!(policy_id, "rejected invalid policy id");
            return Err(StoreError::PolicyNotFound(policy_id.to_owned()));
        }
        if let Some(text) = self.cache.read().get(policy_id) {
            return Ok(text.clone());
        }
        let text = self
            .read_from_disk(policy_id)
            .await?
            .ok_or_else(|| StoreError::PolicyNotFound(policy_id.to_owned()))?;
        let _ = self
            .cache
            .write()
            .insert(policy_id.to_owned(), text.clone());
        Ok(text)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let known_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| POLICY_EXTENSIONS.contains(&e));
            if !known_ext {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_policy_id(stem) {
                    ids.push(stem.to_owned());
                }
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
