//! `SQLite`-backed [`ThreadStore`].
//!
//! Threads carry a denormalized `message_count` that doubles as the
//! optimistic-concurrency check: a write reads it inside an immediate
//! transaction, compares it with the caller's expected length, inserts the new
//! rows and bumps the count before committing.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use tracing::debug;
use warden_core::ids::{MessageId, RunTag, ThreadId};
use warden_core::messages::{Message, MessageContent, NewMessage, Role};
use warden_core::policy::{Decision, RunConfig};

use super::connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
use super::migrations::run_migrations;
use crate::errors::{Result, StoreError};
use crate::thread::{Thread, ThreadStore, TurnCommit};

/// Thread store persisted in `SQLite`.
#[derive(Clone)]
pub struct SqliteThreadStore {
    pool: ConnectionPool,
}

impl SqliteThreadStore {
    /// Open (and migrate) a database file.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        Self::from_pool(new_file(path, config)?)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::from_pool(new_in_memory(&ConnectionConfig::default())?)
    }

    /// Wrap an existing pool, running pending migrations.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        debug!(applied, "thread store ready");
        drop(conn);
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = store.conn()?;
            work(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("blocking store task failed: {e}")))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::Internal(format!("value out of range: {value}")))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::Internal(format!("negative count: {value}")))
}

fn encode_content(content: &MessageContent) -> Result<(&'static str, String)> {
    Ok(match content {
        MessageContent::Text(text) => ("text", text.clone()),
        MessageContent::Structured(value) => ("json", serde_json::to_string(value)?),
    })
}

fn decode_content(kind: &str, raw: String) -> Result<MessageContent> {
    match kind {
        "text" => Ok(MessageContent::Text(raw)),
        "json" => Ok(MessageContent::Structured(serde_json::from_str(&raw)?)),
        other => Err(StoreError::Internal(format!("unknown content kind: {other}"))),
    }
}

fn encode_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
}

struct ThreadRow {
    created_at: String,
    run_config: Option<String>,
    last_decision: Option<String>,
}

fn load_thread(conn: &Connection, id: &ThreadId) -> Result<Thread> {
    let row = conn
        .query_row(
            "SELECT created_at, run_config, last_decision FROM threads WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok(ThreadRow {
                    created_at: row.get(0)?,
                    run_config: row.get(1)?,
                    last_decision: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::ThreadNotFound(id.clone()))?;

    let mut stmt = conn.prepare(
        "SELECT id, sequence, role, content_kind, content, run_tag, created_at
         FROM messages WHERE thread_id = ?1 ORDER BY sequence ASC",
    )?;
    let raw_rows = stmt
        .query_map(params![id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut messages = Vec::with_capacity(raw_rows.len());
    for (msg_id, sequence, role, kind, content, run_tag, created_at) in raw_rows {
        messages.push(Message {
            id: MessageId::from_string(msg_id),
            role: role.parse::<Role>().map_err(StoreError::Internal)?,
            content: decode_content(&kind, content)?,
            run_tag: run_tag.map(RunTag::new),
            sequence: to_u64(sequence)?,
            created_at,
        });
    }

    Ok(Thread {
        id: id.clone(),
        messages,
        run_config: decode_json::<RunConfig>(row.run_config)?,
        last_decision: decode_json::<Decision>(row.last_decision)?,
        created_at: row.created_at,
    })
}

fn message_count(tx: &Transaction<'_>, id: &ThreadId) -> Result<u64> {
    let count: i64 = tx
        .query_row(
            "SELECT message_count FROM threads WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::ThreadNotFound(id.clone()))?;
    to_u64(count)
}

/// Insert `messages` at `expected_len..` after the length check; caller commits.
fn insert_messages(
    tx: &Transaction<'_>,
    id: &ThreadId,
    expected_len: u64,
    messages: Vec<NewMessage>,
) -> Result<Vec<Message>> {
    let actual = message_count(tx, id)?;
    if actual != expected_len {
        return Err(StoreError::Conflict {
            thread_id: id.clone(),
            expected: expected_len,
            actual,
        });
    }

    let mut stmt = tx.prepare(
        "INSERT INTO messages (id, thread_id, sequence, role, content_kind, content, run_tag, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    let mut appended = Vec::with_capacity(messages.len());
    for (new, sequence) in messages.into_iter().zip(expected_len..) {
        let message = Message::from_new(new, sequence);
        let (kind, content) = encode_content(&message.content)?;
        let _ = stmt.execute(params![
            message.id.as_str(),
            id.as_str(),
            to_i64(sequence)?,
            message.role.as_str(),
            kind,
            content,
            message.run_tag.as_ref().map(RunTag::as_str),
            message.created_at,
        ])?;
        appended.push(message);
    }
    drop(stmt);

    let _ = tx.execute(
        "UPDATE threads SET message_count = ?1 WHERE id = ?2",
        params![to_i64(expected_len + appended.len() as u64)?, id.as_str()],
    )?;
    Ok(appended)
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn create(&self, run_config: Option<RunConfig>) -> Result<Thread> {
        let thread = Thread::new(run_config);
        let row = thread.clone();
        self.blocking(move |conn| {
            let _ = conn.execute(
                "INSERT INTO threads (id, created_at, run_config, message_count) VALUES (?1, ?2, ?3, 0)",
                params![
                    row.id.as_str(),
                    row.created_at,
                    encode_json(row.run_config.as_ref())?
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(thread)
    }

    async fn get(&self, id: &ThreadId) -> Result<Thread> {
        let id = id.clone();
        self.blocking(move |conn| load_thread(conn, &id)).await
    }

    async fn append(
        &self,
        id: &ThreadId,
        expected_len: u64,
        message: NewMessage,
    ) -> Result<Message> {
        let id = id.clone();
        let mut appended = self
            .blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let appended = insert_messages(&tx, &id, expected_len, vec![message])?;
                tx.commit()?;
                Ok(appended)
            })
            .await?;
        appended
            .pop()
            .ok_or_else(|| StoreError::Internal("append produced no message".into()))
    }

    async fn commit_turn(&self, id: &ThreadId, commit: TurnCommit) -> Result<Vec<Message>> {
        let id = id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let appended = insert_messages(&tx, &id, commit.expected_len, commit.messages)?;
            if let Some(decision) = &commit.decision {
                let _ = tx.execute(
                    "UPDATE threads SET last_decision = ?1 WHERE id = ?2",
                    params![serde_json::to_string(decision)?, id.as_str()],
                )?;
            }
            tx.commit()?;
            Ok(appended)
        })
        .await
    }

    async fn set_run_config(&self, id: &ThreadId, run_config: Option<RunConfig>) -> Result<()> {
        let id = id.clone();
        self.blocking(move |conn| {
            let updated = conn.execute(
                "UPDATE threads SET run_config = ?1 WHERE id = ?2",
                params![encode_json(run_config.as_ref())?, id.as_str()],
            )?;
            if updated == 0 {
                return Err(StoreError::ThreadNotFound(id));
            }
            Ok(())
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn structured_string_content_keeps_its_kind() {
        let store = SqliteThreadStore::in_memory().unwrap();
        let thread = store.create(None).await.unwrap();
        let _ = store
            .append(&thread.id, 0, NewMessage::tool_result(json!("plain")))
            .await
            .unwrap();
        let back = store.get(&thread.id).await.unwrap();
        assert_eq!(
            back.messages[0].content,
            MessageContent::Structured(json!("plain"))
        );
    }

    #[tokio::test]
    async fn set_run_config_unknown_thread() {
        let store = SqliteThreadStore::in_memory().unwrap();
        let err = store
            .set_run_config(&ThreadId::from_string("thr_missing"), None)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::ThreadNotFound(_));
    }

    #[tokio::test]
    async fn reopen_file_preserves_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threads.db");
        let id = {
            let store = SqliteThreadStore::open(&path, &ConnectionConfig::default()).unwrap();
            let thread = store.create(None).await.unwrap();
            let _ = store
                .append(&thread.id, 0, NewMessage::human("persisted"))
                .await
                .unwrap();
            thread.id
        };
        let store = SqliteThreadStore::open(&path, &ConnectionConfig::default()).unwrap();
        let thread = store.get(&id).await.unwrap();
        assert_eq!(thread.messages[0].content.as_text(), Some("persisted"));
    }
}
