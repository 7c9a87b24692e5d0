//! libSQL backend for the durable pending buffer, conversation history and
//! processed message ids.
//!
//! Supports local file and in-memory databases.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::llm::ChatMessage;
use crate::store::migrations;
use crate::store::traits::{ConversationStore, KeyedListStore, ProcessedIdStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(&self.conn).await
    }
}

// ── Keyed lists ─────────────────────────────────────────────────────

#[async_trait]
impl KeyedListStore for LibSqlBackend {
    async fn append(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO keyed_lists (list_key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .await
            .map_err(|e| StoreError::Query(format!("append: {e}")))?;
        Ok(())
    }

    async fn drain(&self, key: &str) -> Result<Vec<String>, StoreError> {
        // One statement: rows appended after it commits stay for the next drain.
        let mut rows = self
            .conn
            .query(
                "DELETE FROM keyed_lists WHERE list_key = ?1 RETURNING id, value",
                params![key],
            )
            .await
            .map_err(|e| StoreError::Query(format!("drain: {e}")))?;

        let mut drained: Vec<(i64, String)> = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("drain: {e}")))?
        {
            let id: i64 = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("drain id: {e}")))?;
            let value: String = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("drain value: {e}")))?;
            drained.push((id, value));
        }

        // RETURNING order is unspecified.
        drained.sort_by_key(|(id, _)| *id);
        debug!(key, count = drained.len(), "Drained keyed list");
        Ok(drained.into_iter().map(|(_, value)| value).collect())
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM keyed_lists WHERE list_key = ?1",
                params![key],
            )
            .await
            .map_err(|e| StoreError::Query(format!("len: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("len: {e}")))?
        {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("len: {e}")))?;
                Ok(usize::try_from(count).unwrap_or(0))
            }
            None => Ok(0),
        }
    }
}

// ── Conversations ───────────────────────────────────────────────────

#[async_trait]
impl ConversationStore for LibSqlBackend {
    async fn add_messages(
        &self,
        user_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), StoreError> {
        for message in messages {
            let payload = serde_json::to_string(message)?;
            self.conn
                .execute(
                    "INSERT INTO conversation_messages (user_id, role, payload)
                     VALUES (?1, ?2, ?3)",
                    params![user_id, message.role.as_str(), payload],
                )
                .await
                .map_err(|e| StoreError::Query(format!("add_messages: {e}")))?;
        }
        Ok(())
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT payload FROM (
                     SELECT id, payload FROM conversation_messages
                     WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2
                 ) ORDER BY id ASC",
                params![user_id, limit],
            )
            .await
            .map_err(|e| StoreError::Query(format!("recent_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("recent_messages: {e}")))?
        {
            let payload: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("recent_messages: {e}")))?;
            messages.push(serde_json::from_str(&payload)?);
        }
        Ok(messages)
    }
}

// ── Processed ids ───────────────────────────────────────────────────

#[async_trait]
impl ProcessedIdStore for LibSqlBackend {
    async fn seen(&self, user_id: &str, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let mut seen = HashSet::new();
        for id in ids {
            let mut rows = self
                .conn
                .query(
                    "SELECT 1 FROM processed_messages WHERE user_id = ?1 AND message_id = ?2",
                    params![user_id, id.as_str()],
                )
                .await
                .map_err(|e| StoreError::Query(format!("seen: {e}")))?;
            if rows
                .next()
                .await
                .map_err(|e| StoreError::Query(format!("seen: {e}")))?
                .is_some()
            {
                seen.insert(id.clone());
            }
        }
        Ok(seen)
    }

    async fn mark_processed(&self, user_id: &str, ids: &[String]) -> Result<(), StoreError> {
        for id in ids {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO processed_messages (user_id, message_id)
                     VALUES (?1, ?2)",
                    params![user_id, id.as_str()],
                )
                .await
                .map_err(|e| StoreError::Query(format!("mark_processed: {e}")))?;
        }
        debug!(user_id, count = ids.len(), "Recorded processed message ids");
        Ok(())
    }
}
