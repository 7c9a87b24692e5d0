//! Typed view over the per-user pending buffer.

use std::sync::Arc;

use tracing::warn;

use crate::coordinator::types::PendingMessage;
use crate::error::StoreError;
use crate::store::KeyedListStore;

/// Per-user ordered buffer of [`PendingMessage`]s in a shared keyed-list store.
#[derive(Clone)]
pub struct PendingBuffer {
    store: Arc<dyn KeyedListStore>,
}

impl PendingBuffer {
    pub fn new(store: Arc<dyn KeyedListStore>) -> Self {
        Self { store }
    }

    fn key(user_id: &str) -> String {
        format!("pending:{user_id}")
    }

    pub async fn push(&self, user_id: &str, message: &PendingMessage) -> Result<(), StoreError> {
        let value = serde_json::to_string(message)?;
        self.store.append(&Self::key(user_id), value).await
    }

    /// Put previously drained messages back, in order.
    pub async fn restore(
        &self,
        user_id: &str,
        messages: &[PendingMessage],
    ) -> Result<(), StoreError> {
        for message in messages {
            self.push(user_id, message).await?;
        }
        Ok(())
    }

    /// Atomically take every buffered message. Entries that fail to decode are
    /// logged and dropped.
    pub async fn drain(&self, user_id: &str) -> Result<Vec<PendingMessage>, StoreError> {
        let raw = self.store.drain(&Self::key(user_id)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|value| match serde_json::from_str(&value) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(user_id, error = %e, "Dropping undecodable pending message");
                    None
                }
            })
            .collect())
    }

    pub async fn len(&self, user_id: &str) -> Result<usize, StoreError> {
        self.store.len(&Self::key(user_id)).await
    }
}
