//! Store abstractions shared across relay processes.
//!
//! Two distinct kinds of cross-process state live here: the pending buffer
//! (durable keyed lists with an atomic drain) and the abort bus (ephemeral,
//! best-effort pub/sub). Conversation history and the record of answered
//! source message ids sit beside them.

use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::StoreError;
use crate::llm::ChatMessage;

/// Payload stream returned by [`AbortBus::subscribe`].
pub type NoticeStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Keyed ordered lists with an indivisible read-and-clear.
#[async_trait]
pub trait KeyedListStore: Send + Sync {
    /// Append a value to the end of the list at `key`.
    async fn append(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Atomically return every value at `key` in append order and clear it.
    ///
    /// No append may land between the read and the clear.
    async fn drain(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Number of values currently held at `key`.
    async fn len(&self, key: &str) -> Result<usize, StoreError>;
}

/// At-most-once publish/subscribe bus.
#[async_trait]
pub trait AbortBus: Send + Sync {
    /// Publish a payload. Having no subscribers is not an error.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), StoreError>;

    /// Subscribe to a topic. Payloads published before subscribing are not seen.
    async fn subscribe(&self, topic: &str) -> Result<NoticeStream, StoreError>;
}

/// Per-user conversation history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append messages in order.
    async fn add_messages(&self, user_id: &str, messages: &[ChatMessage])
    -> Result<(), StoreError>;

    /// The most recent `limit` messages, oldest first.
    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Source message ids whose batch has already been answered.
///
/// Shared by every relay process so a redelivered message is never answered
/// twice, including after a restart.
#[async_trait]
pub trait ProcessedIdStore: Send + Sync {
    /// The subset of `ids` already recorded for `user_id`.
    async fn seen(&self, user_id: &str, ids: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Record `ids` as answered. Recording an id twice is not an error.
    async fn mark_processed(&self, user_id: &str, ids: &[String]) -> Result<(), StoreError>;
}
