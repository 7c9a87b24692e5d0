//! In-process store backends.
//!
//! Used by tests and by single-process deployments without a database.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::error::StoreError;
use crate::llm::ChatMessage;
use crate::store::traits::{
    AbortBus, ConversationStore, KeyedListStore, NoticeStream, ProcessedIdStore,
};

/// Per-topic broadcast capacity. Slow subscribers skip lagged notices.
const BUS_CAPACITY: usize = 256;

// ── Keyed lists ─────────────────────────────────────────────────────

/// Keyed lists behind a single mutex; drain is a remove under the lock.
#[derive(Default)]
pub struct InMemoryListStore {
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyedListStore for InMemoryListStore {
    async fn append(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push(value);
        Ok(())
    }

    async fn drain(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.lists.lock().await.remove(key).unwrap_or_default())
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.lists.lock().await.get(key).map_or(0, Vec::len))
    }
}

// ── Abort bus ───────────────────────────────────────────────────────

/// Broadcast channel per topic.
#[derive(Default)]
pub struct InMemoryAbortBus {
    topics: DashMap<String, broadcast::Sender<String>>,
}

impl InMemoryAbortBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(BUS_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl AbortBus for InMemoryAbortBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), StoreError> {
        if self.sender(topic).send(payload).is_err() {
            debug!(topic, "Published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<NoticeStream, StoreError> {
        let rx = self.sender(topic).subscribe();
        Ok(Box::pin(
            BroadcastStream::new(rx).filter_map(|item| item.ok()),
        ))
    }
}

// ── Conversations ───────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn add_messages(
        &self,
        user_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), StoreError> {
        self.conversations
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let conversations = self.conversations.lock().await;
        let Some(all) = conversations.get(user_id) else {
            return Ok(Vec::new());
        };
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }
}

// ── Processed ids ───────────────────────────────────────────────────

/// Answered source ids per user. Process-local; lost on restart.
#[derive(Default)]
pub struct InMemoryProcessedIds {
    ids: Mutex<HashMap<String, HashSet<String>>>,
}

impl InMemoryProcessedIds {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedIdStore for InMemoryProcessedIds {
    async fn seen(&self, user_id: &str, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let all = self.ids.lock().await;
        let Some(recorded) = all.get(user_id) else {
            return Ok(HashSet::new());
        };
        Ok(ids
            .iter()
            .filter(|id| recorded.contains(*id))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, user_id: &str, ids: &[String]) -> Result<(), StoreError> {
        self.ids
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .extend(ids.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn drain_returns_in_order_and_clears() {
        let store = InMemoryListStore::new();
        store.append("k", "a".into()).await.unwrap();
        store.append("k", "b".into()).await.unwrap();
        store.append("other", "z".into()).await.unwrap();

        assert_eq!(store.drain("k").await.unwrap(), vec!["a", "b"]);
        assert!(store.drain("k").await.unwrap().is_empty());
        assert_eq!(store.len("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_are_never_lost_across_drains() {
        let store = Arc::new(InMemoryListStore::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append("k", i.to_string()).await.unwrap();
            }));
        }
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.extend(store.drain("k").await.unwrap());
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }
        seen.extend(store.drain("k").await.unwrap());
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers_only() {
        let bus = InMemoryAbortBus::new();
        bus.publish("abort", "early".into()).await.unwrap();

        let mut stream = bus.subscribe("abort").await.unwrap();
        bus.publish("abort", "u1".into()).await.unwrap();
        bus.publish("other", "u2".into()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("u1"));
        let none = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(none.is_err());
    }

    #[tokio::test]
    async fn recent_messages_returns_tail_oldest_first() {
        let store = InMemoryConversationStore::new();
        store
            .add_messages(
                "u1",
                &[
                    ChatMessage::user("one"),
                    ChatMessage::assistant("two"),
                    ChatMessage::user("three"),
                ],
            )
            .await
            .unwrap();
        let recent = store.recent_messages("u1", 2).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert!(store.recent_messages("nobody", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processed_ids_are_scoped_per_user() {
        let store = InMemoryProcessedIds::new();
        store
            .mark_processed("u1", &["1".to_string(), "2".to_string()])
            .await
            .unwrap();

        let seen = store
            .seen("u1", &["2".to_string(), "3".to_string()])
            .await
            .unwrap();
        assert_eq!(seen, HashSet::from(["2".to_string()]));
        assert!(store.seen("u2", &["1".to_string()]).await.unwrap().is_empty());
    }
}
