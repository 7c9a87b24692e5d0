//! Sliding-window debounce of inbound messages.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::coordinator::buffer::PendingBuffer;
use crate::coordinator::types::{
    ABORT_TOPIC, AbortNotice, COMBINE_TASK, CombineTask, PendingMessage, combine_dedup_id,
};
use crate::error::{Error, StoreError};
use crate::store::AbortBus;
use crate::worker::{DelayedTaskQueue, ScheduledTask};

/// Accepts raw messages one at a time and arms one combine task per user.
///
/// Every call publishes an abort notice for the user, appends the message to
/// the pending buffer, and (re)schedules the user's combine task `debounce`
/// from now. Messages arriving within the window end up in one batch.
pub struct DebounceCoordinator {
    buffer: PendingBuffer,
    bus: Arc<dyn AbortBus>,
    queue: Arc<dyn DelayedTaskQueue>,
    debounce: Duration,
}

impl DebounceCoordinator {
    pub fn new(
        buffer: PendingBuffer,
        bus: Arc<dyn AbortBus>,
        queue: Arc<dyn DelayedTaskQueue>,
        debounce: Duration,
    ) -> Self {
        Self {
            buffer,
            bus,
            queue,
            debounce,
        }
    }

    /// Accept one inbound message.
    ///
    /// A failed append or schedule is returned. A failed abort publish is only
    /// logged.
    pub async fn enqueue(
        &self,
        user_id: &str,
        chat_id: &str,
        text: &str,
        source_message_id: &str,
        source_label: &str,
    ) -> Result<(), Error> {
        self.publish_abort(user_id);

        let message = PendingMessage::new(
            text,
            source_message_id,
            chrono::Utc::now().timestamp_millis(),
            source_label,
        );
        self.buffer.push(user_id, &message).await?;

        self.arm(user_id, chat_id, source_label).await?;
        info!(
            user_id,
            source = source_label,
            message_id = source_message_id,
            "Message enqueued"
        );
        Ok(())
    }

    /// Return superseded messages to the buffer and re-arm the combine task so
    /// they join the next batch.
    pub async fn requeue(
        &self,
        user_id: &str,
        chat_id: &str,
        source_label: &str,
        messages: &[PendingMessage],
    ) -> Result<(), Error> {
        self.buffer.restore(user_id, messages).await?;
        self.arm(user_id, chat_id, source_label).await?;
        debug!(user_id, count = messages.len(), "Messages requeued");
        Ok(())
    }

    async fn arm(&self, user_id: &str, chat_id: &str, source_label: &str) -> Result<(), Error> {
        let payload = serde_json::to_value(CombineTask {
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            source_label: source_label.to_string(),
        })
        .map_err(StoreError::from)?;

        self.queue
            .schedule(ScheduledTask::new(
                COMBINE_TASK,
                payload,
                self.debounce,
                combine_dedup_id(user_id),
            ))
            .await?;
        Ok(())
    }

    /// Fire-and-forget abort notice.
    fn publish_abort(&self, user_id: &str) {
        let payload = match serde_json::to_string(&AbortNotice {
            user_id: user_id.to_string(),
        }) {
            Ok(p) => p,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to encode abort notice");
                return;
            }
        };
        let bus = Arc::clone(&self.bus);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = bus.publish(ABORT_TOPIC, payload).await {
                warn!(user_id = %user_id, error = %e, "Abort publish failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::error::{JobError, StoreError};
    use crate::store::{InMemoryAbortBus, InMemoryListStore, KeyedListStore, NoticeStream};

    #[derive(Default)]
    struct RecordingQueue {
        scheduled: Mutex<Vec<ScheduledTask>>,
    }

    #[async_trait]
    impl DelayedTaskQueue for RecordingQueue {
        async fn schedule(&self, task: ScheduledTask) -> Result<(), JobError> {
            self.scheduled.lock().await.push(task);
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl KeyedListStore for FailingStore {
        async fn append(&self, _key: &str, _value: String) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn drain(&self, _key: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        async fn len(&self, _key: &str) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    struct FailingBus;

    #[async_trait]
    impl AbortBus for FailingBus {
        async fn publish(&self, topic: &str, _payload: String) -> Result<(), StoreError> {
            Err(StoreError::Publish {
                topic: topic.into(),
                reason: "down".into(),
            })
        }
        async fn subscribe(&self, _topic: &str) -> Result<NoticeStream, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn enqueue_buffers_publishes_and_schedules() {
        let store = Arc::new(InMemoryListStore::new());
        let bus = Arc::new(InMemoryAbortBus::new());
        let queue = Arc::new(RecordingQueue::default());
        let mut notices = bus.subscribe(ABORT_TOPIC).await.unwrap();
        let coordinator = DebounceCoordinator::new(
            PendingBuffer::new(store.clone()),
            bus.clone(),
            queue.clone(),
            Duration::from_millis(250),
        );

        coordinator
            .enqueue("u1", "chat-1", "hello", "m1", "Telegram")
            .await
            .unwrap();

        assert_eq!(store.len("pending:u1").await.unwrap(), 1);
        let scheduled = queue.scheduled.lock().await;
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].key, COMBINE_TASK);
        assert_eq!(scheduled[0].dedup_id, "combine:u1");
        assert_eq!(scheduled[0].delay, Duration::from_millis(250));
        assert_eq!(scheduled[0].payload["chat_id"], "chat-1");
        assert_eq!(scheduled[0].payload["source_label"], "Telegram");

        let notice = tokio::time::timeout(Duration::from_secs(1), notices.next())
            .await
            .unwrap()
            .unwrap();
        let notice: AbortNotice = serde_json::from_str(&notice).unwrap();
        assert_eq!(notice.user_id, "u1");
    }

    #[tokio::test]
    async fn failed_append_surfaces_and_skips_schedule() {
        let queue = Arc::new(RecordingQueue::default());
        let coordinator = DebounceCoordinator::new(
            PendingBuffer::new(Arc::new(FailingStore)),
            Arc::new(InMemoryAbortBus::new()),
            queue.clone(),
            Duration::from_millis(250),
        );

        let err = coordinator
            .enqueue("u1", "c", "hello", "m1", "Cli")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(queue.scheduled.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_publish_is_swallowed() {
        let store = Arc::new(InMemoryListStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let coordinator = DebounceCoordinator::new(
            PendingBuffer::new(store.clone()),
            Arc::new(FailingBus),
            queue.clone(),
            Duration::from_millis(250),
        );

        coordinator
            .enqueue("u1", "c", "hello", "m1", "Cli")
            .await
            .unwrap();
        assert_eq!(store.len("pending:u1").await.unwrap(), 1);
        assert_eq!(queue.scheduled.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn requeue_restores_and_rearms() {
        let store = Arc::new(InMemoryListStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let coordinator = DebounceCoordinator::new(
            PendingBuffer::new(store.clone()),
            Arc::new(InMemoryAbortBus::new()),
            queue.clone(),
            Duration::from_millis(250),
        );

        let messages = vec![
            PendingMessage::new("a", "1", 1, "Cli"),
            PendingMessage::new("b", "2", 2, "Cli"),
        ];
        coordinator
            .requeue("u1", "c", "Cli", &messages)
            .await
            .unwrap();
        assert_eq!(store.len("pending:u1").await.unwrap(), 2);
        assert_eq!(queue.scheduled.lock().await.len(), 1);
    }
}
