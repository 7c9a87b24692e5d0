//! Turns one user's buffered messages into a single channel execution.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::coordinator::buffer::PendingBuffer;
use crate::coordinator::cancellation::CancellationRegistry;
use crate::coordinator::debounce::DebounceCoordinator;
use crate::coordinator::types::{CombineTask, PendingMessage};
use crate::error::{Error, JobError};
use crate::pipeline::{ChannelOrchestrator, ChannelRequest, ExecuteOptions};
use crate::store::ProcessedIdStore;
use crate::worker::{TaskContext, TaskHandler};

/// Handler for combine tasks.
///
/// Drains the user's buffer, merges the batch, and runs it against the
/// primary channel under a fresh cancellation token.
///
/// - Superseded (cancelled) batches go back into the buffer and the combine
///   task is re-armed, so they join the newer messages.
/// - Failed batches go back into the buffer and the error is returned to the
///   scheduler for retry. On the final attempt, or for errors that are never
///   retried, the batch is dropped and the fallback notice is sent instead.
/// - If the buffer cannot be drained on the final attempt, or a failed batch
///   cannot be put back, the user gets the fallback notice and the task stops.
///
/// Source ids of answered batches go to the shared [`ProcessedIdStore`], so a
/// redelivered message is skipped by every relay process.
pub struct BatchProcessor {
    buffer: PendingBuffer,
    coordinator: Arc<DebounceCoordinator>,
    registry: Arc<CancellationRegistry>,
    orchestrator: Arc<ChannelOrchestrator>,
    primary_channel: String,
    fallback_message: String,
    processed: Arc<dyn ProcessedIdStore>,
}

impl BatchProcessor {
    pub fn new(
        buffer: PendingBuffer,
        coordinator: Arc<DebounceCoordinator>,
        registry: Arc<CancellationRegistry>,
        orchestrator: Arc<ChannelOrchestrator>,
        processed: Arc<dyn ProcessedIdStore>,
        primary_channel: impl Into<String>,
        fallback_message: impl Into<String>,
    ) -> Self {
        Self {
            buffer,
            coordinator,
            registry,
            orchestrator,
            primary_channel: primary_channel.into(),
            fallback_message: fallback_message.into(),
            processed,
        }
    }

    /// Process the combine task for one user.
    pub async fn on_combine_task(&self, task: &CombineTask, ctx: &TaskContext) -> Result<(), Error> {
        let user_id = task.user_id.as_str();

        let drained = match self.buffer.drain(user_id).await {
            Ok(drained) => drained,
            Err(err) => {
                if ctx.is_final_attempt() {
                    error!(
                        user_id,
                        attempt = ctx.attempt,
                        error = %err,
                        "Buffer unreadable on final attempt, sending fallback notice"
                    );
                    self.send_fallback(user_id, &task.chat_id).await;
                }
                return Err(err.into());
            }
        };
        if drained.is_empty() {
            debug!(user_id, "Combine task found an empty buffer");
            return Ok(());
        }
        let drained_count = drained.len();

        let batch = dedupe_and_sort(self.drop_processed(user_id, drained).await);
        if batch.is_empty() {
            info!(user_id, drained = drained_count, "Batch held only already-processed messages");
            return Ok(());
        }

        let merged = merge_messages(&batch);
        info!(
            user_id,
            drained = drained_count,
            count = batch.len(),
            attempt = ctx.attempt,
            "Dispatching combined batch"
        );

        let lease = self.registry.register(user_id);
        let result = self
            .orchestrator
            .execute(
                &self.primary_channel,
                ChannelRequest::new(merged, user_id, &task.chat_id),
                ExecuteOptions::with_cancellation(lease.token()),
            )
            .await;
        drop(lease);

        match result {
            Ok(outcome) => {
                self.remember_processed(user_id, &batch).await;
                info!(
                    user_id,
                    count = batch.len(),
                    outputs_succeeded = outcome.outputs_succeeded,
                    "Batch answered"
                );
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                info!(user_id, count = batch.len(), "Batch superseded by newer input");
                if let Err(requeue_err) = self
                    .coordinator
                    .requeue(user_id, &task.chat_id, &task.source_label, &batch)
                    .await
                {
                    warn!(user_id, error = %requeue_err, "Failed to requeue superseded batch");
                }
                Ok(())
            }
            Err(e) => {
                let err = Error::from(e);
                if ctx.is_final_attempt() || !err.is_retryable() {
                    error!(
                        user_id,
                        attempt = ctx.attempt,
                        error = %err,
                        "Batch failed, sending fallback notice"
                    );
                    self.send_fallback(user_id, &task.chat_id).await;
                } else if let Err(restore_err) = self.buffer.restore(user_id, &batch).await {
                    error!(
                        user_id,
                        count = batch.len(),
                        error = %restore_err,
                        "Failed to restore batch for retry, sending fallback notice"
                    );
                    self.send_fallback(user_id, &task.chat_id).await;
                    return Err(JobError::Abandoned {
                        key: ctx.dedup_id.clone(),
                        reason: format!("batch could not be restored: {restore_err}"),
                    }
                    .into());
                }
                Err(err)
            }
        }
    }

    async fn send_fallback(&self, user_id: &str, chat_id: &str) {
        let delivered = self
            .orchestrator
            .notify(&self.primary_channel, user_id, chat_id, &self.fallback_message)
            .await;
        if !delivered {
            warn!(user_id, "Fallback notice could not be delivered");
        }
    }

    async fn drop_processed(
        &self,
        user_id: &str,
        messages: Vec<PendingMessage>,
    ) -> Vec<PendingMessage> {
        let ids = source_ids(&messages);
        if ids.is_empty() {
            return messages;
        }
        let seen = match self.processed.seen(user_id, &ids).await {
            Ok(seen) => seen,
            Err(e) => {
                warn!(user_id, error = %e, "Processed-id lookup failed, keeping whole batch");
                return messages;
            }
        };
        if seen.is_empty() {
            return messages;
        }
        messages
            .into_iter()
            .filter(|m| {
                let repeat = !m.source_message_id.is_empty() && seen.contains(&m.source_message_id);
                if repeat {
                    debug!(user_id, message_id = %m.source_message_id, "Skipping already-processed message");
                }
                !repeat
            })
            .collect()
    }

    async fn remember_processed(&self, user_id: &str, batch: &[PendingMessage]) {
        let ids = source_ids(batch);
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.processed.mark_processed(user_id, &ids).await {
            warn!(user_id, error = %e, "Failed to record processed message ids");
        }
    }
}

fn source_ids(messages: &[PendingMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| !m.source_message_id.is_empty())
        .map(|m| m.source_message_id.clone())
        .collect()
}

#[async_trait]
impl TaskHandler for BatchProcessor {
    async fn run(&self, payload: serde_json::Value, ctx: &TaskContext) -> Result<(), Error> {
        let task: CombineTask =
            serde_json::from_value(payload).map_err(|e| JobError::InvalidPayload {
                key: ctx.dedup_id.clone(),
                reason: e.to_string(),
            })?;
        self.on_combine_task(&task, ctx).await
    }
}

/// Drop repeated source ids (first occurrence wins), then order by enqueue
/// time. Messages without an id are never treated as duplicates.
pub fn dedupe_and_sort(messages: Vec<PendingMessage>) -> Vec<PendingMessage> {
    let mut seen = HashSet::new();
    let mut unique: Vec<PendingMessage> = messages
        .into_iter()
        .filter(|m| m.source_message_id.is_empty() || seen.insert(m.source_message_id.clone()))
        .collect();
    unique.sort_by_key(|m| m.enqueued_at);
    unique
}

/// Merge a sorted batch into one request text.
///
/// The first message is tagged with its source. Later ones are tagged
/// `[Follow-up]`, or `[Follow-up, Source]` when they came from elsewhere.
pub fn merge_messages(messages: &[PendingMessage]) -> String {
    let Some(first) = messages.first() else {
        return String::new();
    };
    let mut parts = Vec::with_capacity(messages.len());
    parts.push(format!("[{}]: {}", first.source_label, first.text));
    for message in &messages[1..] {
        if message.source_label == first.source_label {
            parts.push(format!("[Follow-up]: {}", message.text));
        } else {
            parts.push(format!("[Follow-up, {}]: {}", message.source_label, message.text));
        }
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str, id: &str, at: i64, label: &str) -> PendingMessage {
        PendingMessage::new(text, id, at, label)
    }

    #[test]
    fn single_message_is_labelled() {
        assert_eq!(
            merge_messages(&[msg("hello", "1", 1000, "Telegram")]),
            "[Telegram]: hello"
        );
    }

    #[test]
    fn same_source_follow_ups() {
        let batch = dedupe_and_sort(vec![
            msg("First", "1", 1000, "Telegram"),
            msg("Second", "2", 2000, "Telegram"),
        ]);
        assert_eq!(
            merge_messages(&batch),
            "[Telegram]: First\n\n[Follow-up]: Second"
        );
    }

    #[test]
    fn duplicate_id_keeps_first_occurrence() {
        let batch = dedupe_and_sort(vec![
            msg("First", "1", 1000, "Telegram"),
            msg("Second", "2", 2000, "Telegram"),
            msg("First again", "1", 1001, "Telegram"),
        ]);
        assert_eq!(
            merge_messages(&batch),
            "[Telegram]: First\n\n[Follow-up]: Second"
        );
    }

    #[test]
    fn cross_source_follow_up_names_its_source() {
        let batch = dedupe_and_sort(vec![
            msg("text-a", "a", 1, "A"),
            msg("text-b", "b", 2, "B"),
        ]);
        assert_eq!(merge_messages(&batch), "[A]: text-a\n\n[Follow-up, B]: text-b");
    }

    #[test]
    fn sorts_by_timestamp_regardless_of_arrival() {
        let batch = dedupe_and_sort(vec![
            msg("late", "2", 2000, "Sms"),
            msg("early", "1", 1000, "Sms"),
        ]);
        assert_eq!(merge_messages(&batch), "[Sms]: early\n\n[Follow-up]: late");
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let batch = dedupe_and_sort(vec![msg("x", "1", 5, "A"), msg("y", "2", 5, "A")]);
        assert_eq!(batch[0].text, "x");
        assert_eq!(batch[1].text, "y");
    }

    #[test]
    fn messages_without_ids_are_all_kept() {
        let batch = dedupe_and_sort(vec![msg("x", "", 1, "A"), msg("y", "", 2, "A")]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn empty_batch_merges_to_empty_string() {
        assert_eq!(merge_messages(&[]), "");
    }
}
