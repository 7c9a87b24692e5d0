//! Messages and payloads exchanged between the coordinator pieces.

use serde::{Deserialize, Serialize};

/// Task key the batch processor is registered under.
pub const COMBINE_TASK: &str = "combine-messages";

/// Bus topic carrying per-user abort notices.
pub const ABORT_TOPIC: &str = "relay:abort";

/// Dedup id shared by every combine task of one user.
pub fn combine_dedup_id(user_id: &str) -> String {
    format!("combine:{user_id}")
}

/// One raw inbound message waiting in a user's pending buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub text: String,
    /// Transport-assigned id. Empty when the transport has none.
    pub source_message_id: String,
    /// Milliseconds since the Unix epoch at enqueue time.
    pub enqueued_at: i64,
    /// Human-readable transport name, e.g. `Telegram`.
    pub source_label: String,
}

impl PendingMessage {
    pub fn new(
        text: impl Into<String>,
        source_message_id: impl Into<String>,
        enqueued_at: i64,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            source_message_id: source_message_id.into(),
            enqueued_at,
            source_label: source_label.into(),
        }
    }
}

/// Payload of a combine task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombineTask {
    pub user_id: String,
    pub chat_id: String,
    /// Label of the most recent message that (re)armed the task.
    pub source_label: String,
}

/// Payload published on [`ABORT_TOPIC`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortNotice {
    pub user_id: String,
}
