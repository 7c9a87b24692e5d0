//! Delayed task types.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, JobError};

/// A unit of deferred work.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// Selects the handler.
    pub key: String,
    pub payload: serde_json::Value,
    pub delay: Duration,
    /// Scheduling again with the same id before the task fires replaces it
    /// and restarts the delay.
    pub dedup_id: String,
}

impl ScheduledTask {
    pub fn new(
        key: impl Into<String>,
        payload: serde_json::Value,
        delay: Duration,
        dedup_id: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            payload,
            delay,
            dedup_id: dedup_id.into(),
        }
    }
}

/// Per-attempt context handed to a [`TaskHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub dedup_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl TaskContext {
    /// Whether a failure now exhausts the retry policy.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Runs tasks of one key. An `Err` hands the task back to the retry policy.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, payload: serde_json::Value, ctx: &TaskContext) -> Result<(), Error>;
}

/// Deduplicating delayed-task facility.
#[async_trait]
pub trait DelayedTaskQueue: Send + Sync {
    async fn schedule(&self, task: ScheduledTask) -> Result<(), JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_attempt_detection() {
        let mut ctx = TaskContext {
            dedup_id: "combine:u1".into(),
            attempt: 1,
            max_attempts: 3,
        };
        assert!(!ctx.is_final_attempt());
        ctx.attempt = 3;
        assert!(ctx.is_final_attempt());
    }
}
