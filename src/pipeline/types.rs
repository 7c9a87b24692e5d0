//! Shared types for the channel pipeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::llm::ChatMessage;
use crate::pipeline::stages::OutputHandler;

// ── Request ─────────────────────────────────────────────────────────

/// One combined request to run through a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRequest {
    pub message: String,
    pub user_id: String,
    pub chat_id: String,
    /// Set when the request comes from a scheduled task rather than a user.
    pub scheduled_time: Option<DateTime<Utc>>,
    pub task_id: Option<String>,
}

impl ChannelRequest {
    pub fn new(
        message: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            scheduled_time: None,
            task_id: None,
        }
    }

    pub fn scheduled(mut self, at: DateTime<Utc>, task_id: impl Into<String>) -> Self {
        self.scheduled_time = Some(at);
        self.task_id = Some(task_id.into());
        self
    }
}

/// Per-call knobs for [`ChannelOrchestrator::execute`](crate::pipeline::ChannelOrchestrator::execute).
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Passed through to the generation engine. A fresh token is used when absent.
    pub cancellation: Option<CancellationToken>,
    /// Replaces the channel's configured outputs for this call.
    pub output_overrides: Option<Vec<Arc<dyn OutputHandler>>>,
    /// Run no outputs at all.
    pub skip_outputs: bool,
}

impl ExecuteOptions {
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..Self::default()
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub text: String,
    /// Messages produced by the engine, in order.
    pub messages: Vec<ChatMessage>,
    /// True when every output handler completed without error (or none ran).
    pub outputs_succeeded: bool,
}

// ── Stage contexts ──────────────────────────────────────────────────

/// Read-only context shared by every transformer of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformContext {
    pub user_id: String,
    pub chat_id: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub task_id: Option<String>,
}

impl From<&ChannelRequest> for TransformContext {
    fn from(request: &ChannelRequest) -> Self {
        Self {
            user_id: request.user_id.clone(),
            chat_id: request.chat_id.clone(),
            scheduled_time: request.scheduled_time,
            task_id: request.task_id.clone(),
        }
    }
}

/// Input to every enricher.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentRequest {
    /// The transformed message.
    pub message: String,
    pub user_id: String,
    pub chat_id: String,
}

/// Contribution of one enricher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentResult {
    /// Text appended to the user message.
    pub context_additions: Option<String>,
    /// Prior conversation placed before the user message.
    pub conversation_history: Option<Vec<ChatMessage>>,
}

impl EnrichmentResult {
    pub fn context(text: impl Into<String>) -> Self {
        Self {
            context_additions: Some(text.into()),
            conversation_history: None,
        }
    }

    pub fn history(messages: Vec<ChatMessage>) -> Self {
        Self {
            context_additions: None,
            conversation_history: Some(messages),
        }
    }

    /// Merge results given in enricher order.
    ///
    /// Non-empty context additions are joined with blank lines in order. The
    /// first non-empty history wins.
    pub fn merge(results: impl IntoIterator<Item = EnrichmentResult>) -> Self {
        let mut additions: Vec<String> = Vec::new();
        let mut history: Option<Vec<ChatMessage>> = None;

        for result in results {
            if let Some(text) = result.context_additions
                && !text.trim().is_empty()
            {
                additions.push(text);
            }
            if history.is_none()
                && let Some(messages) = result.conversation_history
                && !messages.is_empty()
            {
                history = Some(messages);
            }
        }

        Self {
            context_additions: (!additions.is_empty()).then(|| additions.join("\n\n")),
            conversation_history: history,
        }
    }
}

/// Context handed to every output handler.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputContext {
    pub channel_id: String,
    pub chat_id: String,
    /// The request message before transformation.
    pub original_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_joins_additions_in_order() {
        let merged = EnrichmentResult::merge([
            EnrichmentResult::context("X"),
            EnrichmentResult::default(),
            EnrichmentResult::context("   "),
            EnrichmentResult::context("Y"),
        ]);
        assert_eq!(merged.context_additions.as_deref(), Some("X\n\nY"));
        assert!(merged.conversation_history.is_none());
    }

    #[test]
    fn merge_keeps_first_non_empty_history() {
        let merged = EnrichmentResult::merge([
            EnrichmentResult::history(Vec::new()),
            EnrichmentResult::history(vec![ChatMessage::user("first")]),
            EnrichmentResult::history(vec![ChatMessage::user("second")]),
        ]);
        let history = merged.conversation_history.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "first");
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert_eq!(EnrichmentResult::merge([]), EnrichmentResult::default());
    }

    #[test]
    fn merge_is_associative_over_additions() {
        let a = || EnrichmentResult::context("a");
        let b = || EnrichmentResult::context("b");
        let c = || EnrichmentResult::context("c");
        let left = EnrichmentResult::merge([EnrichmentResult::merge([a(), b()]), c()]);
        let right = EnrichmentResult::merge([a(), EnrichmentResult::merge([b(), c()])]);
        assert_eq!(left.context_additions, right.context_additions);
    }
}
