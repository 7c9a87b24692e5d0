//! Stock stage implementations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tracing::info;

use crate::error::{ChannelError, ConfigError, PipelineError};
use crate::llm::Role;
use crate::pipeline::stages::{Enricher, OutputHandler, Transformer};
use crate::pipeline::types::{EnrichmentRequest, EnrichmentResult, OutputContext, TransformContext};
use crate::store::ConversationStore;
use crate::transport::Transport;

// ── Transformers ────────────────────────────────────────────────────

/// Trims surrounding whitespace.
pub struct TrimTransformer;

impl Transformer for TrimTransformer {
    fn name(&self) -> &str {
        "trim"
    }

    fn transform(&self, message: &str, _ctx: &TransformContext) -> Result<String, PipelineError> {
        Ok(message.trim().to_string())
    }
}

/// Removes `@name` mentions of the assistant.
pub struct MentionStripTransformer {
    mention: Regex,
    spaces: Regex,
}

impl MentionStripTransformer {
    pub fn new(bot_name: &str) -> Result<Self, ConfigError> {
        let name = bot_name.trim().trim_start_matches('@');
        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "mention".to_string(),
                message: "bot name must not be empty".to_string(),
            });
        }
        let mention = Regex::new(&format!(r"(?i)@{}\b", regex::escape(name))).map_err(|e| {
            ConfigError::InvalidValue {
                key: "mention".to_string(),
                message: e.to_string(),
            }
        })?;
        let spaces = Regex::new(r"[ \t]{2,}").map_err(|e| ConfigError::InvalidValue {
            key: "mention".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { mention, spaces })
    }
}

impl Transformer for MentionStripTransformer {
    fn name(&self) -> &str {
        "mention_strip"
    }

    fn transform(&self, message: &str, _ctx: &TransformContext) -> Result<String, PipelineError> {
        let stripped = self.mention.replace_all(message, "");
        Ok(self.spaces.replace_all(&stripped, " ").trim().to_string())
    }
}

/// Prefixes scheduled-task runs with when and what triggered them.
pub struct ScheduledTaskTransformer;

impl Transformer for ScheduledTaskTransformer {
    fn name(&self) -> &str {
        "scheduled_task"
    }

    fn transform(&self, message: &str, ctx: &TransformContext) -> Result<String, PipelineError> {
        let header = match (&ctx.task_id, &ctx.scheduled_time) {
            (None, None) => return Ok(message.to_string()),
            (Some(id), Some(at)) => format!("[Scheduled task {id} due {}]", at.to_rfc3339()),
            (Some(id), None) => format!("[Scheduled task {id}]"),
            (None, Some(at)) => format!("[Scheduled task due {}]", at.to_rfc3339()),
        };
        Ok(format!("{header}\n{message}"))
    }
}

// ── Enrichers ───────────────────────────────────────────────────────

/// Loads recent conversation history for the user.
///
/// The window always opens on a user turn. Leading assistant turns and tool
/// results whose originating call fell outside the window are dropped.
pub struct HistoryEnricher {
    store: Arc<dyn ConversationStore>,
    limit: usize,
}

impl HistoryEnricher {
    pub fn new(store: Arc<dyn ConversationStore>, limit: usize) -> Self {
        Self { store, limit }
    }
}

#[async_trait]
impl Enricher for HistoryEnricher {
    fn name(&self) -> &str {
        "history"
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResult, PipelineError> {
        if self.limit == 0 {
            return Ok(EnrichmentResult::default());
        }
        let mut messages = self
            .store
            .recent_messages(&request.user_id, self.limit)
            .await
            .map_err(|e| PipelineError::Enrich {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;
        let start = messages
            .iter()
            .position(|m| m.role == Role::User)
            .unwrap_or(messages.len());
        messages.drain(..start);
        Ok(EnrichmentResult::history(messages))
    }
}

/// Adds the current UTC time.
pub struct ClockEnricher;

#[async_trait]
impl Enricher for ClockEnricher {
    fn name(&self) -> &str {
        "clock"
    }

    async fn enrich(&self, _request: &EnrichmentRequest) -> Result<EnrichmentResult, PipelineError> {
        Ok(EnrichmentResult::context(format!(
            "Current time: {}",
            Utc::now().format("%Y-%m-%d %H:%M UTC (%A)")
        )))
    }
}

// ── Outputs ─────────────────────────────────────────────────────────

/// Sends the response back through a transport to the request's chat.
pub struct TransportOutput {
    transport: Arc<dyn Transport>,
}

impl TransportOutput {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl OutputHandler for TransportOutput {
    fn name(&self) -> &str {
        self.transport.name()
    }

    async fn send(&self, _user_id: &str, text: &str, ctx: &OutputContext) -> Result<(), ChannelError> {
        self.transport.send(&ctx.chat_id, text).await
    }
}

/// Records responses in the log only.
pub struct LogOutput;

#[async_trait]
impl OutputHandler for LogOutput {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, user_id: &str, text: &str, ctx: &OutputContext) -> Result<(), ChannelError> {
        info!(
            user_id,
            channel_id = %ctx.channel_id,
            chat_id = %ctx.chat_id,
            response = %text,
            "Response"
        );
        Ok(())
    }
}
