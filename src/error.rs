//! Error types for the relay.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

impl Error {
    /// Whether a delayed task that failed with this error should run again.
    ///
    /// Configuration problems and cancellations never heal on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Job(
                JobError::InvalidPayload { .. }
                | JobError::NoHandler { .. }
                | JobError::Abandoned { .. },
            ) => false,
            Self::Pipeline(e) => e.is_retryable(),
            _ => true,
        }
    }
}

/// Configuration-related errors. Raised at build/lookup time, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Channel '{id}' has no system prompt")]
    MissingSystemPrompt { id: String },

    #[error("Channel '{id}' is already registered")]
    DuplicateChannel { id: String },

    #[error("Unknown channel '{id}'. Known channels: [{}]", .known.join(", "))]
    UnknownChannel { id: String, known: Vec<String> },
}

/// Shared-store errors (keyed lists, pub/sub, conversation history).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Publish to topic {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Transport / output delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Output handler {name} panicked")]
    Panicked { name: String },
}

/// Generation engine errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Generation cancelled")]
    Cancelled,

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Tool loop exceeded {max_rounds} rounds")]
    ToolLoopExceeded { max_rounds: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },
}

/// Delayed-task scheduling errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("No handler registered for task key {key}")]
    NoHandler { key: String },

    #[error("Scheduler is shut down")]
    Shutdown,

    #[error("Invalid payload for task {key}: {reason}")]
    InvalidPayload { key: String, reason: String },

    /// The task's input is gone; running it again cannot help.
    #[error("Task {key} abandoned: {reason}")]
    Abandoned { key: String, reason: String },
}

/// Pipeline execution errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Newer input superseded this run. Expected, never retried or reported.
    #[error("Execution cancelled by newer input")]
    Cancelled,

    #[error("Transformer {name} failed: {reason}")]
    Transform { name: String, reason: String },

    #[error("Enricher {name} failed: {reason}")]
    Enrich { name: String, reason: String },

    #[error("Generation failed: {0}")]
    Generation(LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Whether this is the distinguished cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Transformers are pure, so their failures repeat on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled | Self::Config(_) | Self::Transform { .. }
        )
    }
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => Self::Cancelled,
            other => Self::Generation(other),
        }
    }
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
