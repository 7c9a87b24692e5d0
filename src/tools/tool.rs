//! Tool trait and output types.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use crate::error::ToolError;

/// Name → tool map handed to the generation engine for one request.
pub type ToolSet = HashMap<String, Arc<dyn Tool>>;

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Text returned to the model.
    pub content: String,
    /// Wall time spent executing.
    pub duration: Duration,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>, duration: Duration) -> Self {
        Self {
            content: content.into(),
            duration,
        }
    }
}

/// A capability the model can invoke by name.
///
/// Instances are produced per request by a [`ToolFactory`](crate::tools::ToolFactory),
/// so anything user-specific is bound at creation time.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Fetch an optional string parameter.
pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Fetch a required string parameter.
pub fn require_str<'a>(
    params: &'a serde_json::Value,
    key: &str,
    tool: &str,
) -> Result<&'a str, ToolError> {
    optional_str(params, key).ok_or_else(|| ToolError::InvalidParameters {
        name: tool.to_string(),
        reason: format!("missing string parameter '{key}'"),
    })
}
