//! Anthropic Messages API engine with an internal tool loop.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LlmError, ToolError};
use crate::llm::provider::{
    ChatMessage, GenerationEngine, GenerationRequest, GenerationResponse, Role, ToolCall,
    ToolDefinition,
};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

/// Maximum model rounds per generation (one round = one HTTP call).
const DEFAULT_MAX_ROUNDS: usize = 8;

const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Generation engine backed by the Anthropic Messages API.
pub struct AnthropicEngine {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    max_rounds: usize,
    base_url: String,
}

impl AnthropicEngine {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_rounds: DEFAULT_MAX_ROUNDS,
            base_url: ANTHROPIC_MESSAGES_URL.to_string(),
        }
    }

    /// Point the engine at a different endpoint (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<AnthropicResponse, LlmError> {
        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after,
            });
        }

        let text = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("status={status} body={text}"),
            });
        }

        serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl GenerationEngine for AnthropicEngine {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let tool_defs = request.tool_definitions();
        let mut transcript = request.messages.clone();
        let mut produced = Vec::new();

        for round in 0..self.max_rounds {
            if request.cancellation.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let body = AnthropicRequest::new(
                &self.model,
                self.max_tokens,
                &request.system_prompt,
                &transcript,
                &tool_defs,
            );

            let response = tokio::select! {
                _ = request.cancellation.cancelled() => return Err(LlmError::Cancelled),
                result = self.send(&body) => result?,
            };

            let assistant = response.into_message();
            debug!(
                round,
                tool_calls = assistant.tool_calls.len(),
                "Anthropic round complete"
            );
            transcript.push(assistant.clone());
            produced.push(assistant.clone());

            if assistant.tool_calls.is_empty() {
                info!(rounds = round + 1, model = %self.model, "Generation complete");
                return Ok(GenerationResponse {
                    text: assistant.content,
                    messages: produced,
                });
            }

            for call in &assistant.tool_calls {
                if request.cancellation.is_cancelled() {
                    return Err(LlmError::Cancelled);
                }
                let output = match request.tools.get(&call.name) {
                    Some(tool) => match tool.execute(call.arguments.clone()).await {
                        Ok(out) => out.content,
                        Err(e) => {
                            warn!(tool = %call.name, error = %e, "Tool call failed");
                            format!("Error: {e}")
                        }
                    },
                    None => {
                        warn!(tool = %call.name, "Model requested unknown tool");
                        let err = ToolError::NotFound {
                            name: call.name.clone(),
                        };
                        format!("Error: {err}")
                    }
                };
                let result = ChatMessage::tool_result(&call.id, output);
                transcript.push(result.clone());
                produced.push(result);
            }
        }

        Err(LlmError::ToolLoopExceeded {
            max_rounds: self.max_rounds,
        })
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

impl AnthropicRequest {
    fn new(
        model: &str,
        max_tokens: u32,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Self {
        let mut system = system_prompt.trim().to_string();
        let mut out: Vec<AnthropicMessage> = Vec::new();

        for m in messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(m.content.trim());
                }
                Role::User => out.push(AnthropicMessage {
                    role: "user",
                    content: vec![AnthropicContentBlock::Text {
                        text: m.content.clone(),
                    }],
                }),
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !m.content.trim().is_empty() {
                        blocks.push(AnthropicContentBlock::Text {
                            text: m.content.clone(),
                        });
                    }
                    for call in &m.tool_calls {
                        blocks.push(AnthropicContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        });
                    }
                    if !blocks.is_empty() {
                        out.push(AnthropicMessage {
                            role: "assistant",
                            content: blocks,
                        });
                    }
                }
                Role::Tool => {
                    let block = AnthropicContentBlock::ToolResult {
                        tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
                        content: m.content.clone(),
                    };
                    // All results for one assistant turn travel in a single user message.
                    match out.last_mut() {
                        Some(last)
                            if last.role == "user"
                                && last.content.iter().all(|b| {
                                    matches!(b, AnthropicContentBlock::ToolResult { .. })
                                }) =>
                        {
                            last.content.push(block)
                        }
                        _ => out.push(AnthropicMessage {
                            role: "user",
                            content: vec![block],
                        }),
                    }
                }
            }
        }

        Self {
            model: model.to_string(),
            max_tokens,
            system,
            messages: out,
            tools: tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
}

impl AnthropicResponse {
    fn into_message(self) -> ChatMessage {
        let mut text = String::new();
        let mut calls = Vec::new();
        for block in self.content {
            match block {
                AnthropicContentBlock::Text { text: t } => text.push_str(&t),
                AnthropicContentBlock::ToolUse { id, name, input } => calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                AnthropicContentBlock::ToolResult { .. } | AnthropicContentBlock::Unknown => {}
            }
        }
        ChatMessage::assistant_with_tools(text, calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_fold_into_system_field() {
        let req = AnthropicRequest::new(
            "claude-test",
            512,
            "Base prompt",
            &[ChatMessage::system("Extra rule"), ChatMessage::user("hi")],
            &[],
        );
        assert_eq!(req.system, "Base prompt\nExtra rule");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, "user");
    }

    #[test]
    fn consecutive_tool_results_share_one_user_message() {
        let calls = vec![
            ToolCall {
                id: "a".into(),
                name: "current_time".into(),
                arguments: serde_json::json!({}),
            },
            ToolCall {
                id: "b".into(),
                name: "current_time".into(),
                arguments: serde_json::json!({}),
            },
        ];
        let req = AnthropicRequest::new(
            "claude-test",
            512,
            "",
            &[
                ChatMessage::user("what time is it twice?"),
                ChatMessage::assistant_with_tools("", calls),
                ChatMessage::tool_result("a", "12:00"),
                ChatMessage::tool_result("b", "12:00"),
            ],
            &[],
        );
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[2].content.len(), 2);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(json["messages"][2]["content"][1]["tool_use_id"], "b");
    }

    #[test]
    fn response_collects_text_and_tool_calls() {
        let raw = serde_json::json!({
            "content": [
                {"type": "text", "text": "Checking. "},
                {"type": "tool_use", "id": "t1", "name": "current_time", "input": {}},
                {"type": "thinking", "thinking": "ignored"}
            ]
        });
        let parsed: AnthropicResponse = serde_json::from_value(raw).unwrap();
        let msg = parsed.into_message();
        assert_eq!(msg.content, "Checking. ");
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].name, "current_time");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_before_any_request() {
        let engine = AnthropicEngine::new(SecretString::from("test-key"), "claude-test")
            .with_base_url("http://127.0.0.1:9/unreachable");
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let result = engine
            .generate(GenerationRequest {
                system_prompt: "p".into(),
                messages: vec![ChatMessage::user("hi")],
                tools: Default::default(),
                cancellation: token,
            })
            .await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}
