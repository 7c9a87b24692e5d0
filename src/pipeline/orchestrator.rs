//! Channel orchestrator: runs one request through a channel's pipeline.
//!
//! Stages, in order:
//! 1. transform (sequential fold)
//! 2. enrich (concurrent, failures isolated)
//! 3. assemble (message + context additions)
//! 4. compose tools
//! 5. generate (cancellable)
//! 6. persist (best-effort)
//! 7. output (concurrent, failures isolated)

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::error::{ChannelError, PipelineError};
use crate::llm::{ChatMessage, GenerationEngine, GenerationRequest};
use crate::pipeline::config::ChannelConfig;
use crate::pipeline::registry::ChannelRegistry;
use crate::pipeline::stages::OutputHandler;
use crate::pipeline::types::{
    ChannelRequest, EnrichmentRequest, EnrichmentResult, ExecuteOptions, ExecutionResult,
    OutputContext, TransformContext,
};
use crate::store::ConversationStore;
use crate::tools::{ToolScope, compose_tools};

/// Executes requests against registered channels.
pub struct ChannelOrchestrator {
    registry: Arc<ChannelRegistry>,
    engine: Arc<dyn GenerationEngine>,
    conversations: Arc<dyn ConversationStore>,
}

impl ChannelOrchestrator {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        engine: Arc<dyn GenerationEngine>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            registry,
            engine,
            conversations,
        }
    }

    /// Run `request` through channel `channel_id`.
    ///
    /// Returns [`PipelineError::Cancelled`] when the cancellation token fires
    /// before or during generation.
    pub async fn execute(
        &self,
        channel_id: &str,
        request: ChannelRequest,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, PipelineError> {
        let config = self.registry.get(channel_id)?;
        let cancellation = options.cancellation.clone().unwrap_or_default();
        debug!(
            channel_id,
            user_id = %request.user_id,
            "Executing channel pipeline"
        );

        // 1. Transform
        let transformed = transform(&config, &request)?;

        // 2. Enrich
        let enrichment = self
            .enrich(
                &config,
                &EnrichmentRequest {
                    message: transformed.clone(),
                    user_id: request.user_id.clone(),
                    chat_id: request.chat_id.clone(),
                },
            )
            .await;

        // 3. Assemble
        let assembled = assemble(&transformed, enrichment.context_additions.as_deref());

        // 4. Compose tools
        let tools = compose_tools(
            config.tool_factories(),
            &ToolScope {
                user_id: request.user_id.clone(),
                chat_id: request.chat_id.clone(),
            },
        );

        // 5. Generate
        if cancellation.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let mut messages = enrichment.conversation_history.unwrap_or_default();
        messages.push(ChatMessage::user(assembled));
        let response = self
            .engine
            .generate(GenerationRequest {
                system_prompt: config.system_prompt().to_string(),
                messages,
                tools,
                cancellation: cancellation.clone(),
            })
            .await?;
        if cancellation.is_cancelled() {
            info!(
                channel_id,
                user_id = %request.user_id,
                "Discarding response superseded during generation"
            );
            return Err(PipelineError::Cancelled);
        }

        // 6. Persist
        self.persist(&request.user_id, &transformed, &response.messages)
            .await;

        // 7. Output
        let outputs_succeeded = if options.skip_outputs {
            true
        } else {
            let handlers = options
                .output_overrides
                .as_deref()
                .unwrap_or(config.outputs());
            let ctx = OutputContext {
                channel_id: config.id().to_string(),
                chat_id: request.chat_id.clone(),
                original_message: request.message.clone(),
            };
            deliver(handlers, &request.user_id, &response.text, &ctx).await
        };

        info!(
            channel_id,
            user_id = %request.user_id,
            response_len = response.text.len(),
            outputs_succeeded,
            "Channel pipeline complete"
        );
        Ok(ExecutionResult {
            text: response.text,
            messages: response.messages,
            outputs_succeeded,
        })
    }

    /// Send `text` straight through a channel's outputs, skipping generation.
    ///
    /// Used for failure notices. Returns whether every output succeeded.
    pub async fn notify(&self, channel_id: &str, user_id: &str, chat_id: &str, text: &str) -> bool {
        let config = match self.registry.get(channel_id) {
            Ok(config) => config,
            Err(e) => {
                warn!(channel_id, user_id, error = %e, "Cannot notify through unknown channel");
                return false;
            }
        };
        let ctx = OutputContext {
            channel_id: config.id().to_string(),
            chat_id: chat_id.to_string(),
            original_message: String::new(),
        };
        deliver(config.outputs(), user_id, text, &ctx).await
    }

    async fn enrich(&self, config: &ChannelConfig, request: &EnrichmentRequest) -> EnrichmentResult {
        if config.enrichers().is_empty() {
            return EnrichmentResult::default();
        }

        let runs = config.enrichers().iter().map(|enricher| async move {
            match AssertUnwindSafe(enricher.enrich(request)).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!(
                        enricher = enricher.name(),
                        user_id = %request.user_id,
                        error = %e,
                        "Enricher failed, continuing without it"
                    );
                    EnrichmentResult::default()
                }
                Err(_) => {
                    error!(
                        enricher = enricher.name(),
                        user_id = %request.user_id,
                        "Enricher panicked, continuing without it"
                    );
                    EnrichmentResult::default()
                }
            }
        });
        EnrichmentResult::merge(join_all(runs).await)
    }

    async fn persist(&self, user_id: &str, transformed: &str, produced: &[ChatMessage]) {
        let mut batch = Vec::with_capacity(produced.len() + 1);
        batch.push(ChatMessage::user(transformed));
        batch.extend_from_slice(produced);
        if let Err(e) = self.conversations.add_messages(user_id, &batch).await {
            warn!(user_id, error = %e, "Failed to persist conversation");
        }
    }
}

fn transform(config: &ChannelConfig, request: &ChannelRequest) -> Result<String, PipelineError> {
    let ctx = TransformContext::from(request);
    config
        .transformers()
        .iter()
        .try_fold(request.message.clone(), |message, transformer| {
            transformer.transform(&message, &ctx)
        })
}

/// Append non-empty context to the message, separated by a blank line.
pub fn assemble(message: &str, context_additions: Option<&str>) -> String {
    match context_additions.filter(|c| !c.trim().is_empty()) {
        Some(context) => format!("{message}\n\n{context}"),
        None => message.to_string(),
    }
}

/// Run every handler concurrently. True only if all of them succeed.
pub(crate) async fn deliver(
    handlers: &[Arc<dyn OutputHandler>],
    user_id: &str,
    text: &str,
    ctx: &OutputContext,
) -> bool {
    let runs = handlers.iter().map(|handler| async move {
        match AssertUnwindSafe(handler.send(user_id, text, ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(output = handler.name(), user_id, error = %e, "Output handler failed");
                false
            }
            Err(_) => {
                let err = ChannelError::Panicked {
                    name: handler.name().to_string(),
                };
                error!(user_id, error = %err, "Output handler aborted");
                false
            }
        }
    });
    join_all(runs).await.into_iter().all(|ok| ok)
}
