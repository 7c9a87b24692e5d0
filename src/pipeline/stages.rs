//! Stage contracts for the channel pipeline.

use async_trait::async_trait;

use crate::error::{ChannelError, PipelineError};
use crate::pipeline::types::{EnrichmentRequest, EnrichmentResult, OutputContext, TransformContext};

/// Pure string rewrite applied before enrichment. Transformers run in order,
/// each receiving the previous one's output.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, message: &str, ctx: &TransformContext) -> Result<String, PipelineError>;
}

/// Adds context or history to a request. Enrichers run concurrently; a failing
/// one contributes nothing.
#[async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResult, PipelineError>;
}

/// Delivers a response somewhere. Handlers run concurrently and fail
/// independently.
#[async_trait]
pub trait OutputHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, user_id: &str, text: &str, ctx: &OutputContext)
    -> Result<(), ChannelError>;
}
