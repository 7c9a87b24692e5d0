//! Channel pipeline: named, statically configured request processors.
//!
//! A channel runs transform → enrich → assemble → tools → generate →
//! persist → output for one request.

pub mod builtin;
pub mod config;
pub mod orchestrator;
pub mod presets;
pub mod registry;
pub mod stages;
pub mod types;

pub use config::{ChannelBuilder, ChannelConfig};
pub use orchestrator::ChannelOrchestrator;
pub use registry::ChannelRegistry;
pub use stages::{Enricher, OutputHandler, Transformer};
pub use types::{
    ChannelRequest, EnrichmentRequest, EnrichmentResult, ExecuteOptions, ExecutionResult,
    OutputContext, TransformContext,
};
