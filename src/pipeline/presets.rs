//! Stock channel definitions.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::ConfigError;
use crate::pipeline::builtin::{
    ClockEnricher, HistoryEnricher, MentionStripTransformer, ScheduledTaskTransformer,
    TrimTransformer,
};
use crate::pipeline::config::{ChannelBuilder, ChannelConfig};
use crate::pipeline::registry::ChannelRegistry;
use crate::pipeline::stages::OutputHandler;
use crate::store::ConversationStore;
use crate::tools::ToolFactory;

pub const ASSISTANT_CHANNEL: &str = "assistant";
pub const SCHEDULED_CHANNEL: &str = "scheduled";

/// Collaborators the stock channels are assembled from.
#[derive(Clone)]
pub struct PresetDeps {
    pub conversations: Arc<dyn ConversationStore>,
    pub tool_factories: Vec<Arc<dyn ToolFactory>>,
    pub outputs: Vec<Arc<dyn OutputHandler>>,
    /// Assistant handle to strip from messages, e.g. `@relay`.
    pub mention_name: Option<String>,
}

fn with_tools(mut builder: ChannelBuilder, deps: &PresetDeps) -> ChannelBuilder {
    for factory in &deps.tool_factories {
        builder = builder.tool_factory(Arc::clone(factory));
    }
    builder
}

/// Interactive channel: trims and strips mentions, loads history and the
/// clock, replies through every configured output.
pub fn assistant(config: &RelayConfig, deps: &PresetDeps) -> Result<ChannelConfig, ConfigError> {
    let mut builder = ChannelBuilder::new(ASSISTANT_CHANNEL)
        .system_prompt(&config.system_prompt)
        .transformer(Arc::new(TrimTransformer));
    if let Some(name) = &deps.mention_name {
        builder = builder.transformer(Arc::new(MentionStripTransformer::new(name)?));
    }
    let builder = builder
        .enricher(Arc::new(HistoryEnricher::new(
            Arc::clone(&deps.conversations),
            config.history_limit,
        )))
        .enricher(Arc::new(ClockEnricher))
        .outputs(deps.outputs.iter().cloned());
    with_tools(builder, deps).build()
}

/// Scheduled-task channel: no history, task context prefixed.
///
/// The relay itself never produces scheduled requests. This channel is for
/// embedders that run their own task scheduler and call
/// [`ChannelOrchestrator::execute`](crate::pipeline::ChannelOrchestrator::execute)
/// with a request built by [`ChannelRequest::scheduled`](crate::pipeline::ChannelRequest::scheduled).
pub fn scheduled(config: &RelayConfig, deps: &PresetDeps) -> Result<ChannelConfig, ConfigError> {
    let builder = ChannelBuilder::new(SCHEDULED_CHANNEL)
        .system_prompt(&config.system_prompt)
        .transformer(Arc::new(TrimTransformer))
        .transformer(Arc::new(ScheduledTaskTransformer))
        .enricher(Arc::new(ClockEnricher))
        .outputs(deps.outputs.iter().cloned());
    with_tools(builder, deps).build()
}

/// Register both stock channels.
pub fn register_defaults(
    registry: &ChannelRegistry,
    config: &RelayConfig,
    deps: &PresetDeps,
) -> Result<(), ConfigError> {
    registry.register(assistant(config, deps)?)?;
    registry.register(scheduled(config, deps)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::builtin::LogOutput;
    use crate::store::InMemoryConversationStore;
    use crate::tools::{StaticToolFactory, builtin::CurrentTimeTool};

    fn deps() -> PresetDeps {
        PresetDeps {
            conversations: Arc::new(InMemoryConversationStore::new()),
            tool_factories: vec![Arc::new(StaticToolFactory::new(
                "builtin",
                vec![Arc::new(CurrentTimeTool)],
            ))],
            outputs: vec![Arc::new(LogOutput)],
            mention_name: Some("relay".into()),
        }
    }

    #[test]
    fn assistant_preset_shape() {
        let channel = assistant(&RelayConfig::default(), &deps()).unwrap();
        assert_eq!(channel.id(), ASSISTANT_CHANNEL);
        let transformers: Vec<_> = channel.transformers().iter().map(|t| t.name()).collect();
        assert_eq!(transformers, vec!["trim", "mention_strip"]);
        let enrichers: Vec<_> = channel.enrichers().iter().map(|e| e.name()).collect();
        assert_eq!(enrichers, vec!["history", "clock"]);
        assert_eq!(channel.tool_factories().len(), 1);
        assert_eq!(channel.outputs().len(), 1);
    }

    #[test]
    fn scheduled_preset_prefixes_task_header() {
        use chrono::TimeZone;

        use crate::pipeline::Transformer;

        let channel = scheduled(&RelayConfig::default(), &deps()).unwrap();
        let ctx = crate::pipeline::TransformContext {
            user_id: "u1".into(),
            chat_id: "c1".into(),
            scheduled_time: Some(chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()),
            task_id: Some("t-7".into()),
        };
        let mut message = "  water the plants ".to_string();
        for transformer in channel.transformers() {
            message = transformer.transform(&message, &ctx).unwrap();
        }
        assert_eq!(
            message,
            "[Scheduled task t-7 due 2026-01-02T03:04:05+00:00]\nwater the plants"
        );
    }

    #[test]
    fn scheduled_preset_skips_history() {
        let channel = scheduled(&RelayConfig::default(), &deps()).unwrap();
        assert!(channel.enrichers().iter().all(|e| e.name() != "history"));
        assert!(
            channel
                .transformers()
                .iter()
                .any(|t| t.name() == "scheduled_task")
        );
    }

    #[test]
    fn register_defaults_is_write_once() {
        let registry = ChannelRegistry::new();
        let config = RelayConfig::default();
        register_defaults(&registry, &config, &deps()).unwrap();
        assert_eq!(registry.list_ids(), vec!["assistant", "scheduled"]);
        assert!(matches!(
            register_defaults(&registry, &config, &deps()),
            Err(ConfigError::DuplicateChannel { .. })
        ));
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let config = RelayConfig {
            system_prompt: String::new(),
            ..RelayConfig::default()
        };
        assert!(matches!(
            assistant(&config, &deps()),
            Err(ConfigError::MissingSystemPrompt { .. })
        ));
    }
}
