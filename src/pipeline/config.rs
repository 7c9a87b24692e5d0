//! Channel configuration and its builder.

use std::sync::Arc;

use crate::error::ConfigError;
use crate::pipeline::stages::{Enricher, OutputHandler, Transformer};
use crate::tools::ToolFactory;

/// A named, immutable pipeline definition.
#[derive(Clone)]
pub struct ChannelConfig {
    id: String,
    system_prompt: String,
    transformers: Vec<Arc<dyn Transformer>>,
    enrichers: Vec<Arc<dyn Enricher>>,
    tool_factories: Vec<Arc<dyn ToolFactory>>,
    outputs: Vec<Arc<dyn OutputHandler>>,
}

impl ChannelConfig {
    pub fn builder(id: impl Into<String>) -> ChannelBuilder {
        ChannelBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn transformers(&self) -> &[Arc<dyn Transformer>] {
        &self.transformers
    }

    pub fn enrichers(&self) -> &[Arc<dyn Enricher>] {
        &self.enrichers
    }

    pub fn tool_factories(&self) -> &[Arc<dyn ToolFactory>] {
        &self.tool_factories
    }

    pub fn outputs(&self) -> &[Arc<dyn OutputHandler>] {
        &self.outputs
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |items: Vec<&str>| items.join(", ");
        f.debug_struct("ChannelConfig")
            .field("id", &self.id)
            .field(
                "transformers",
                &names(self.transformers.iter().map(|t| t.name()).collect()),
            )
            .field(
                "enrichers",
                &names(self.enrichers.iter().map(|e| e.name()).collect()),
            )
            .field(
                "tool_factories",
                &names(self.tool_factories.iter().map(|t| t.name()).collect()),
            )
            .field(
                "outputs",
                &names(self.outputs.iter().map(|o| o.name()).collect()),
            )
            .finish()
    }
}

/// Fluent accumulator for [`ChannelConfig`].
///
/// `build` copies the accumulated lists, so a builder can keep growing after
/// a config has been built from it without affecting that config.
#[derive(Clone, Default)]
pub struct ChannelBuilder {
    id: String,
    system_prompt: Option<String>,
    transformers: Vec<Arc<dyn Transformer>>,
    enrichers: Vec<Arc<dyn Enricher>>,
    tool_factories: Vec<Arc<dyn ToolFactory>>,
    outputs: Vec<Arc<dyn OutputHandler>>,
}

impl ChannelBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub fn enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    pub fn tool_factory(mut self, factory: Arc<dyn ToolFactory>) -> Self {
        self.tool_factories.push(factory);
        self
    }

    pub fn output(mut self, output: Arc<dyn OutputHandler>) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn outputs(mut self, outputs: impl IntoIterator<Item = Arc<dyn OutputHandler>>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    /// Build a config. Fails when no non-blank system prompt was set.
    pub fn build(&self) -> Result<ChannelConfig, ConfigError> {
        let system_prompt = self
            .system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MissingSystemPrompt {
                id: self.id.clone(),
            })?;

        Ok(ChannelConfig {
            id: self.id.clone(),
            system_prompt: system_prompt.to_string(),
            transformers: self.transformers.clone(),
            enrichers: self.enrichers.clone(),
            tool_factories: self.tool_factories.clone(),
            outputs: self.outputs.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::types::TransformContext;

    struct Upper;

    impl Transformer for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn transform(&self, message: &str, _ctx: &TransformContext) -> Result<String, PipelineError> {
            Ok(message.to_uppercase())
        }
    }

    #[test]
    fn build_without_prompt_fails() {
        let err = ChannelBuilder::new("bare").build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSystemPrompt { ref id } if id == "bare"));

        let err = ChannelBuilder::new("blank")
            .system_prompt("  ")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSystemPrompt { .. }));
    }

    #[test]
    fn builds_are_independent_copies() {
        let builder = ChannelBuilder::new("assistant")
            .system_prompt("Be brief.")
            .transformer(Arc::new(Upper));

        let a = builder.build().unwrap();
        let b = builder.build().unwrap();
        assert_ne!(a.transformers().as_ptr(), b.transformers().as_ptr());
        assert_eq!(a.transformers().len(), b.transformers().len());
        assert!(Arc::ptr_eq(&a.transformers()[0], &b.transformers()[0]));

        // Growing the builder later leaves earlier configs untouched.
        let c = builder.transformer(Arc::new(Upper)).build().unwrap();
        assert_eq!(a.transformers().len(), 1);
        assert_eq!(c.transformers().len(), 2);
    }

    #[test]
    fn debug_lists_stage_names() {
        let config = ChannelBuilder::new("assistant")
            .system_prompt("Be brief.")
            .transformer(Arc::new(Upper))
            .build()
            .unwrap();
        let text = format!("{config:?}");
        assert!(text.contains("upper"));
        assert_eq!(config.system_prompt(), "Be brief.");
    }
}
