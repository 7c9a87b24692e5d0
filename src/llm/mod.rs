//! Generation engine integration.
//!
//! The relay treats generation as an opaque service behind [`GenerationEngine`].
//! The only concrete engine is [`AnthropicEngine`], which speaks the Messages API
//! directly over reqwest and runs the tool loop itself.

pub mod anthropic;
pub mod provider;

pub use anthropic::AnthropicEngine;
pub use provider::*;

use std::sync::Arc;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Configuration for creating a generation engine.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Read the API key from `ANTHROPIC_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;
        Ok(Self {
            api_key: SecretString::from(api_key),
            model: model.into(),
        })
    }
}

/// Create the generation engine from configuration.
pub fn create_engine(config: &LlmConfig) -> Arc<dyn GenerationEngine> {
    tracing::info!("Using Anthropic (model: {})", config.model);
    Arc::new(AnthropicEngine::new(
        config.api_key.clone(),
        config.model.clone(),
    ))
}
