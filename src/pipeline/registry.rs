//! Write-once registry of channel configurations.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::error::ConfigError;
use crate::pipeline::config::ChannelConfig;

/// Map from channel id to its config. An id can be registered once.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<ChannelConfig>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, config: ChannelConfig) -> Result<(), ConfigError> {
        match self.channels.entry(config.id().to_string()) {
            Entry::Occupied(entry) => Err(ConfigError::DuplicateChannel {
                id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                info!(channel_id = config.id(), "Channel registered");
                entry.insert(Arc::new(config));
                Ok(())
            }
        }
    }

    /// Look up a channel. The error lists every registered id.
    pub fn get(&self, id: &str) -> Result<Arc<ChannelConfig>, ConfigError> {
        match self.channels.get(id) {
            Some(config) => Ok(Arc::clone(config.value())),
            None => Err(ConfigError::UnknownChannel {
                id: id.to_string(),
                known: self.list_ids(),
            }),
        }
    }

    pub fn has(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str) -> ChannelConfig {
        ChannelConfig::builder(id)
            .system_prompt("prompt")
            .build()
            .unwrap()
    }

    #[test]
    fn register_then_get() {
        let registry = ChannelRegistry::new();
        registry.register(config("assistant")).unwrap();
        assert!(registry.has("assistant"));
        assert_eq!(registry.get("assistant").unwrap().id(), "assistant");
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ChannelRegistry::new();
        registry.register(config("assistant")).unwrap();
        let err = registry.register(config("assistant")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateChannel { ref id } if id == "assistant"));
    }

    #[test]
    fn unknown_id_lists_every_known_id() {
        let registry = ChannelRegistry::new();
        registry.register(config("scheduled")).unwrap();
        registry.register(config("assistant")).unwrap();

        let err = registry.get("missing").unwrap_err();
        match err {
            ConfigError::UnknownChannel { id, known } => {
                assert_eq!(id, "missing");
                assert_eq!(known, vec!["assistant", "scheduled"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.list_ids(), vec!["assistant", "scheduled"]);
    }
}
