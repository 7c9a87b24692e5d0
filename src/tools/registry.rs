//! Tool factories and per-request tool composition.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::tools::tool::{Tool, ToolSet};

/// Scope a factory creates tools for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolScope {
    pub user_id: String,
    pub chat_id: String,
}

/// Produces the tools available to one request. Synchronous by contract.
pub trait ToolFactory: Send + Sync {
    /// Factory name for logging.
    fn name(&self) -> &str;

    fn create(&self, scope: &ToolScope) -> ToolSet;
}

/// Factory that hands out the same fixed set of tools to every request.
pub struct StaticToolFactory {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
}

impl StaticToolFactory {
    pub fn new(name: impl Into<String>, tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            name: name.into(),
            tools,
        }
    }
}

impl ToolFactory for StaticToolFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _scope: &ToolScope) -> ToolSet {
        self.tools
            .iter()
            .map(|tool| (tool.name().to_string(), Arc::clone(tool)))
            .collect()
    }
}

/// Union every factory's tools in order. A later factory replaces an earlier
/// tool with the same name; each replacement is logged.
pub fn compose_tools(factories: &[Arc<dyn ToolFactory>], scope: &ToolScope) -> ToolSet {
    let mut composed = ToolSet::new();
    for factory in factories {
        for (name, tool) in factory.create(scope) {
            if composed.insert(name.clone(), tool).is_some() {
                warn!(
                    tool = %name,
                    factory = factory.name(),
                    user_id = %scope.user_id,
                    "Tool name collision: later factory overrides earlier tool"
                );
            }
        }
    }
    debug!(count = composed.len(), user_id = %scope.user_id, "Composed tools");
    composed
}
