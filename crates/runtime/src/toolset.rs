//! The aggregated capability set handed to the agent.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::capability::Capability;
use crate::model::ToolSpec;

/// Immutable, ordered collection of capabilities indexed by qualified name.
///
/// Cloning is cheap; clones share the underlying capabilities.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    capabilities: Vec<Arc<Capability>>,
    index: HashMap<String, usize>,
}

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set, keeping the first capability for any repeated name.
    pub fn new(capabilities: impl IntoIterator<Item = Arc<Capability>>) -> Self {
        let mut set = Self::default();
        for capability in capabilities {
            let name = capability.qualified_name().to_string();
            if set.index.contains_key(&name) {
                warn!(tool = %name, "duplicate tool name, keeping the first");
                continue;
            }
            set.index.insert(name, set.capabilities.len());
            set.capabilities.push(capability);
        }
        set
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Capability>> {
        self.index.get(name).map(|&i| &self.capabilities[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Qualified names in discovery order.
    pub fn names(&self) -> Vec<&str> {
        self.capabilities
            .iter()
            .map(|c| c.qualified_name())
            .collect()
    }

    /// Tool definitions for the model, in discovery order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.capabilities.iter().map(|c| c.spec()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Capability>> {
        self.capabilities.iter()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Invoke a capability by qualified name. Always yields text.
    pub fn invoke(&self, name: &str, arguments: Map<String, Value>) -> String {
        match self.get(name) {
            Some(capability) => capability.invoke(arguments),
            None => format!("Unknown tool '{name}'"),
        }
    }
}
