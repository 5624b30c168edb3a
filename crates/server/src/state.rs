//! Shared application state.

use std::sync::Arc;

use runtime::{Agent, ToolProvider};

#[derive(Clone)]
pub struct AppState {
    /// `None` when no Anthropic credential is configured.
    pub agent: Option<Arc<dyn Agent>>,
    pub tools: Arc<ToolProvider>,
    /// Model id reported in responses.
    pub model: String,
}

impl AppState {
    pub fn new(
        agent: Option<Arc<dyn Agent>>,
        tools: Arc<ToolProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            tools,
            model: model.into(),
        }
    }
}
