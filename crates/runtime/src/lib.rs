//! myngl runtime: tool server registry, capability dispatch and the agent loop.
//!
//! # Overview
//!
//! - **Bridge**: a background thread running the tokio runtime that owns every
//!   MCP session. Synchronous callers submit futures to it and wait with a
//!   deadline.
//! - **SessionRegistry**: connects the configured tool servers (skipping the
//!   ones that fail) and keeps their sessions alive for the process lifetime.
//! - **Capability**: one discovered tool, named `<server>_<tool>`, callable
//!   from any thread. Failures come back as text for the model.
//! - **Agent**: answers a prompt given a [`CapabilitySet`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp::ServerConfig;
//! use runtime::{Agent, AnthropicBackend, Bridge, ToolCallingAgent, ToolOptions, ToolProvider};
//!
//! # fn example(handle: tokio::runtime::Handle) -> runtime::Result<()> {
//! let bridge = Arc::new(Bridge::new()?);
//! let servers = vec![ServerConfig::new("search", "search-mcp")];
//! let provider = ToolProvider::new(servers, bridge, ToolOptions::default(), true);
//!
//! let backend = AnthropicBackend::builder("sk-ant-api03-...", "claude-sonnet-4-20250514").build();
//! let agent = ToolCallingAgent::new(backend, handle);
//!
//! let answer = agent.run("What is MCP?", &provider.capabilities())?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

mod agent;
mod bridge;
mod capability;
mod error;
pub mod model;
mod providers;
mod registry;
#[cfg(all(test, unix))]
mod testing;
mod toolset;

pub use agent::{Agent, DEFAULT_MAX_STEPS, ToolCallingAgent};
pub use bridge::{Bridge, BridgeError};
pub use capability::{
    Capability, DEFAULT_PARAMETER_KIND, Parameter, parameters_from_schema, qualified_name,
};
pub use error::{Error, Result, ToolError};
pub use model::{Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolSpec};
pub use providers::{AnthropicBackend, AnthropicBackendBuilder};
pub use registry::{SessionRegistry, ToolOptions, ToolProvider};
pub use toolset::CapabilitySet;
