//! Configuration loading from myngl.toml.

use std::path::Path;
use std::time::Duration;

use mcp::ServerConfig;
use runtime::{DEFAULT_MAX_STEPS, ToolOptions};
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Model and agent loop settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool registry behavior.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// MCP tool servers, in connection order.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub max_steps: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            max_tokens: 4096,
            temperature: 0.0,
            system: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Build the capability set once and share it across requests.
    pub cache: bool,
    pub call_timeout_secs: u64,
    pub startup_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            cache: true,
            call_timeout_secs: 30,
            startup_timeout_secs: 30,
        }
    }
}

/// Timeouts below this are raised to it.
const MIN_TIMEOUT_SECS: u64 = 1;

impl ToolsConfig {
    pub fn options(&self) -> ToolOptions {
        ToolOptions {
            startup_timeout: Duration::from_secs(self.startup_timeout_secs.max(MIN_TIMEOUT_SECS)),
            call_timeout: Duration::from_secs(self.call_timeout_secs.max(MIN_TIMEOUT_SECS)),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration, falling back to defaults (no tool servers) when
    /// the file is missing or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => {
                info!(path = %path.display(), servers = config.servers.len(), "loaded config");
                config
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "using default config without tool servers"
                );
                Self::default()
            }
        }
    }

    /// Servers with `enabled = true`, in file order.
    pub fn enabled_servers(&self) -> Vec<ServerConfig> {
        self.servers.iter().filter(|s| s.enabled).cloned().collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),
}
