use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::BridgeError;
use crate::model::ModelError;

/// Errors that can occur while invoking a capability.
///
/// These never escape the capability boundary as errors: they are rendered to
/// text and handed back to the model as a failed tool result.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("tool server unavailable: {0}")]
    SessionUnavailable(String),
    #[error("invocation failed: {0}")]
    Invocation(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl From<mcp::Error> for ToolError {
    fn from(err: mcp::Error) -> Self {
        if err.is_invocation() {
            Self::Invocation(err.to_string())
        } else if err.is_transport() {
            Self::Transport(err.to_string())
        } else {
            match err {
                mcp::Error::Timeout => Self::Timeout(mcp::DEFAULT_TIMEOUT),
                other => Self::Invocation(other.to_string()),
            }
        }
    }
}

impl From<BridgeError> for ToolError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout(deadline) => Self::Timeout(deadline),
            BridgeError::Closed => Self::SessionUnavailable(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("tool server: {0}")]
    Session(#[from] mcp::Error),

    #[error("agent did not finish within {0} steps")]
    StepLimit(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ModelError> for Error {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Network(msg) => Self::Network(msg),
            ModelError::Api(msg) => Self::Api(msg),
            ModelError::InvalidResponse(msg) => Self::Api(format!("invalid response: {msg}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
