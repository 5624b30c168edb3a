//! MCP error types.

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn server: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("server not initialized")]
    NotInitialized,

    #[error("server exited unexpectedly")]
    ServerExited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout waiting for response")]
    Timeout,

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("tool call failed: {0}")]
    ToolCallFailed(String),

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },
}

impl Error {
    /// The channel to the server is unusable (spawn failure, exit, broken pipe).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Spawn(_) | Self::ServerExited | Self::Transport(_)
        )
    }

    /// The server received the call and reported a failure.
    pub fn is_invocation(&self) -> bool {
        matches!(self, Self::JsonRpc(_) | Self::ToolCallFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
