//! MCP (Model Context Protocol) client library.
//!
//! This crate provides a client for communicating with MCP servers via stdio.
//! Each [`Session`] owns one server subprocess and multiplexes concurrent
//! requests over its stdin/stdout by JSON-RPC request id.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{ServerConfig, Session, DEFAULT_STARTUP_TIMEOUT};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig::new("filesystem", "mcp-filesystem")
//!     .args(["--root", "./workspace"]);
//!
//! let session = Session::connect(config, DEFAULT_STARTUP_TIMEOUT).await?;
//!
//! for tool in session.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let mut args = serde_json::Map::new();
//! args.insert("path".into(), "./README.md".into());
//! let result = session.call_tool("read_file", Some(args)).await?;
//! println!("{}", result.render());
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod session;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, EmbeddedResource, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, RequestId,
    ServerCapabilities, ServerInfo, Tool, ToolContent,
};
pub use session::{
    DEFAULT_STARTUP_TIMEOUT, DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, ServerConfig, Session, SessionState,
};
