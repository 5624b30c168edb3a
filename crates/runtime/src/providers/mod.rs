//! Model provider adapters.
//!
//! Each provider implements [`Backend`](crate::model::Backend) for its API.

mod anthropic;

pub use anthropic::{AnthropicBackend, AnthropicBackendBuilder};
