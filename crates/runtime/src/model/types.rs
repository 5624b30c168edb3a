use super::errors::ModelError;
use crate::capability::failure_text;
use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The result the runtime returned from a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success {
        tool_call_id: String,
        output: String,
    },
    Failure {
        tool_call_id: String,
        /// Name the model called the tool by.
        tool_name: String,
        error: ToolError,
    },
}

/// A part of a message, which can be text or a tool interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Part {
    Text(String),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// A message, consisting of a role and one or more parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Get combined text content from all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all tool calls from this message.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A tool definition as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Everything needed for a model request.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
}

impl ToolResult {
    pub fn tool_call_id(&self) -> &str {
        match self {
            Self::Success { tool_call_id, .. } | Self::Failure { tool_call_id, .. } => {
                tool_call_id
            }
        }
    }

    /// Text handed back to the model for this result.
    pub fn content(&self) -> String {
        match self {
            Self::Success { output, .. } => output.clone(),
            Self::Failure {
                error: ToolError::NotFound(name),
                ..
            } => format!("Unknown tool '{name}'"),
            Self::Failure {
                tool_name, error, ..
            } => failure_text(tool_name, error),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// The response from a model.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub message: Message,
    pub usage: Usage,
}

/// Trait for LLM provider backends.
pub trait Backend: Send + Sync {
    fn call(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<ModelResponse, ModelError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_extraction() {
        let msg = Message {
            role: Role::Assistant,
            parts: vec![
                Part::Text("Hello ".into()),
                Part::ToolCall(ToolCall {
                    id: "1".into(),
                    name: "test".into(),
                    input: Value::Null,
                }),
                Part::Text("world".into()),
            ],
        };
        assert_eq!(msg.text(), "Hello world");
    }

    #[test]
    fn message_tool_calls_extraction() {
        let msg = Message {
            role: Role::Assistant,
            parts: vec![
                Part::Text("Let me help".into()),
                Part::ToolCall(ToolCall {
                    id: "1".into(),
                    name: "search".into(),
                    input: Value::String("query".into()),
                }),
                Part::ToolCall(ToolCall {
                    id: "2".into(),
                    name: "read".into(),
                    input: Value::String("file".into()),
                }),
            ],
        };
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[1].name, "read");
    }

    #[test]
    fn tool_result_serializes_with_status_tag() {
        let result = ToolResult::Failure {
            tool_call_id: "call_1".into(),
            tool_name: "search_lookup".into(),
            error: ToolError::NotFound("search_lookup".into()),
        };
        assert_eq!(result.tool_call_id(), "call_1");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["tool_name"], "search_lookup");
    }

    #[test]
    fn failure_content_names_the_tool() {
        let result = ToolResult::Failure {
            tool_call_id: "call_1".into(),
            tool_name: "search_fail".into(),
            error: ToolError::Invocation("database offline".into()),
        };
        assert!(result.is_failure());
        let content = result.content();
        assert!(content.starts_with("Error calling tool 'search_fail'"), "{content}");
        assert!(content.contains("database offline"), "{content}");

        let missing = ToolResult::Failure {
            tool_call_id: "call_2".into(),
            tool_name: "search_missing".into(),
            error: ToolError::NotFound("search_missing".into()),
        };
        assert_eq!(missing.content(), "Unknown tool 'search_missing'");
    }
}
