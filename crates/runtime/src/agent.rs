//! Agent facade: answers a prompt using a model and a capability set.

use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::{Error, Result, ToolError};
use crate::model::{Backend, Message, ModelRequest, Part, Role, ToolCall, ToolResult};
use crate::toolset::CapabilitySet;

/// Default bound on model round trips per prompt.
pub const DEFAULT_MAX_STEPS: usize = 20;

/// Produces a textual answer for a prompt, possibly by calling tools.
///
/// Implementations block; call them from a blocking context.
pub trait Agent: Send + Sync {
    fn run(&self, prompt: &str, tools: &CapabilitySet) -> Result<String>;
}

/// Synchronous tool-calling loop over a model [`Backend`].
///
/// Model requests are driven on the runtime behind `handle`, so `run` must
/// not be called from a thread that is already executing async code.
pub struct ToolCallingAgent<B> {
    backend: B,
    handle: Handle,
    max_steps: usize,
}

impl<B: Backend> ToolCallingAgent<B> {
    pub fn new(backend: B, handle: Handle) -> Self {
        Self {
            backend,
            handle,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> Agent for ToolCallingAgent<B> {
    fn run(&self, prompt: &str, tools: &CapabilitySet) -> Result<String> {
        let specs = tools.specs();
        let mut messages = vec![Message::user(prompt)];

        for step in 1..=self.max_steps {
            let request = ModelRequest {
                messages: &messages,
                tools: &specs,
            };
            let response = self.handle.block_on(self.backend.call(request))?;

            let calls = response.message.tool_calls();
            debug!(step, tool_calls = calls.len(), "model step");
            if calls.is_empty() {
                return Ok(response.message.text());
            }

            messages.push(response.message);
            let results = calls
                .into_iter()
                .map(|call| Part::ToolResult(execute(tools, call)))
                .collect();
            messages.push(Message {
                role: Role::User,
                parts: results,
            });
        }

        warn!(max_steps = self.max_steps, "agent step limit reached");
        Err(Error::StepLimit(self.max_steps))
    }
}

fn execute(tools: &CapabilitySet, call: ToolCall) -> ToolResult {
    let outcome = arguments(call.input).and_then(|arguments| match tools.get(&call.name) {
        Some(capability) => capability.call(arguments),
        None => Err(ToolError::NotFound(call.name.clone())),
    });

    match outcome {
        Ok(output) => ToolResult::Success {
            tool_call_id: call.id,
            output,
        },
        Err(error) => {
            warn!(tool = %call.name, error = %error, "tool call failed");
            ToolResult::Failure {
                tool_call_id: call.id,
                tool_name: call.name,
                error,
            }
        }
    }
}

fn arguments(input: Value) -> std::result::Result<Map<String, Value>, ToolError> {
    match input {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ToolError::InvalidInput(format!(
            "arguments must be an object, got {other}"
        ))),
    }
}
