//! Capabilities: discovered MCP tools adapted for synchronous invocation.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use mcp::{Session, SessionState, Tool};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::bridge::Bridge;
use crate::error::ToolError;
use crate::model::ToolSpec;

/// Type assumed for a parameter whose schema declares none.
pub const DEFAULT_PARAMETER_KIND: &str = "string";

/// One declared parameter of a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    /// JSON Schema type name (`string`, `integer`, `object`, ...).
    pub kind: String,
    pub description: Option<String>,
    pub required: bool,
}

/// A tool discovered on a session, callable from any thread.
///
/// The capability only holds a weak reference to its session. The session
/// registry owns the session itself.
pub struct Capability {
    qualified_name: String,
    remote_name: String,
    server: String,
    description: String,
    parameters: Vec<Parameter>,
    input_schema: Value,
    session: Weak<Session>,
    bridge: Arc<Bridge>,
    timeout: Duration,
}

impl Capability {
    /// Adapt a tool reported by `session`.
    pub fn new(tool: Tool, session: &Arc<Session>, bridge: Arc<Bridge>, timeout: Duration) -> Self {
        let server = session.name().to_string();
        let parameters = parameters_from_schema(&tool.input_schema);
        Self {
            qualified_name: qualified_name(&server, &tool.name),
            remote_name: tool.name,
            server,
            description: tool.description.unwrap_or_default(),
            parameters,
            input_schema: tool.input_schema,
            session: Arc::downgrade(session),
            bridge,
            timeout,
        }
    }

    /// `<server>_<tool>`, unique as long as server names are.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Tool name as known to the server.
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Tool definition handed to the model.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.qualified_name.clone(),
            description: self.description.clone(),
            schema: self.input_schema.clone(),
        }
    }

    /// Invoke the tool and wait for its rendered output.
    ///
    /// Arguments go to the server unvalidated; missing or unexpected
    /// parameters come back as [`ToolError::Invocation`].
    pub fn call(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let session = self.session.upgrade().ok_or_else(|| {
            ToolError::SessionUnavailable(format!("session for '{}' is gone", self.server))
        })?;

        if session.state() == SessionState::Broken {
            return Err(ToolError::SessionUnavailable(format!(
                "session for '{}' is broken",
                self.server
            )));
        }

        let started = Instant::now();
        let remote_name = self.remote_name.clone();
        let outcome = self.bridge.call(self.timeout, async move {
            session.call_tool(&remote_name, Some(arguments)).await
        })?;

        let result = outcome?;
        debug!(
            tool = %self.qualified_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool call finished"
        );
        Ok(result.render())
    }

    /// Invoke the tool, rendering any failure as text for the model.
    pub fn invoke(&self, arguments: Map<String, Value>) -> String {
        match self.call(arguments) {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %self.qualified_name, error = %e, "tool call failed");
                failure_text(&self.qualified_name, &e)
            }
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("qualified_name", &self.qualified_name)
            .field("parameters", &self.parameters)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub(crate) fn failure_text(name: &str, error: &ToolError) -> String {
    format!("Error calling tool '{name}': {error}")
}

pub fn qualified_name(server: &str, tool: &str) -> String {
    format!("{server}_{tool}")
}

/// Read declared parameters out of a JSON Schema `object` description.
pub fn parameters_from_schema(schema: &Value) -> Vec<Parameter> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, property)| Parameter {
            name: name.clone(),
            kind: property
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_PARAMETER_KIND)
                .to_string(),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            required: required.contains(&name.as_str()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_properties_become_parameters() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"type": "string", "description": "first"},
                "b": {"type": "integer"}
            },
            "required": ["b"]
        });

        let params = parameters_from_schema(&schema);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "a");
        assert_eq!(params[0].kind, "string");
        assert_eq!(params[0].description.as_deref(), Some("first"));
        assert!(!params[0].required);
        assert_eq!(params[1].name, "b");
        assert_eq!(params[1].kind, "integer");
        assert!(params[1].required);
    }

    #[test]
    fn untyped_parameter_defaults_to_string() {
        let schema = json!({"properties": {"query": {"description": "free text"}}});
        let params = parameters_from_schema(&schema);
        assert_eq!(params[0].kind, DEFAULT_PARAMETER_KIND);
    }

    #[test]
    fn schema_without_properties_has_no_parameters() {
        assert!(parameters_from_schema(&json!({"type": "object"})).is_empty());
        assert!(parameters_from_schema(&Value::Null).is_empty());
    }

    #[test]
    fn orphaned_capability_fails_with_its_name() {
        let capability = Capability {
            qualified_name: "search_lookup".into(),
            remote_name: "lookup".into(),
            server: "search".into(),
            description: String::new(),
            parameters: Vec::new(),
            input_schema: json!({"type": "object"}),
            session: Weak::new(),
            bridge: Arc::new(Bridge::new().unwrap()),
            timeout: Duration::from_secs(1),
        };

        let err = capability.call(Map::new()).unwrap_err();
        assert!(matches!(err, ToolError::SessionUnavailable(_)));

        let text = capability.invoke(Map::new());
        assert!(text.contains("search_lookup"), "unexpected text: {text}");
    }

    #[test]
    fn spec_uses_qualified_name() {
        let capability = Capability {
            qualified_name: "search_lookup".into(),
            remote_name: "lookup".into(),
            server: "search".into(),
            description: "Look up a term".into(),
            parameters: Vec::new(),
            input_schema: json!({"type": "object", "properties": {}}),
            session: Weak::new(),
            bridge: Arc::new(Bridge::new().unwrap()),
            timeout: Duration::from_secs(1),
        };

        let spec = capability.spec();
        assert_eq!(spec.name, "search_lookup");
        assert_eq!(spec.description, "Look up a term");
        assert_eq!(spec.schema["type"], "object");
    }
}
