//! HTTP routes: chat completion and health.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/v1/chat/completions", post(chat))
        .route("/health", get(health))
        .with_state(state)
}

/// OpenAI-style completion envelope.
#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChoiceMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ChoiceMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatCompletion {
    fn new(model: &str, content: String) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            object: "chat.completion",
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant",
                    content,
                },
                finish_reason: "stop",
            }],
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn chat(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ChatCompletion>, ApiError> {
    // Anything that is not a JSON object is treated as an empty request.
    let request = serde_json::from_slice::<Value>(&body)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));
    let prompt = extract_prompt(&request)?;

    let agent = state.agent.clone().ok_or(ApiError::MissingCredentials)?;
    let tools = state.tools.clone();
    let started = Instant::now();

    let answer = tokio::task::spawn_blocking(move || {
        let capabilities = tools.capabilities();
        agent.run(&prompt, &capabilities)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("agent task failed: {e}")))??;

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        answer_len = answer.len(),
        "chat completed"
    );
    Ok(Json(ChatCompletion::new(&state.model, answer)))
}

/// Pull the prompt out of either `{prompt}` or `{messages: [...]}`.
fn extract_prompt(request: &Value) -> Result<String, ApiError> {
    if let Some(messages) = request.get("messages") {
        let messages = messages
            .as_array()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Missing or invalid 'messages' array".into()))?;

        return messages
            .iter()
            .rev()
            .filter(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            .find_map(|m| m.get("content").and_then(Value::as_str))
            .filter(|content| !content.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("No user message found in 'messages'".into()));
    }

    request
        .get("prompt")
        .and_then(Value::as_str)
        .filter(|prompt| !prompt.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("Missing 'prompt'".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use runtime::{Agent, Bridge, CapabilitySet, ToolOptions, ToolProvider};
    use tower::ServiceExt;

    /// Answers `answer for <prompt>`, or fails when the prompt says so.
    #[derive(Default)]
    struct EchoAgent {
        prompts: Mutex<Vec<String>>,
    }

    impl Agent for EchoAgent {
        fn run(&self, prompt: &str, tools: &CapabilitySet) -> runtime::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match prompt {
                "fail" => Err(runtime::Error::Api("529: overloaded".into())),
                "use a tool" => Ok(tools.invoke("search_lookup", serde_json::Map::new())),
                _ => Ok(format!("answer for {prompt} with {} tools", tools.len())),
            }
        }
    }

    fn tools() -> Arc<ToolProvider> {
        let bridge = Arc::new(Bridge::new().unwrap());
        Arc::new(ToolProvider::new(Vec::new(), bridge, ToolOptions::default(), true))
    }

    fn app(agent: Option<Arc<dyn Agent>>) -> Router {
        router(AppState::new(agent, tools(), "claude-sonnet-4-20250514"))
    }

    fn echo_app() -> (Router, Arc<EchoAgent>) {
        let agent = Arc::new(EchoAgent::default());
        (app(Some(agent.clone() as Arc<dyn Agent>)), agent)
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn prompt_request_without_tools() {
        let (app, _) = echo_app();
        let (status, body) = post_json(app, "/chat", r#"{"prompt": "hello"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert!(body["created"].as_i64().unwrap() > 0);
        assert_eq!(body["choices"][0]["index"], 0);
        assert_eq!(body["choices"][0]["message"]["role"], "assistant");
        assert_eq!(body["choices"][0]["message"]["content"], "answer for hello with 0 tools");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn messages_request_uses_last_user_message() {
        let (app, agent) = echo_app();
        let body = r#"{"model": "gpt-4", "messages": [
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "reply"},
            {"role": "user", "content": "second"},
            {"role": "assistant", "content": "another"}
        ]}"#;
        let (status, body) = post_json(app, "/v1/chat/completions", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(*agent.prompts.lock().unwrap(), vec!["second".to_string()]);
    }

    #[tokio::test]
    async fn empty_messages_is_rejected() {
        let (app, _) = echo_app();
        let (status, body) = post_json(app, "/v1/chat/completions", r#"{"messages": []}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Missing or invalid 'messages' array"}));
    }

    #[tokio::test]
    async fn messages_without_user_is_rejected() {
        let (app, _) = echo_app();
        let body = r#"{"messages": [{"role": "system", "content": "be nice"}]}"#;
        let (status, body) = post_json(app, "/chat", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No user message found in 'messages'");
    }

    #[tokio::test]
    async fn non_json_body_is_missing_prompt() {
        let (app, _) = echo_app();
        let (status, body) = post_json(app, "/chat", "hello there").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing 'prompt'");
    }

    #[tokio::test]
    async fn validation_precedes_credential_check() {
        let (status, body) = post_json(app(None), "/chat", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing 'prompt'");

        let (status, body) = post_json(app(None), "/chat", r#"{"prompt": "hi"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "ANTHROPIC_API_KEY not configured");
    }

    #[tokio::test]
    async fn agent_failure_is_internal_error() {
        let (app, _) = echo_app();
        let (status, body) = post_json(app, "/chat", r#"{"prompt": "fail"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "API error: 529: overloaded");
    }

    #[tokio::test]
    async fn tool_failure_still_completes() {
        let (app, _) = echo_app();
        let (status, body) = post_json(app, "/chat", r#"{"prompt": "use a tool"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["choices"][0]["message"]["content"], "Unknown tool 'search_lookup'");
    }

    #[tokio::test]
    async fn health_reports_version() {
        let (app, _) = echo_app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn prompt_extraction() {
        assert_eq!(extract_prompt(&json!({"prompt": "hi"})).unwrap(), "hi");
        assert!(extract_prompt(&json!({"prompt": ""})).is_err());
        assert!(extract_prompt(&json!({"messages": "nope"})).is_err());
        // User messages without string content are skipped.
        let request = json!({"messages": [
            {"role": "user", "content": "older"},
            {"role": "user", "content": [{"type": "text", "text": "parts"}]}
        ]});
        assert_eq!(extract_prompt(&request).unwrap(), "older");
    }
}
