//! Chat-completion client.
//!
//! [`ChatClient`] is the orchestrator's only view of the language model.
//! [`OpenAiChatClient`] speaks the OpenAI `/chat/completions` wire format,
//! which most hosted and local model servers accept.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use helpdesk_agent_core::conversation::{ConversationTurn, Role, ToolInvocation, ToolSpec};

use crate::config::{api_key_from_env, LlmConfig};
use crate::error::LlmError;

/// One chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ConversationTurn>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// The first choice of a chat-completion response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        }
    }

    pub fn tools(calls: Vec<ToolInvocation>) -> Self {
        Self {
            content: String::new(),
            tool_calls: calls,
            finish_reason: Some("tool_calls".to_string()),
        }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;
}

pub struct OpenAiChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl OpenAiChatClient {
    /// Build from `[llm]`. A missing API key variable is tolerated so
    /// that unauthenticated local servers work.
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = api_key_from_env(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                var = %config.api_key_env,
                "LLM API key not set, sending unauthenticated requests"
            );
        }

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = request_body(request);

        let mut req = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                LlmError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let json: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::Malformed(e.to_string()))?;
        parse_response(&json)
    }
}

/// Encode a request in the OpenAI chat-completions format.
pub fn request_body(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(encode_turn).collect();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn encode_turn(turn: &ConversationTurn) -> Value {
    let mut msg = json!({
        "role": turn.role.as_str(),
        "content": turn.content,
    });

    if turn.role == Role::Assistant && !turn.tool_calls.is_empty() {
        let calls: Vec<Value> = turn
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments },
                })
            })
            .collect();
        msg["tool_calls"] = Value::Array(calls);
    }
    if let Some(id) = &turn.tool_call_id {
        msg["tool_call_id"] = Value::String(id.clone());
    }

    msg
}

/// Decode the first choice of a chat-completions response body.
///
/// An `error` object anywhere in the body is a hard failure even when the
/// HTTP status was 200.
pub fn parse_response(json: &Value) -> Result<ChatResponse, LlmError> {
    if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(LlmError::Provider(message));
    }

    let choice = json
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| LlmError::Malformed("no choices in response".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| LlmError::Malformed("choice has no message".into()))?;

    let content = message["content"].as_str().unwrap_or_default().to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for (i, call) in calls.iter().enumerate() {
            let name = call["function"]["name"]
                .as_str()
                .ok_or_else(|| LlmError::Malformed(format!("tool call {} has no name", i)))?;
            // Some providers send arguments as an object rather than a string.
            let arguments = match &call["function"]["arguments"] {
                Value::String(s) => s.clone(),
                Value::Null => "{}".to_string(),
                other => other.to_string(),
            };
            let id = call["id"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", i));
            tool_calls.push(ToolInvocation::new(id, name, arguments));
        }
    }

    Ok(ChatResponse {
        content,
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
    })
}
