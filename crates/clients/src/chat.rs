//! OpenAI-compatible streaming chat adapter.
//!
//! Works with any endpoint that follows the OpenAI chat completions
//! contract. Tool-call arguments arrive as a stream of JSON deltas keyed
//! by index; the adapter assembles them and yields a single
//! `ToolCallRequested` per call, so consumers never see partial JSON.

use serde_json::Value;

use crate::sse;
use crate::traits::{ChatClient, ChatRequest};
use crate::util::from_reqwest;
use vb_domain::error::{Error, Result};
use vb_domain::stream::{BoxStream, ChatEvent};
use vb_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Streaming chat client for an OpenAI-compatible endpoint.
pub struct OpenAiChatClient {
    id: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| from_reqwest("llm", e))?;

        Ok(Self {
            id: "llm".into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "messages": req.messages.iter().map(wire_message).collect::<Vec<Value>>(),
            "stream": true,
        });

        if !req.tools.is_empty() {
            body["tools"] = req.tools.iter().map(wire_tool).collect::<Vec<Value>>().into();
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render one internal message in the chat completions wire shape.
///
/// System and user messages are plain text. Assistant and tool messages
/// need their own renderings because tool invocations and tool results
/// live in structured parts.
fn wire_message(msg: &Message) -> Value {
    match msg.role {
        // `Role` serializes to the lowercase wire name already.
        Role::System | Role::User => serde_json::json!({
            "role": msg.role,
            "content": msg.content.extract_all_text(),
        }),
        Role::Assistant => wire_assistant(msg),
        Role::Tool => wire_tool_result(msg),
    }
}

/// Assistant turns carry optional spoken text plus any tool invocations
/// the model made. The wire wants `content: null` rather than an empty
/// string when the model went straight to tools.
fn wire_assistant(msg: &Message) -> Value {
    let mut spoken: Vec<&str> = Vec::new();
    let mut calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(text) => spoken.push(text),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => spoken.push(text),
                    ContentPart::ToolUse { id, name, input } => calls.push(serde_json::json!({
                        "type": "function",
                        "id": id,
                        "function": {
                            "name": name,
                            // Arguments travel as a JSON string, not an object.
                            "arguments": input.to_string(),
                        },
                    })),
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    let mut wire = serde_json::json!({ "role": "assistant" });
    wire["content"] = if spoken.is_empty() {
        Value::Null
    } else {
        Value::String(spoken.join("\n"))
    };
    if !calls.is_empty() {
        wire["tool_calls"] = Value::Array(calls);
    }
    wire
}

/// A tool message echoes one result back under its call id.
fn wire_tool_result(msg: &Message) -> Value {
    let (call_id, content) = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .find_map(|part| match part {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => Some((tool_use_id.as_str(), content.as_str())),
                _ => None,
            })
            .unwrap_or(("", "")),
        MessageContent::Text(text) => ("", text.as_str()),
    };

    serde_json::json!({
        "role": "tool",
        "tool_call_id": call_id,
        "content": content,
    })
}

fn wire_tool(def: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE stream parsing with tool-call assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream assembly state for tool calls arriving as indexed deltas.
#[derive(Default)]
struct StreamState {
    /// Ordered by wire index: (call_id, tool_name, raw argument JSON).
    pending: Vec<(String, String, String)>,
    finished: bool,
}

impl StreamState {
    fn upsert_call(&mut self, index: usize, id: Option<&str>, name: Option<&str>) {
        while self.pending.len() <= index {
            self.pending.push((String::new(), String::new(), String::new()));
        }
        let slot = &mut self.pending[index];
        if let Some(id) = id {
            slot.0 = id.to_string();
        }
        if let Some(name) = name {
            slot.1 = name.to_string();
        }
    }

    fn append_args(&mut self, index: usize, delta: &str) {
        while self.pending.len() <= index {
            self.pending.push((String::new(), String::new(), String::new()));
        }
        self.pending[index].2.push_str(delta);
    }

    /// Drain assembled calls as fully-formed events.
    fn drain_calls(&mut self) -> Vec<Result<ChatEvent>> {
        self.pending
            .drain(..)
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(call_id, tool_name, args)| {
                let arguments: Value = if args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    match serde_json::from_str(&args) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(
                                tool = %tool_name,
                                error = %e,
                                "tool call arguments are not valid JSON; defaulting to empty object"
                            );
                            Value::Object(Default::default())
                        }
                    }
                };
                Ok(ChatEvent::ToolCallRequested {
                    call_id,
                    tool_name,
                    arguments,
                })
            })
            .collect()
    }
}

fn parse_sse_data(state: &mut StreamState, data: &str) -> Vec<Result<ChatEvent>> {
    if data.trim() == "[DONE]" {
        if state.finished {
            return Vec::new();
        }
        state.finished = true;
        let mut events = state.drain_calls();
        events.push(Ok(ChatEvent::Finished {
            reason: Some("stop".into()),
        }));
        return events;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = match v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    {
        Some(c) => c,
        None => return Vec::new(),
    };
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    // Finish reason closes the stream: assembled tool calls first, then
    // the terminal event.
    if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        state.finished = true;
        let mut events = state.drain_calls();
        events.push(Ok(ChatEvent::Finished {
            reason: Some(reason.to_string()),
        }));
        return events;
    }

    // Tool call deltas accumulate silently until the stream finishes.
    if let Some(tc_arr) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let id = tc.get("id").and_then(Value::as_str);
            let name = tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str);
            if id.is_some() || name.is_some() {
                state.upsert_call(index, id, name);
            }
            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
            {
                state.append_args(index, args);
            }
        }
        return Vec::new();
    }

    // Text content delta.
    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            return vec![Ok(ChatEvent::Token {
                text: text.to_string(),
            })];
        }
    }

    Vec::new()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatClient for OpenAiChatClient {
    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<ChatEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req);

        tracing::debug!(client = %self.id, url = %url, "chat stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest("llm", e))?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "llm",
                format!("HTTP {} - {}", status.as_u16(), err_text),
            ));
        }

        let mut state = StreamState::default();
        Ok(sse::chat_event_stream(resp, move |data| {
            parse_sse_data(&mut state, data)
        }))
    }

    fn client_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
