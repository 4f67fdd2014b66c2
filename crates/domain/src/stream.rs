use serde::Serialize;
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted by a streaming chat completion (provider-agnostic).
///
/// Tool-call arguments may arrive from the wire as a stream of JSON
/// deltas; the client adapter assembles complete arguments before
/// yielding `ToolCallRequested`, so consumers never see partial JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// The model is invoking a tool, arguments fully assembled.
    #[serde(rename = "tool_call_requested")]
    ToolCallRequested {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Stream is finished.
    #[serde(rename = "finished")]
    Finished { reason: Option<String> },
}

/// Events emitted by the orchestrator while serving one turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OrchestratorEvent {
    /// Incremental response text, forwarded to synthesis as it arrives.
    #[serde(rename = "text_chunk")]
    TextChunk { text: String },

    /// A tool is about to execute.
    #[serde(rename = "tool_invoked")]
    ToolInvoked {
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution finished.
    #[serde(rename = "tool_result")]
    ToolResult { tool_name: String, ok: bool },

    /// The active agent changed mid-turn.
    #[serde(rename = "handoff")]
    Handoff { to_agent: String },

    /// The turn completed; `final_text` is the full accumulated response.
    #[serde(rename = "done")]
    Done { final_text: String },
}
