//! Browser WebSocket handler (`GET /realtime`).
//!
//! JSON-framed audio and control messages from the web client, JSON
//! responses back including streamed audio frames and state broadcasts.

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;

use vb_domain::config::StreamingMode;
use vb_sessions::TransportKind;

use crate::runtime::codec;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    /// Rejoin an existing session (pre-created by call control).
    pub session: Option<String>,
}

pub async fn realtime_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
) -> impl IntoResponse {
    let session_id = query
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let sample_rate = match state.config.streaming.mode {
        StreamingMode::RealtimeVoice => state.config.llm.realtime_sample_rate,
        _ => state.config.stt.sample_rate,
    };

    tracing::info!(session_id = %session_id, sample_rate, "browser session connecting");

    ws.on_upgrade(move |socket| {
        super::serve_socket(
            socket,
            state,
            session_id,
            None,
            TransportKind::Browser,
            sample_rate,
            codec::browser::decode,
            codec::browser::encode,
        )
    })
}
