//! Telephony media WebSocket handler (`GET /call/stream`).
//!
//! Speaks the provider's JSON kind/data envelope. The provider connects
//! here after `/call/incoming` answered with a media-stream URL carrying
//! the allocated session id.

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;

use vb_domain::config::StreamingMode;
use vb_sessions::TransportKind;

use crate::runtime::codec;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CallStreamQuery {
    /// Session allocated when the call was answered or placed.
    pub session: Option<String>,
    /// Caller identity forwarded by the provider, when available.
    pub participant: Option<String>,
}

pub async fn call_stream_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<CallStreamQuery>,
) -> impl IntoResponse {
    let session_id = query
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (transport_kind, sample_rate) = match state.config.streaming.mode {
        StreamingMode::RealtimeVoice => (
            TransportKind::TelephonyRealtime,
            state.config.llm.realtime_sample_rate,
        ),
        _ => (TransportKind::TelephonyMedia, state.config.stt.sample_rate),
    };

    tracing::info!(
        session_id = %session_id,
        ?transport_kind,
        sample_rate,
        "telephony media stream connecting"
    );

    ws.on_upgrade(move |socket| {
        super::serve_socket(
            socket,
            state,
            session_id,
            query.participant,
            transport_kind,
            sample_rate,
            codec::telephony::decode,
            codec::telephony::encode,
        )
    })
}
