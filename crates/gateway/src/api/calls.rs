//! Call-control intake: provider webhooks and outbound call placement.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use vb_domain::config::StreamingMode;
use vb_sessions::{CreateOutcome, SessionRecord, TransportKind};

use crate::state::AppState;

/// Context key carrying the provider's call id for later hangup RPCs.
const CALL_ID_KEY: &str = "telephony.call_id";

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn telephony_kind(state: &AppState) -> TransportKind {
    match state.config.streaming.mode {
        StreamingMode::RealtimeVoice => TransportKind::TelephonyRealtime,
        _ => TransportKind::TelephonyMedia,
    }
}

fn media_stream_url(state: &AppState, session_id: &str) -> String {
    format!(
        "{}?session={session_id}",
        state.config.telephony.media_stream_url
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /call/incoming — provider webhook
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct IncomingCallEvent {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// Answer an incoming call: allocate a session, pre-create its record,
/// and hand the provider the media-stream URL to connect to.
pub async fn incoming(
    State(state): State<AppState>,
    Json(event): Json<IncomingCallEvent>,
) -> Response {
    let session_id = uuid::Uuid::new_v4().to_string();

    let mut record = SessionRecord::new(
        &session_id,
        telephony_kind(&state),
        state.deps.store.owner_id(),
    );
    record.participant = event.from.clone();
    record.context.insert(
        CALL_ID_KEY.to_owned(),
        serde_json::json!(event.call_id.clone()),
    );

    match state.deps.store.create(&record).await {
        Ok(CreateOutcome::Created) => {}
        Ok(CreateOutcome::AlreadyExists) => {
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "session id collision");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to create session for incoming call");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "session store unavailable");
        }
    }

    tracing::info!(
        session_id = %session_id,
        call_id = %event.call_id,
        from = event.from.as_deref().unwrap_or("unknown"),
        to = event.to.as_deref().unwrap_or("unknown"),
        "incoming call answered"
    );

    Json(serde_json::json!({
        "session_id": session_id,
        "answer": {
            "mediaStreamUrl": media_stream_url(&state, &session_id),
        },
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /call/outbound — place a call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct OutboundCallRequest {
    pub target: String,
    #[serde(default)]
    pub session_hint: Option<String>,
}

pub async fn outbound(
    State(state): State<AppState>,
    Json(req): Json<OutboundCallRequest>,
) -> Response {
    let session_id = uuid::Uuid::new_v4().to_string();
    let stream_url = media_stream_url(&state, &session_id);

    let call_id = match state.telephony.place_call(&req.target, &stream_url).await {
        Ok(call_id) => call_id,
        Err(e) => {
            tracing::warn!(target = %req.target, error = %e, "outbound call placement failed");
            return api_error(StatusCode::BAD_GATEWAY, "call placement failed");
        }
    };

    let mut record = SessionRecord::new(
        &session_id,
        telephony_kind(&state),
        state.deps.store.owner_id(),
    );
    record.participant = Some(req.target.clone());
    record
        .context
        .insert(CALL_ID_KEY.to_owned(), serde_json::json!(call_id));
    if let Some(hint) = &req.session_hint {
        record
            .context
            .insert("telephony.session_hint".to_owned(), serde_json::json!(hint));
    }

    if let Err(e) = state.deps.store.create(&record).await {
        tracing::error!(error = %e, "failed to create session for outbound call");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "session store unavailable");
    }

    tracing::info!(session_id = %session_id, target = %req.target, "outbound call placed");
    Json(serde_json::json!({ "session_id": session_id })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /call/hangup — end a session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct HangupRequest {
    pub session_id: String,
}

pub async fn hangup(State(state): State<AppState>, Json(req): Json<HangupRequest>) -> Response {
    // Best-effort provider-side teardown first.
    if let Ok(Some(record)) = state.deps.store.load(&req.session_id).await {
        if let Some(call_id) = record.context.get(CALL_ID_KEY).and_then(|v| v.as_str()) {
            if let Err(e) = state.telephony.hangup(call_id).await {
                tracing::warn!(call_id, error = %e, "provider hangup failed");
            }
        }
    }

    if state.active.cancel(&req.session_id) {
        tracing::info!(session_id = %req.session_id, "hangup requested");
        StatusCode::NO_CONTENT.into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "session not active on this worker")
    }
}
