//! Transport handlers and the internal events both dialects normalize to.
//!
//! The browser WebSocket and the telephony media WebSocket speak
//! different wire formats but feed one internal pipeline: inbound
//! messages become [`InboundEvent`]s on a bounded channel into the
//! conductor, and the conductor's [`OutboundEvent`]s are encoded back to
//! whatever the far end understands.

pub mod browser;
pub mod telephony;

use vb_domain::audio::AudioFrame;
use vb_sessions::SessionState;

/// Messages flowing from the caller into the conductor.
#[derive(Debug)]
pub enum InboundEvent {
    Audio(AudioFrame),
    /// A typed user message, treated like a final transcript.
    Text(String),
    /// Explicit interrupt from the client (browser barge-in button).
    Interrupt,
    /// Reset the conversation: abandon queued and in-flight turns.
    Reset,
    Hangup,
}

/// Messages flowing from the conductor back to the caller.
#[derive(Debug)]
pub enum OutboundEvent {
    Audio(AudioFrame),
    /// Discard any audio the far end still has buffered (barge-in).
    ClearAudio,
    Transcript {
        role: &'static str,
        text: String,
        is_final: bool,
    },
    State(SessionState),
    Agent {
        key: String,
    },
    Error {
        code: String,
        message: String,
    },
}

/// WebSocket close codes used by both handlers.
pub(crate) mod close_codes {
    /// Normal closure (inactivity timeout, session end).
    pub const NORMAL: u16 = 1000;
    /// Protocol violation by the remote.
    pub const PROTOCOL_ERROR: u16 = 1002;
}

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use vb_domain::error::Error;
use vb_sessions::TransportKind;

use crate::runtime::cancel::CancelHub;
use crate::runtime::conductor::{self, SessionParams};
use crate::state::AppState;

/// Decoder for one wire dialect: `(raw, pinned_rate, timestamp_us)`.
pub(crate) type DecodeFn = fn(&str, u32, u64) -> vb_domain::error::Result<InboundEvent>;
/// Encoder for one wire dialect; `None` skips events it cannot carry.
pub(crate) type EncodeFn = fn(&OutboundEvent) -> Option<String>;

/// How long a closing transport waits for the conductor to end cleanly
/// before forcing cancellation.
const CONDUCTOR_GRACE: Duration = Duration::from_secs(5);

/// Serve one WebSocket connection through the session pipeline.
///
/// Shared by both dialects: spawns the conductor and the writer task,
/// then runs the reader loop in place, enforcing the inactivity timeout,
/// the message size cap, and the inbound backlog limit.
pub(crate) async fn serve_socket(
    socket: WebSocket,
    state: AppState,
    session_id: String,
    participant: Option<String>,
    transport_kind: TransportKind,
    sample_rate: u32,
    decode: DecodeFn,
    encode: EncodeFn,
) {
    let streaming = state.config.streaming.clone();

    let hub = Arc::new(CancelHub::new());
    state.active.register(&session_id, hub.clone());

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(streaming.max_inbound_backlog);
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<OutboundEvent>(streaming.outbound_high_water_frames);

    let params = SessionParams {
        session_id: session_id.clone(),
        transport_kind,
        participant,
        sample_rate,
    };
    let conductor_task = tokio::spawn(conductor::run_session(
        state.deps.clone(),
        params,
        inbound_rx,
        outbound_tx,
        hub.clone(),
    ));

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: drains the outbound channel to the socket. Ends when
    // the conductor drops its sender.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            if let Some(json) = encode(&event) {
                if ws_sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        ws_sink
    });

    // ── Reader loop ─────────────────────────────────────────────────
    let root = hub.root();
    let inactivity = Duration::from_secs(streaming.inactivity_timeout_secs);
    let mut close_code = close_codes::NORMAL;
    let mut timestamp_us: u64 = 0;

    loop {
        let msg = tokio::select! {
            () = root.cancelled() => break,
            next = tokio::time::timeout(inactivity, ws_stream.next()) => match next {
                Err(_) => {
                    tracing::info!(session_id = %session_id, "transport inactivity timeout");
                    break;
                }
                Ok(None) | Ok(Some(Err(_))) => break,
                Ok(Some(Ok(msg))) => msg,
            },
        };

        match msg {
            Message::Text(text) => {
                if text.len() > streaming.max_message_bytes {
                    tracing::warn!(
                        session_id = %session_id,
                        bytes = text.len(),
                        "oversized message"
                    );
                    close_code = close_codes::PROTOCOL_ERROR;
                    break;
                }
                match decode(&text, sample_rate, timestamp_us) {
                    Ok(event) => {
                        if let InboundEvent::Audio(frame) = &event {
                            timestamp_us += frame.duration_us();
                        }
                        match inbound_tx.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                tracing::warn!(
                                    session_id = %session_id,
                                    backlog = streaming.max_inbound_backlog,
                                    "inbound backlog exceeded, dropping connection"
                                );
                                break;
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "protocol violation");
                        close_code = close_codes::PROTOCOL_ERROR;
                        break;
                    }
                }
            }
            Message::Binary(_) => {
                close_code = close_codes::PROTOCOL_ERROR;
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }

    // ── Teardown: closing inbound tells the conductor we're done ────
    drop(inbound_tx);

    match tokio::time::timeout(CONDUCTOR_GRACE, conductor_task).await {
        Ok(Ok(Err(Error::Protocol(_)))) => close_code = close_codes::PROTOCOL_ERROR,
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!(session_id = %session_id, error = %e, "conductor panicked"),
        Err(_) => {
            tracing::warn!(session_id = %session_id, "conductor slow to end, forcing");
            hub.cancel_all();
        }
    }

    if let Ok(Ok(mut sink)) = tokio::time::timeout(Duration::from_secs(1), writer).await {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code,
                reason: Cow::Borrowed(""),
            })))
            .await;
    }

    state.active.remove(&session_id);
    tracing::info!(session_id = %session_id, close_code, "transport closed");
}
