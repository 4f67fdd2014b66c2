//! The per-session pipeline: conductor, turn router, orchestrator,
//! codecs, tools, and cancellation plumbing.

pub mod cancel;
pub mod codec;
pub mod conductor;
pub mod orchestrator;
pub mod tools;
pub mod turn_router;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use vb_clients::{ChatClient, ClientPool, Lease, Recognizer, Synthesizer};
use vb_domain::config::Config;
use vb_domain::error::Result;
use vb_sessions::{SessionState, SessionStore};

use crate::state::HealthRegistry;
use crate::transport::OutboundEvent;

pub use cancel::CancelHub;
pub use orchestrator::AgentRegistry;
pub use tools::ToolRegistry;

// ── Pool aliases ───────────────────────────────────────────────────

pub type SttPool = ClientPool<Box<dyn Recognizer>>;
pub type TtsPool = ClientPool<Box<dyn Synthesizer>>;
pub type LlmPool = ClientPool<Arc<dyn ChatClient>>;

pub type SttLease = Lease<Box<dyn Recognizer>>;
pub type TtsLease = Lease<Box<dyn Synthesizer>>;
pub type LlmLease = Lease<Arc<dyn ChatClient>>;

/// Everything the per-session pipeline needs. Built once at startup and
/// shared by all sessions; also assembled directly by integration tests
/// with scripted clients.
pub struct PipelineDeps {
    pub config: Arc<Config>,
    pub store: Arc<SessionStore>,
    pub stt: Arc<SttPool>,
    pub tts: Arc<TtsPool>,
    pub llm: Arc<LlmPool>,
    pub registry: Arc<orchestrator::AgentRegistry>,
    pub tools: Arc<tools::ToolRegistry>,
    pub realtime: Option<Arc<dyn vb_clients::RealtimeVoice>>,
    pub health: Arc<HealthRegistry>,
}

/// The conductor's and router's shared view of the session state, kept
/// in lockstep with the store so barge-in decisions don't need a cache
/// round trip per partial.
pub type SharedState = Arc<Mutex<SessionState>>;

/// Transition the session state: store first, then the local mirror,
/// then the state broadcast to the client.
pub(crate) async fn set_state(
    store: &SessionStore,
    shared: &SharedState,
    outbound: &mpsc::Sender<OutboundEvent>,
    session_id: &str,
    to: SessionState,
) -> Result<()> {
    store
        .mutate(session_id, |record| record.transition(to))
        .await?;
    *shared.lock() = to;
    let _ = outbound.send(OutboundEvent::State(to)).await;
    Ok(())
}

/// Synthesize one canned phrase and stream its frames to the caller.
///
/// Used for the greeting, the fallback phrase, and the goodbye phrase.
pub(crate) async fn speak_phrase(
    tts: &mut TtsLease,
    voice: &str,
    text: &str,
    outbound: &mpsc::Sender<OutboundEvent>,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<()> {
    let stream = tts.open_stream(voice, cancel.clone()).await?;
    if stream.text.send(text.to_owned()).await.is_err() {
        return Ok(());
    }
    drop(stream.text);

    let mut frames = stream.frames;
    while let Some(frame) = frames.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        if outbound.send(OutboundEvent::Audio(frame)).await.is_err() {
            break;
        }
    }
    Ok(())
}
