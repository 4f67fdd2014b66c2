//! Client seams for the three upstream services.
//!
//! Every adapter is a trait object so the pipeline can be exercised with
//! scripted fakes: a streaming chat model, a streaming recognizer, and a
//! streaming synthesizer. All streams are bounded channels and every
//! long-running operation is governed by the caller's cancellation token.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vb_domain::audio::{AudioFrame, TranscriptEvent};
use vb_domain::error::Result;
use vb_domain::stream::{BoxStream, ChatEvent};
use vb_domain::tool::{Message, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat completion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. When `None`, the client uses its default.
    pub model: Option<String>,
}

/// Streaming chat-completion client.
///
/// The stream yields fully-assembled [`ChatEvent`]s: tool-call argument
/// deltas never escape the adapter. Dropping the stream cancels the
/// underlying request.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<ChatEvent>>>;

    /// A unique identifier for this client instance.
    fn client_id(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Speech recognition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An open recognition stream: audio frames in, transcript events out.
///
/// Dropping `frames` signals end of audio; the events channel closes
/// after the last final. Upstream failures surface as `Err` items so the
/// consumer can apply the session's failure policy.
pub struct RecognizerStream {
    pub frames: mpsc::Sender<AudioFrame>,
    pub events: mpsc::Receiver<Result<TranscriptEvent>>,
}

/// One exclusive streaming recognizer handle, leased from the STT pool
/// for the life of a session.
#[async_trait::async_trait]
pub trait Recognizer: Send {
    /// Begin a recognition stream at the session's pinned sample rate.
    async fn start(&mut self, sample_rate: u32) -> Result<RecognizerStream>;

    /// Drain any in-flight stream and make the handle reusable.
    async fn reset(&mut self) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Speech synthesis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An open synthesis stream: text chunks in, ordered 20 ms frames out.
///
/// Closing `text` flushes the remaining synthesis; the frames channel
/// closes after the last frame. Cancelling the token passed to
/// [`Synthesizer::open_stream`] stops frame emission promptly.
pub struct SynthesisStream {
    pub text: mpsc::Sender<String>,
    pub frames: mpsc::Receiver<AudioFrame>,
}

/// One exclusive streaming synthesizer handle, leased from the TTS pool
/// for the life of a session. A single stream is open per turn.
#[async_trait::async_trait]
pub trait Synthesizer: Send {
    async fn open_stream(
        &mut self,
        voice_profile: &str,
        cancel: CancellationToken,
    ) -> Result<SynthesisStream>;

    /// Drain any in-flight stream and make the handle reusable.
    async fn reset(&mut self) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Realtime voice
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An end-to-end realtime voice session: caller audio in, model audio and
/// transcripts out. Used when the pipeline runs in realtime-voice mode,
/// bypassing the orchestrator entirely.
pub struct RealtimeStream {
    pub audio_in: mpsc::Sender<AudioFrame>,
    pub audio_out: mpsc::Receiver<AudioFrame>,
    pub transcripts: mpsc::Receiver<TranscriptEvent>,
}

#[async_trait::async_trait]
pub trait RealtimeVoice: Send + Sync {
    async fn open(
        &self,
        session_id: &str,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> Result<RealtimeStream>;
}
