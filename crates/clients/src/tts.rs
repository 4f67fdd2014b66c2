//! Streaming speech-synthesis adapter (JSON over WebSocket).
//!
//! One connection per synthesis stream. Text chunks flow up as they
//! stream from the model; base64 PCM comes down in whatever chunk size
//! the vendor prefers and is regrouped into exact 20 ms frames before it
//! reaches the session. Cancelling the token stops frame emission
//! promptly and tells the vendor to stop synthesizing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::pool::ClientFactory;
use crate::traits::{SynthesisStream, Synthesizer};
use crate::util::{from_ws, ws_request};
use vb_domain::audio::{AudioFrame, FrameAssembler};
use vb_domain::error::Result;

const CHANNEL_DEPTH: usize = 32;

// ── Wire shapes ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TtsWireEvent {
    /// A base64 PCM16 chunk of arbitrary size.
    Audio { data: String },
    /// Synthesis of all flushed text is complete.
    Done,
    Error { message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Synthesizer handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// WebSocket streaming synthesizer handle.
pub struct WsSynthesizer {
    endpoint: String,
    api_key: Option<String>,
    sample_rate: u32,
    pumps: Vec<JoinHandle<()>>,
}

impl WsSynthesizer {
    fn abort_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

#[async_trait::async_trait]
impl Synthesizer for WsSynthesizer {
    async fn open_stream(
        &mut self,
        voice_profile: &str,
        cancel: CancellationToken,
    ) -> Result<SynthesisStream> {
        self.abort_pumps();

        let request = ws_request("tts", &self.endpoint, self.api_key.as_deref())?;
        let (ws, _) = connect_async(request).await.map_err(|e| from_ws("tts", e))?;
        let (mut sink, mut stream) = ws.split();

        let start = serde_json::json!({
            "type": "start",
            "voice": voice_profile,
            "sample_rate": self.sample_rate,
            "encoding": "pcm16",
        });
        sink.send(Message::Text(start.to_string()))
            .await
            .map_err(|e| from_ws("tts", e))?;

        let (text_tx, mut text_rx) = mpsc::channel::<String>(CHANNEL_DEPTH);
        let (frames_tx, frames_rx) = mpsc::channel::<AudioFrame>(CHANNEL_DEPTH);

        // Write pump: text chunks up; flush marker when the sender closes,
        // stop marker when the turn is cancelled.
        let write_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = write_cancel.cancelled() => {
                        let stop = serde_json::json!({ "type": "stop" });
                        let _ = sink.send(Message::Text(stop.to_string())).await;
                        return;
                    }
                    chunk = text_rx.recv() => match chunk {
                        Some(text) => {
                            let msg = serde_json::json!({ "type": "text", "text": text });
                            if sink.send(Message::Text(msg.to_string())).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            let flush = serde_json::json!({ "type": "flush" });
                            let _ = sink.send(Message::Text(flush.to_string())).await;
                            return;
                        }
                    },
                }
            }
        });

        // Read pump: PCM chunks down, regrouped into 20 ms frames. Frame
        // forwarding honors both the cancel token and the receiver's
        // backpressure (a full frames channel pauses reads here).
        let sample_rate = self.sample_rate;
        let reader = tokio::spawn(async move {
            let mut assembler = FrameAssembler::new(sample_rate);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    msg = stream.next() => {
                        let msg = match msg {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Close(_))) | None => return,
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "synthesis stream failed");
                                return;
                            }
                        };
                        match serde_json::from_str::<TtsWireEvent>(&msg) {
                            Ok(TtsWireEvent::Audio { data }) => {
                                let pcm = match BASE64.decode(data.as_bytes()) {
                                    Ok(pcm) => pcm,
                                    Err(e) => {
                                        tracing::warn!(error = %e, "dropping undecodable audio chunk");
                                        continue;
                                    }
                                };
                                for frame in assembler.push(&pcm) {
                                    tokio::select! {
                                        () = cancel.cancelled() => return,
                                        sent = frames_tx.send(frame) => {
                                            if sent.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                }
                            }
                            Ok(TtsWireEvent::Done) => {
                                if let Some(tail) = assembler.flush() {
                                    let _ = frames_tx.send(tail).await;
                                }
                                return;
                            }
                            Ok(TtsWireEvent::Error { message }) => {
                                tracing::warn!(reason = %message, "synthesizer reported an error");
                                return;
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "ignoring unparseable synthesizer message");
                            }
                        }
                    }
                }
            }
        });

        self.pumps = vec![writer, reader];

        Ok(SynthesisStream {
            text: text_tx,
            frames: frames_rx,
        })
    }

    async fn reset(&mut self) -> Result<()> {
        self.abort_pumps();
        Ok(())
    }
}

impl Drop for WsSynthesizer {
    fn drop(&mut self) {
        self.abort_pumps();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dials [`WsSynthesizer`] handles for the TTS pool.
pub struct WsSynthesizerFactory {
    endpoint: String,
    api_key: Option<String>,
    sample_rate: u32,
}

impl WsSynthesizerFactory {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, sample_rate: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            sample_rate,
        }
    }
}

#[async_trait::async_trait]
impl ClientFactory<Box<dyn Synthesizer>> for WsSynthesizerFactory {
    async fn connect(&self) -> Result<Box<dyn Synthesizer>> {
        Ok(Box::new(WsSynthesizer {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            sample_rate: self.sample_rate,
            pumps: Vec::new(),
        }))
    }

    fn service(&self) -> &str {
        "tts"
    }
}
