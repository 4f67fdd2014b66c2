//! Streaming speech-recognition adapter (JSON over WebSocket).
//!
//! One connection per recognition stream: `start` dials the recognizer,
//! announces the sample rate, then pumps binary PCM frames up and parses
//! transcript events down. Upstream failures surface as `Err` items on
//! the event channel so the session can apply its failure policy and the
//! pool can discard the handle.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::pool::ClientFactory;
use crate::traits::{Recognizer, RecognizerStream};
use crate::util::{from_ws, ws_request};
use vb_domain::audio::{AudioFrame, TranscriptEvent};
use vb_domain::error::{Error, Result};

/// Channel depth for frames in and events out.
const CHANNEL_DEPTH: usize = 32;

// ── Wire shapes ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SttWireEvent {
    Partial {
        text: String,
        #[serde(default)]
        stability: f32,
        #[serde(default)]
        offset_ms: u64,
    },
    Final {
        text: String,
        #[serde(default)]
        offset_ms: u64,
        #[serde(default)]
        duration_ms: u64,
    },
    Error {
        message: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recognizer handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// WebSocket streaming recognizer handle.
pub struct WsRecognizer {
    endpoint: String,
    api_key: Option<String>,
    pumps: Vec<JoinHandle<()>>,
}

impl WsRecognizer {
    fn abort_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

#[async_trait::async_trait]
impl Recognizer for WsRecognizer {
    async fn start(&mut self, sample_rate: u32) -> Result<RecognizerStream> {
        self.abort_pumps();

        let request = ws_request("stt", &self.endpoint, self.api_key.as_deref())?;
        let (ws, _) = connect_async(request).await.map_err(|e| from_ws("stt", e))?;
        let (mut sink, mut stream) = ws.split();

        let start = serde_json::json!({
            "type": "start",
            "sample_rate": sample_rate,
            "encoding": "pcm16",
        });
        sink.send(Message::Text(start.to_string()))
            .await
            .map_err(|e| from_ws("stt", e))?;

        let (frames_tx, mut frames_rx) = mpsc::channel::<AudioFrame>(CHANNEL_DEPTH);
        let (events_tx, events_rx) = mpsc::channel::<Result<TranscriptEvent>>(CHANNEL_DEPTH);

        // Write pump: frames up as binary PCM, finish marker on close.
        let writer = tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if sink.send(Message::Binary(frame.into_pcm())).await.is_err() {
                    return;
                }
            }
            let finish = serde_json::json!({ "type": "finish" });
            let _ = sink.send(Message::Text(finish.to_string())).await;
        });

        // Read pump: transcript events down, errors surfaced to the consumer.
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SttWireEvent>(&text) {
                        Ok(SttWireEvent::Partial {
                            text,
                            stability,
                            offset_ms,
                        }) => {
                            let event = TranscriptEvent::Partial {
                                text,
                                stability,
                                offset_ms,
                            };
                            if events_tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                        Ok(SttWireEvent::Final {
                            text,
                            offset_ms,
                            duration_ms,
                        }) => {
                            let event = TranscriptEvent::Final {
                                text,
                                offset_ms,
                                duration_ms,
                            };
                            if events_tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                        Ok(SttWireEvent::Error { message }) => {
                            let _ = events_tx.send(Err(Error::upstream("stt", message))).await;
                            return;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "ignoring unparseable recognizer message");
                        }
                    },
                    Ok(Message::Close(_)) => return,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events_tx.send(Err(from_ws("stt", e))).await;
                        return;
                    }
                }
            }
        });

        self.pumps = vec![writer, reader];

        Ok(RecognizerStream {
            frames: frames_tx,
            events: events_rx,
        })
    }

    async fn reset(&mut self) -> Result<()> {
        self.abort_pumps();
        Ok(())
    }
}

impl Drop for WsRecognizer {
    fn drop(&mut self) {
        self.abort_pumps();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dials [`WsRecognizer`] handles for the STT pool.
pub struct WsRecognizerFactory {
    endpoint: String,
    api_key: Option<String>,
}

impl WsRecognizerFactory {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl ClientFactory<Box<dyn Recognizer>> for WsRecognizerFactory {
    async fn connect(&self) -> Result<Box<dyn Recognizer>> {
        // The socket is dialed lazily in `start`; the handle itself is
        // just the dial parameters.
        Ok(Box::new(WsRecognizer {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            pumps: Vec::new(),
        }))
    }

    fn service(&self) -> &str {
        "stt"
    }
}
