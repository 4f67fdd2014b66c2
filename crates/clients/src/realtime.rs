//! End-to-end realtime voice adapter (binary audio over WebSocket).
//!
//! In realtime-voice mode the caller's audio goes straight to a
//! speech-native model and its audio comes straight back — no STT, no
//! orchestrator, no TTS. Transcript events still flow down so the
//! browser client can render captions.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::traits::{RealtimeStream, RealtimeVoice};
use crate::util::{from_ws, ws_request};
use vb_domain::audio::{AudioFrame, FrameAssembler, TranscriptEvent};
use vb_domain::error::Result;

const CHANNEL_DEPTH: usize = 32;

/// WebSocket realtime-voice client.
pub struct WsRealtimeVoice {
    endpoint: String,
    api_key: Option<String>,
}

impl WsRealtimeVoice {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl RealtimeVoice for WsRealtimeVoice {
    async fn open(
        &self,
        session_id: &str,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> Result<RealtimeStream> {
        let request = ws_request("llm", &self.endpoint, self.api_key.as_deref())?;
        let (ws, _) = connect_async(request).await.map_err(|e| from_ws("llm", e))?;
        let (mut sink, mut stream) = ws.split();

        let start = serde_json::json!({
            "type": "start",
            "session_id": session_id,
            "sample_rate": sample_rate,
            "encoding": "pcm16",
        });
        sink.send(Message::Text(start.to_string()))
            .await
            .map_err(|e| from_ws("llm", e))?;

        let (audio_in_tx, mut audio_in_rx) = mpsc::channel::<AudioFrame>(CHANNEL_DEPTH);
        let (audio_out_tx, audio_out_rx) = mpsc::channel::<AudioFrame>(CHANNEL_DEPTH);
        let (transcript_tx, transcript_rx) = mpsc::channel::<TranscriptEvent>(CHANNEL_DEPTH);

        // Caller audio up.
        let write_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = write_cancel.cancelled() => return,
                    frame = audio_in_rx.recv() => match frame {
                        Some(frame) => {
                            if sink.send(Message::Binary(frame.into_pcm())).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            let finish = serde_json::json!({ "type": "finish" });
                            let _ = sink.send(Message::Text(finish.to_string())).await;
                            return;
                        }
                    },
                }
            }
        });

        // Model audio and transcripts down.
        tokio::spawn(async move {
            let mut assembler = FrameAssembler::new(sample_rate);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Binary(pcm))) => {
                            for frame in assembler.push(&pcm) {
                                if audio_out_tx.send(frame).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<TranscriptEvent>(&text) {
                                Ok(event) => {
                                    if transcript_tx.send(event).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::debug!(error = %e, "ignoring unparseable realtime message");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            if let Some(tail) = assembler.flush() {
                                let _ = audio_out_tx.send(tail).await;
                            }
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "realtime voice stream failed");
                            return;
                        }
                    },
                }
            }
        });

        Ok(RealtimeStream {
            audio_in: audio_in_tx,
            audio_out: audio_out_rx,
            transcripts: transcript_rx,
        })
    }
}
