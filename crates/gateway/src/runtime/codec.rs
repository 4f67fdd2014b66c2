//! Wire codecs for the two transport dialects.
//!
//! Both dialects carry base64 PCM16 inside JSON. Decode rejects audio
//! whose sample rate disagrees with the session's pinned rate; encode is
//! pure formatting (frames are already 20 ms by the time they get here).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;

use vb_domain::audio::AudioFrame;
use vb_domain::error::{Error, Result};

use crate::transport::{InboundEvent, OutboundEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Browser dialect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod browser {
    use super::*;

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum ClientMessage {
        Audio {
            data: String,
            #[serde(default)]
            sr: Option<u32>,
        },
        Text {
            text: String,
        },
        Interrupt,
        Reset,
        Hangup,
    }

    /// Decode one browser JSON message into an internal event.
    ///
    /// `timestamp_us` stamps decoded audio; the reader advances it by one
    /// frame per audio message.
    pub fn decode(raw: &str, pinned_rate: u32, timestamp_us: u64) -> Result<InboundEvent> {
        let msg: ClientMessage = serde_json::from_str(raw)
            .map_err(|e| Error::Protocol(format!("malformed browser message: {e}")))?;

        Ok(match msg {
            ClientMessage::Audio { data, sr } => {
                if let Some(sr) = sr {
                    if sr != pinned_rate {
                        return Err(Error::Protocol(format!(
                            "audio at {sr} Hz on a session pinned to {pinned_rate} Hz"
                        )));
                    }
                }
                let pcm = BASE64
                    .decode(data.as_bytes())
                    .map_err(|e| Error::Protocol(format!("undecodable audio payload: {e}")))?;
                InboundEvent::Audio(AudioFrame::new(pcm, pinned_rate, timestamp_us))
            }
            ClientMessage::Text { text } => InboundEvent::Text(text),
            ClientMessage::Interrupt => InboundEvent::Interrupt,
            ClientMessage::Reset => InboundEvent::Reset,
            ClientMessage::Hangup => InboundEvent::Hangup,
        })
    }

    /// Encode an outbound event as browser JSON.
    ///
    /// Returns `None` for events the browser dialect does not carry.
    pub fn encode(event: &OutboundEvent) -> Option<String> {
        let value = match event {
            OutboundEvent::Audio(frame) => serde_json::json!({
                "type": "audio",
                "data": BASE64.encode(frame.pcm()),
            }),
            OutboundEvent::Transcript {
                role,
                text,
                is_final,
            } => serde_json::json!({
                "type": "transcript",
                "role": role,
                "text": text,
                "final": is_final,
            }),
            OutboundEvent::State(state) => serde_json::json!({
                "type": "state",
                "state": state.to_string(),
            }),
            OutboundEvent::Agent { key } => serde_json::json!({
                "type": "agent",
                "key": key,
            }),
            OutboundEvent::Error { code, message } => serde_json::json!({
                "type": "error",
                "code": code,
                "message": message,
            }),
            // The browser drains its playback buffer on the transcript /
            // state flip; there is no dedicated clear message.
            OutboundEvent::ClearAudio => return None,
        };
        Some(value.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Telephony media dialect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod telephony {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct AudioData {
        data: String,
        #[serde(default)]
        #[allow(dead_code)]
        timestamp: Option<String>,
        #[serde(default)]
        silent: bool,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "kind")]
    enum ProviderMessage {
        AudioData {
            #[serde(rename = "audioData")]
            audio_data: AudioData,
        },
        StopAudio,
    }

    /// Decode one provider envelope into an internal event.
    ///
    /// Silent frames still feed the recognizer (it needs them for
    /// end-of-utterance detection). `StopAudio` from the provider means
    /// the call's media is over.
    pub fn decode(raw: &str, pinned_rate: u32, timestamp_us: u64) -> Result<InboundEvent> {
        let msg: ProviderMessage = serde_json::from_str(raw)
            .map_err(|e| Error::Protocol(format!("malformed provider envelope: {e}")))?;

        Ok(match msg {
            ProviderMessage::AudioData { audio_data } => {
                let _ = audio_data.silent;
                let pcm = BASE64
                    .decode(audio_data.data.as_bytes())
                    .map_err(|e| Error::Protocol(format!("undecodable audio payload: {e}")))?;
                InboundEvent::Audio(AudioFrame::new(pcm, pinned_rate, timestamp_us))
            }
            ProviderMessage::StopAudio => InboundEvent::Hangup,
        })
    }

    /// Encode an outbound event as a provider envelope.
    ///
    /// The provider only understands audio and the stop marker; states,
    /// transcripts, and errors stay inside the process.
    pub fn encode(event: &OutboundEvent) -> Option<String> {
        let value = match event {
            OutboundEvent::Audio(frame) => serde_json::json!({
                "kind": "AudioData",
                "audioData": { "data": BASE64.encode(frame.pcm()) },
            }),
            OutboundEvent::ClearAudio => serde_json::json!({ "kind": "StopAudio" }),
            _ => return None,
        };
        Some(value.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use vb_domain::audio::frame_bytes;
    use vb_sessions::SessionState;

    fn pcm_b64(len: usize) -> String {
        BASE64.encode(vec![7u8; len])
    }

    #[test]
    fn browser_audio_round_trips() {
        let pcm = vec![7u8; frame_bytes(16_000)];
        let raw = serde_json::json!({
            "type": "audio",
            "data": BASE64.encode(&pcm),
            "sr": 16_000,
        })
        .to_string();

        let event = browser::decode(&raw, 16_000, 40_000).unwrap();
        let frame = match event {
            InboundEvent::Audio(frame) => frame,
            other => panic!("expected audio, got {other:?}"),
        };
        assert_eq!(frame.pcm(), &pcm[..]);
        assert_eq!(frame.sample_rate(), 16_000);
        assert_eq!(frame.timestamp_us(), 40_000);

        // Encode ∘ Decode is identity on the PCM payload.
        let encoded = browser::encode(&OutboundEvent::Audio(frame)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed["type"], "audio");
        assert_eq!(
            BASE64.decode(parsed["data"].as_str().unwrap()).unwrap(),
            pcm
        );
    }

    #[test]
    fn browser_rejects_mismatched_sample_rate() {
        let raw = serde_json::json!({
            "type": "audio",
            "data": pcm_b64(640),
            "sr": 24_000,
        })
        .to_string();
        let err = browser::decode(&raw, 16_000, 0).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn browser_control_messages_decode() {
        assert!(matches!(
            browser::decode(r#"{"type":"interrupt"}"#, 16_000, 0).unwrap(),
            InboundEvent::Interrupt
        ));
        assert!(matches!(
            browser::decode(r#"{"type":"reset"}"#, 16_000, 0).unwrap(),
            InboundEvent::Reset
        ));
        assert!(matches!(
            browser::decode(r#"{"type":"text","text":"hi"}"#, 16_000, 0).unwrap(),
            InboundEvent::Text(t) if t == "hi"
        ));
    }

    #[test]
    fn browser_malformed_json_is_protocol_error() {
        let err = browser::decode("{not json", 16_000, 0).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn browser_state_and_transcript_encode() {
        let state = browser::encode(&OutboundEvent::State(SessionState::Listening)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&state).unwrap();
        assert_eq!(parsed["state"], "Listening");

        let transcript = browser::encode(&OutboundEvent::Transcript {
            role: "user",
            text: "what's the weather".into(),
            is_final: true,
        })
        .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&transcript).unwrap();
        assert_eq!(parsed["role"], "user");
        assert_eq!(parsed["final"], true);
    }

    #[test]
    fn telephony_audio_round_trips() {
        let pcm = vec![3u8; frame_bytes(16_000)];
        let raw = serde_json::json!({
            "kind": "AudioData",
            "audioData": {
                "data": BASE64.encode(&pcm),
                "timestamp": "2026-08-01T10:00:00Z",
                "silent": false,
            },
        })
        .to_string();

        let frame = match telephony::decode(&raw, 16_000, 0).unwrap() {
            InboundEvent::Audio(frame) => frame,
            other => panic!("expected audio, got {other:?}"),
        };
        assert_eq!(frame.pcm(), &pcm[..]);

        let encoded = telephony::encode(&OutboundEvent::Audio(frame)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed["kind"], "AudioData");
        assert_eq!(
            BASE64
                .decode(parsed["audioData"]["data"].as_str().unwrap())
                .unwrap(),
            pcm
        );
    }

    #[test]
    fn telephony_stop_audio_means_hangup() {
        assert!(matches!(
            telephony::decode(r#"{"kind":"StopAudio"}"#, 16_000, 0).unwrap(),
            InboundEvent::Hangup
        ));
    }

    #[test]
    fn telephony_clear_audio_encodes_stop() {
        let encoded = telephony::encode(&OutboundEvent::ClearAudio).unwrap();
        assert_eq!(encoded, r#"{"kind":"StopAudio"}"#);
    }

    #[test]
    fn telephony_skips_internal_events() {
        assert!(telephony::encode(&OutboundEvent::State(SessionState::Thinking)).is_none());
        assert!(telephony::encode(&OutboundEvent::Agent { key: "claims".into() }).is_none());
    }
}
