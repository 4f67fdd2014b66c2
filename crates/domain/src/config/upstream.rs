use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream service endpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Streaming speech-recognition service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// WebSocket endpoint of the streaming recognizer.
    #[serde(default = "d_stt_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_stt_key_env")]
    pub api_key_env: String,
    /// Session sample rate for the transcription pipeline.
    #[serde(default = "d_sr_16k")]
    pub sample_rate: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: d_stt_endpoint(),
            api_key_env: d_stt_key_env(),
            sample_rate: d_sr_16k(),
        }
    }
}

/// Streaming speech-synthesis service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "d_tts_endpoint")]
    pub endpoint: String,
    #[serde(default = "d_tts_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_sr_16k")]
    pub sample_rate: u32,
    /// Voice used when an agent does not declare one.
    #[serde(default = "d_voice")]
    pub default_voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: d_tts_endpoint(),
            api_key_env: d_tts_key_env(),
            sample_rate: d_sr_16k(),
            default_voice: d_voice(),
        }
    }
}

/// Chat-completion and realtime-voice LLM service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions base URL.
    #[serde(default = "d_llm_base")]
    pub base_url: String,
    #[serde(default = "d_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_llm_model")]
    pub model: String,
    /// Cheaper model used for intent classification. Falls back to `model`.
    #[serde(default)]
    pub classifier_model: Option<String>,
    /// WebSocket endpoint of the realtime voice model. Required only when
    /// `streaming.mode = "realtime_voice"`.
    #[serde(default)]
    pub realtime_endpoint: Option<String>,
    /// Realtime-voice sample rate.
    #[serde(default = "d_sr_24k")]
    pub realtime_sample_rate: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_base(),
            api_key_env: d_llm_key_env(),
            model: d_llm_model(),
            classifier_model: None,
            realtime_endpoint: None,
            realtime_sample_rate: d_sr_24k(),
        }
    }
}

/// Telephony provider's call-control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    #[serde(default = "d_tel_base")]
    pub base_url: String,
    #[serde(default = "d_tel_key_env")]
    pub api_key_env: String,
    /// Public URL callers' media streams are directed to when a call is
    /// answered (the `/call/stream` endpoint of this process or its LB).
    #[serde(default = "d_media_url")]
    pub media_stream_url: String,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            base_url: d_tel_base(),
            api_key_env: d_tel_key_env(),
            media_stream_url: d_media_url(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool sizing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum concurrently leased handles per client pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolSizes {
    #[serde(default = "d_pool")]
    pub stt: usize,
    #[serde(default = "d_pool")]
    pub tts: usize,
    #[serde(default = "d_pool")]
    pub llm: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            stt: d_pool(),
            tts: d_pool(),
            llm: d_pool(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_stt_endpoint() -> String {
    "ws://localhost:9100/stt".into()
}
fn d_stt_key_env() -> String {
    "VB_STT_API_KEY".into()
}
fn d_tts_endpoint() -> String {
    "ws://localhost:9200/tts".into()
}
fn d_tts_key_env() -> String {
    "VB_TTS_API_KEY".into()
}
fn d_llm_base() -> String {
    "http://localhost:9300/v1".into()
}
fn d_llm_key_env() -> String {
    "VB_LLM_API_KEY".into()
}
fn d_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn d_tel_base() -> String {
    "http://localhost:9400".into()
}
fn d_tel_key_env() -> String {
    "VB_TELEPHONY_API_KEY".into()
}
fn d_media_url() -> String {
    "ws://localhost:8080/call/stream".into()
}
fn d_voice() -> String {
    "en-neutral".into()
}
fn d_sr_16k() -> u32 {
    16_000
}
fn d_sr_24k() -> u32 {
    24_000
}
fn d_pool() -> usize {
    256
}
