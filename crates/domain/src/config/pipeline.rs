use serde::{Deserialize, Serialize};

/// Turn-serving knobs and barge-in thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-turn wall clock.
    #[serde(default = "d_turn_timeout")]
    pub turn_timeout_ms: u64,
    /// Per-tool wall clock.
    #[serde(default = "d_tool_timeout")]
    pub tool_timeout_ms: u64,
    /// How many recent turns enter the prompt.
    #[serde(default = "d_history_window")]
    pub history_window_turns: usize,
    /// Partial stability above which barge-in fires.
    #[serde(default = "d_barge_stability")]
    pub barge_in_stability_threshold: f32,
    /// Minimum sustained partial duration for barge-in.
    #[serde(default = "d_barge_min_audio")]
    pub barge_in_min_audio_ms: u64,
    /// Seconds without partials in Listening before the call is ended
    /// with the goodbye phrase.
    #[serde(default = "d_silence_timeout")]
    pub silence_timeout_secs: u64,
    /// Consecutive turn failures that end the call.
    #[serde(default = "d_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            turn_timeout_ms: d_turn_timeout(),
            tool_timeout_ms: d_tool_timeout(),
            history_window_turns: d_history_window(),
            barge_in_stability_threshold: d_barge_stability(),
            barge_in_min_audio_ms: d_barge_min_audio(),
            silence_timeout_secs: d_silence_timeout(),
            max_consecutive_failures: d_max_failures(),
        }
    }
}

/// Canned phrases the caller hears around the agent's own speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseConfig {
    #[serde(default = "d_greeting")]
    pub greeting: String,
    /// Spoken when a turn aborts or the model produced nothing.
    #[serde(default = "d_fallback")]
    pub fallback: String,
    /// Spoken before the call ends on silence or repeated failure.
    #[serde(default = "d_goodbye")]
    pub goodbye: String,
}

impl Default for PhraseConfig {
    fn default() -> Self {
        Self {
            greeting: d_greeting(),
            fallback: d_fallback(),
            goodbye: d_goodbye(),
        }
    }
}

/// Session record retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle TTL for a session record in the shared cache.
    #[serde(default = "d_ttl")]
    pub ttl_seconds: u64,
    /// Stable identity of this worker in session records. A random id is
    /// minted at startup when unset.
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Turns retained in a record's history window.
    #[serde(default = "d_history_cap")]
    pub history_cap_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: d_ttl(),
            worker_id: None,
            history_cap_turns: d_history_cap(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_turn_timeout() -> u64 {
    30_000
}
fn d_tool_timeout() -> u64 {
    10_000
}
fn d_history_window() -> usize {
    8
}
fn d_barge_stability() -> f32 {
    0.3
}
fn d_barge_min_audio() -> u64 {
    120
}
fn d_silence_timeout() -> u64 {
    15
}
fn d_max_failures() -> u32 {
    3
}
fn d_ttl() -> u64 {
    86_400
}
fn d_history_cap() -> usize {
    64
}
fn d_greeting() -> String {
    "Hello, thanks for calling. How can I help you today?".into()
}
fn d_fallback() -> String {
    "Sorry, I didn't catch that. Could you say it again?".into()
}
fn d_goodbye() -> String {
    "Thanks for calling. Goodbye.".into()
}
