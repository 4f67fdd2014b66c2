use serde::{Deserialize, Serialize};

/// Which pipeline shape a new session gets.
///
/// The mode is pinned at session creation; switching mid-call is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Telephony media frames through the transcription pipeline.
    #[default]
    Media,
    /// Browser audio through the transcription pipeline.
    Transcription,
    /// End-to-end realtime voice model; bypasses orchestration.
    RealtimeVoice,
}

/// Transport-level limits shared by both WebSocket dialects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default)]
    pub mode: StreamingMode,
    /// Idle seconds before the connection is closed with code 1000.
    #[serde(default = "d_inactivity")]
    pub inactivity_timeout_secs: u64,
    /// Largest accepted single WebSocket message.
    #[serde(default = "d_max_message")]
    pub max_message_bytes: usize,
    /// Unread inbound messages beyond which the connection is dropped.
    #[serde(default = "d_backlog")]
    pub max_inbound_backlog: usize,
    /// Outbound frame queue high-water mark; synthesis pauses above it.
    #[serde(default = "d_high_water")]
    pub outbound_high_water_frames: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mode: StreamingMode::default(),
            inactivity_timeout_secs: d_inactivity(),
            max_message_bytes: d_max_message(),
            max_inbound_backlog: d_backlog(),
            outbound_high_water_frames: d_high_water(),
        }
    }
}

fn d_inactivity() -> u64 {
    30
}
fn d_max_message() -> usize {
    16 * 1024
}
fn d_backlog() -> usize {
    256
}
fn d_high_water() -> usize {
    64
}
