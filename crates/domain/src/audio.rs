//! Internal audio frame type and 20 ms framing helpers.
//!
//! Every transport dialect and every upstream client converts to/from
//! [`AudioFrame`] at the boundary. Frames are PCM16 little-endian, mono,
//! pinned to the session's sample rate — no resampling happens on the
//! fast path.

use serde::{Deserialize, Serialize};

/// Fixed frame duration for all wire traffic.
pub const FRAME_MS: u32 = 20;

/// PCM16 sample width.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Number of samples in one 20 ms frame at the given rate.
pub const fn samples_per_frame(sample_rate: u32) -> usize {
    (sample_rate / 1000 * FRAME_MS) as usize
}

/// Number of PCM bytes in one 20 ms frame at the given rate.
pub const fn frame_bytes(sample_rate: u32) -> usize {
    samples_per_frame(sample_rate) * BYTES_PER_SAMPLE
}

// ── Audio frame ────────────────────────────────────────────────────

/// One frame of mono PCM16 audio. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
    sample_rate: u32,
    timestamp_us: u64,
    channel_count: u16,
    is_final: bool,
}

impl AudioFrame {
    pub fn new(pcm: Vec<u8>, sample_rate: u32, timestamp_us: u64) -> Self {
        Self {
            pcm,
            sample_rate,
            timestamp_us,
            channel_count: 1,
            is_final: false,
        }
    }

    /// Mark this frame as the last of its stream.
    pub fn into_final(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    pub fn into_pcm(self) -> Vec<u8> {
        self.pcm
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub const fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub const fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn sample_count(&self) -> usize {
        self.pcm.len() / BYTES_PER_SAMPLE
    }

    pub fn duration_us(&self) -> u64 {
        (self.sample_count() as u64 * 1_000_000) / self.sample_rate as u64
    }
}

// ── Transcript events ──────────────────────────────────────────────

/// Streaming speech-recognition output.
///
/// Partials are unstable hypotheses produced during an utterance; exactly
/// one final arrives when the utterance ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    Partial {
        text: String,
        /// Hypothesis stability in `[0, 1]`.
        stability: f32,
        offset_ms: u64,
    },
    Final {
        text: String,
        offset_ms: u64,
        duration_ms: u64,
    },
}

impl TranscriptEvent {
    pub fn text(&self) -> &str {
        match self {
            Self::Partial { text, .. } | Self::Final { text, .. } => text,
        }
    }

    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

// ── Frame assembler ────────────────────────────────────────────────

/// Regroups arbitrarily-sized PCM chunks into exact 20 ms frames.
///
/// Upstream synthesizers emit audio in whatever chunk size suits them;
/// the wire always carries 20 ms frames. Residual bytes are carried over
/// to the next `push`. `flush` pads the tail with silence so the last
/// frame is full-length.
#[derive(Debug)]
pub struct FrameAssembler {
    sample_rate: u32,
    residual: Vec<u8>,
    next_timestamp_us: u64,
}

impl FrameAssembler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            residual: Vec::new(),
            next_timestamp_us: 0,
        }
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Append PCM bytes, returning every complete 20 ms frame now available.
    pub fn push(&mut self, pcm: &[u8]) -> Vec<AudioFrame> {
        self.residual.extend_from_slice(pcm);

        let frame_len = frame_bytes(self.sample_rate);
        let mut frames = Vec::with_capacity(self.residual.len() / frame_len);

        while self.residual.len() >= frame_len {
            let rest = self.residual.split_off(frame_len);
            let chunk = std::mem::replace(&mut self.residual, rest);
            frames.push(AudioFrame::new(
                chunk,
                self.sample_rate,
                self.next_timestamp_us,
            ));
            self.next_timestamp_us += u64::from(FRAME_MS) * 1_000;
        }

        frames
    }

    /// Emit the residual tail padded with silence, marked final.
    /// Returns `None` when no residual audio is pending.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.residual.is_empty() {
            return None;
        }

        let frame_len = frame_bytes(self.sample_rate);
        let mut pcm = std::mem::take(&mut self.residual);
        pcm.resize(frame_len, 0);

        let frame = AudioFrame::new(pcm, self.sample_rate, self.next_timestamp_us).into_final();
        self.next_timestamp_us += u64::from(FRAME_MS) * 1_000;
        Some(frame)
    }
}
