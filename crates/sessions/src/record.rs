//! Session and turn records — the authoritative per-call entities.
//!
//! A [`SessionRecord`] tracks one live conversation. Its owning worker is
//! the only writer of live fields; other workers may read it through the
//! shared cache and bump its cancel epoch for cross-worker barge-in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use vb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which ingress carried this session in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Browser,
    TelephonyMedia,
    TelephonyRealtime,
}

/// Conversation state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Greeting,
    Listening,
    Thinking,
    Speaking,
    Ended,
}

impl SessionState {
    /// Whether the transition `self -> to` is permitted.
    ///
    /// Any state may end; everything else follows the conversation loop
    /// Greeting -> Listening -> Thinking -> Speaking -> Listening.
    pub fn can_transition(self, to: Self) -> bool {
        use SessionState::*;
        if self == to {
            return true;
        }
        match (self, to) {
            (_, Ended) => true,
            (Greeting, Listening) => true,
            (Listening, Thinking) => true,
            (Thinking, Speaking) | (Thinking, Listening) => true,
            (Speaking, Listening) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Greeting => "Greeting",
            Self::Listening => "Listening",
            Self::Thinking => "Thinking",
            Self::Speaking => "Speaking",
            Self::Ended => "Ended",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a turn reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Completed,
    BargedIn,
    Error,
    Timeout,
}

/// A tool invocation recorded inside a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub ok: bool,
}

/// One user utterance and the agent's response to it.
///
/// Created when a final transcript enters the turn queue; mutated only by
/// the serving task; frozen once `terminal_reason` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_index: u64,
    pub user_text: String,
    #[serde(default)]
    pub response_chunks: Vec<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terminal_reason: Option<TerminalReason>,
    /// Session cancel epoch at the moment the turn opened. A bumped epoch
    /// invalidates this turn's in-flight work.
    #[serde(default)]
    pub epoch: u64,
}

impl TurnRecord {
    pub fn open(turn_index: u64, user_text: impl Into<String>, epoch: u64) -> Self {
        Self {
            turn_index,
            user_text: user_text.into(),
            response_chunks: Vec::new(),
            tool_calls: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            terminal_reason: None,
            epoch,
        }
    }

    pub fn push_chunk(&mut self, text: impl Into<String>) {
        self.response_chunks.push(text.into());
    }

    /// Freeze the turn. Idempotent — the first reason wins.
    pub fn finish(&mut self, reason: TerminalReason) {
        if self.terminal_reason.is_none() {
            self.terminal_reason = Some(reason);
            self.ended_at = Some(Utc::now());
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.terminal_reason.is_some()
    }

    /// Full response text, the concatenation of streamed chunks.
    pub fn response_text(&self) -> String {
        self.response_chunks.concat()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The authoritative per-call entity held in the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub transport_kind: TransportKind,
    #[serde(default)]
    pub participant: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub state: SessionState,
    #[serde(default)]
    pub active_agent: Option<String>,
    /// Count of finalized user turns.
    #[serde(default)]
    pub turn_index: u64,
    /// Append-only window of finalized turns, oldest truncated.
    #[serde(default)]
    pub history: Vec<TurnRecord>,
    /// Agent-namespaced scratch keys.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Bumped on every barge-in; invalidates in-flight turns remotely.
    #[serde(default)]
    pub cancel_epoch: u64,
    /// Worker that owns mutation of this record's live fields.
    pub owner_id: String,
}

impl SessionRecord {
    pub fn new(
        session_id: impl Into<String>,
        transport_kind: TransportKind,
        owner_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            transport_kind,
            participant: None,
            created_at: now,
            last_activity_at: now,
            state: SessionState::Greeting,
            active_agent: None,
            turn_index: 0,
            history: Vec::new(),
            context: HashMap::new(),
            cancel_epoch: 0,
            owner_id: owner_id.into(),
        }
    }

    /// Transition the state machine, rejecting disallowed edges.
    pub fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(Error::Internal(format!(
                "illegal session state transition {} -> {} (session {})",
                self.state, to, self.session_id
            )));
        }
        if self.state != to {
            tracing::debug!(
                session_id = %self.session_id,
                from = %self.state,
                to = %to,
                "session state transition"
            );
            self.state = to;
        }
        self.last_activity_at = Utc::now();
        Ok(())
    }

    /// Append a frozen turn to history, truncating the oldest beyond `cap`.
    ///
    /// `turn_index` counts only finalized turns, so it advances here and
    /// nowhere else.
    pub fn append_turn(&mut self, turn: TurnRecord, cap: usize) -> Result<()> {
        if !turn.is_terminal() {
            return Err(Error::Internal(format!(
                "attempted to append non-terminal turn {} to session {}",
                turn.turn_index, self.session_id
            )));
        }
        self.history.push(turn);
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
        self.turn_index += 1;
        self.last_activity_at = Utc::now();
        Ok(())
    }

    /// The last N finalized turns, oldest first, for prompt assembly.
    pub fn recent_turns(&self, n: usize) -> &[TurnRecord] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
