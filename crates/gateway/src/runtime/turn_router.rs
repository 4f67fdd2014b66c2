//! Turn router — serializes finalized transcripts into turns.
//!
//! One turn at a time per session: dequeue a final transcript, open a
//! turn record stamped with the cancel epoch, drive the orchestrator,
//! feed its text chunks into the single open synthesis stream, and
//! freeze the record into history. Response audio for turn K is fully
//! emitted or explicitly aborted before turn K+1 begins producing audio.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vb_domain::audio::AudioFrame;
use vb_domain::error::{Error, Result};
use vb_domain::stream::OrchestratorEvent;
use vb_sessions::{SessionState, TerminalReason, ToolCallRecord, TurnRecord};

use super::cancel::CancelHub;
use super::{orchestrator, set_state, speak_phrase, PipelineDeps, SharedState, TtsLease};
use crate::state::ComponentStatus;
use crate::transport::OutboundEvent;

/// Finalized-transcript queue depth; overflow drops the oldest.
const QUEUE_DEPTH: usize = 4;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded queue of finalized user utterances awaiting a turn.
pub struct TurnQueue {
    inner: Mutex<VecDeque<String>>,
    notify: Notify,
    depth: usize,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            depth: QUEUE_DEPTH,
        }
    }

    /// Enqueue a final transcript. Returns the dropped-oldest utterance
    /// when the queue was full.
    pub fn push(&self, text: String) -> Option<String> {
        let dropped = {
            let mut inner = self.inner.lock();
            let dropped = if inner.len() >= self.depth {
                inner.pop_front()
            } else {
                None
            };
            inner.push_back(text);
            dropped
        };
        if let Some(ref lost) = dropped {
            tracing::warn!(lost = %lost, "turn queue overflow, dropped oldest utterance");
        }
        self.notify.notify_one();
        dropped
    }

    pub async fn pop(&self) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(text) = self.inner.lock().pop_front() {
                return text;
            }
            notified.await;
        }
    }

    /// Abandon everything queued (reset, session end).
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for TurnQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    Completed,
    BargedIn,
    /// Upstream failure or timeout; the caller hears the fallback phrase.
    Failed,
}

pub struct TurnRouter {
    pub deps: Arc<PipelineDeps>,
    pub session_id: String,
    pub shared: SharedState,
    pub outbound: mpsc::Sender<OutboundEvent>,
    pub hub: Arc<CancelHub>,
    pub queue: Arc<TurnQueue>,
}

impl TurnRouter {
    /// Serve turns until the session ends.
    ///
    /// The TTS lease is shared with the conductor (greeting/goodbye
    /// playback) behind a mutex; phrase playback and turn synthesis are
    /// serialized by it.
    pub async fn run(self, tts: Arc<tokio::sync::Mutex<TtsLease>>) {
        let root = self.hub.root();
        let max_failures = self.deps.config.pipeline.max_consecutive_failures;
        let mut failures: u32 = 0;

        loop {
            let user_text = tokio::select! {
                () = root.cancelled() => break,
                text = self.queue.pop() => text,
            };

            match self.serve_turn(&tts, user_text).await {
                Ok(TurnOutcome::Completed) | Ok(TurnOutcome::BargedIn) => failures = 0,
                Ok(TurnOutcome::Failed) => {
                    failures += 1;
                    let voice = self.current_voice().await;

                    if failures >= max_failures {
                        tracing::warn!(
                            session_id = %self.session_id,
                            failures,
                            "consecutive turn failures, ending call"
                        );
                        let mut guard = tts.lock().await;
                        let _ = speak_phrase(
                            &mut guard,
                            &voice,
                            &self.deps.config.phrases.goodbye,
                            &self.outbound,
                            root.child_token(),
                        )
                        .await;
                        self.hub.cancel_all();
                        break;
                    }

                    let mut guard = tts.lock().await;
                    let _ = speak_phrase(
                        &mut guard,
                        &voice,
                        &self.deps.config.phrases.fallback,
                        &self.outbound,
                        root.child_token(),
                    )
                    .await;
                    drop(guard);
                    let _ = set_state(
                        &self.deps.store,
                        &self.shared,
                        &self.outbound,
                        &self.session_id,
                        SessionState::Listening,
                    )
                    .await;
                }
                Err(e) => {
                    // Invariant violation: end this session, never the process.
                    tracing::error!(
                        session_id = %self.session_id,
                        error = %e,
                        "turn router internal error, ending session"
                    );
                    self.deps.health.set("sessions", ComponentStatus::Degraded);
                    self.hub.cancel_all();
                    break;
                }
            }
        }
    }

    async fn serve_turn(
        &self,
        tts: &Arc<tokio::sync::Mutex<TtsLease>>,
        user_text: String,
    ) -> Result<TurnOutcome> {
        let deps = &self.deps;
        let record = deps
            .store
            .load(&self.session_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("session {} vanished", self.session_id)))?;

        let mut turn = TurnRecord::open(record.turn_index, &user_text, self.hub.epoch());

        set_state(
            &deps.store,
            &self.shared,
            &self.outbound,
            &self.session_id,
            SessionState::Thinking,
        )
        .await?;

        let turn_cancel = self.hub.begin_turn();
        let mut events =
            orchestrator::run_turn(deps.clone(), record, user_text, turn_cancel.clone());

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(deps.config.pipeline.turn_timeout_ms);

        let mut synth_text: Option<mpsc::Sender<String>> = None;
        let mut frame_pump: Option<JoinHandle<()>> = None;
        let mut done_cleanly = false;
        let mut outcome = TurnOutcome::Failed;

        loop {
            tokio::select! {
                () = turn_cancel.cancelled() => {
                    turn.finish(TerminalReason::BargedIn);
                    outcome = TurnOutcome::BargedIn;
                    break;
                }
                () = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(session_id = %self.session_id, "turn wall clock exceeded");
                    turn_cancel.cancel();
                    turn.finish(TerminalReason::Timeout);
                    outcome = TurnOutcome::Failed;
                    break;
                }
                event = events.recv() => match event {
                    Some(OrchestratorEvent::TextChunk { text }) => {
                        if synth_text.is_none() {
                            set_state(
                                &deps.store,
                                &self.shared,
                                &self.outbound,
                                &self.session_id,
                                SessionState::Speaking,
                            )
                            .await?;

                            let voice = self.current_voice().await;
                            let mut guard = tts.lock().await;
                            match guard.open_stream(&voice, turn_cancel.child_token()).await {
                                Ok(stream) => {
                                    synth_text = Some(stream.text);
                                    frame_pump = Some(spawn_frame_pump(
                                        stream.frames,
                                        self.outbound.clone(),
                                        turn_cancel.clone(),
                                    ));
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "failed to open synthesis stream");
                                    turn_cancel.cancel();
                                    turn.finish(TerminalReason::Error);
                                    outcome = TurnOutcome::Failed;
                                    break;
                                }
                            }
                        }
                        turn.push_chunk(&text);
                        if let Some(tx) = &synth_text {
                            let _ = tx.send(text).await;
                        }
                    }
                    Some(OrchestratorEvent::ToolInvoked { tool_name, arguments }) => {
                        turn.tool_calls.push(ToolCallRecord {
                            tool_name,
                            arguments,
                            ok: false,
                        });
                    }
                    Some(OrchestratorEvent::ToolResult { tool_name, ok }) => {
                        if let Some(call) = turn
                            .tool_calls
                            .iter_mut()
                            .rev()
                            .find(|c| c.tool_name == tool_name)
                        {
                            call.ok = ok;
                        }
                    }
                    Some(OrchestratorEvent::Handoff { to_agent }) => {
                        let _ = self
                            .outbound
                            .send(OutboundEvent::Agent { key: to_agent })
                            .await;
                    }
                    Some(OrchestratorEvent::Done { final_text }) => {
                        let _ = self
                            .outbound
                            .send(OutboundEvent::Transcript {
                                role: "assistant",
                                text: final_text,
                                is_final: true,
                            })
                            .await;
                        done_cleanly = true;
                        break;
                    }
                    None => {
                        // Closed without Done: cancelled or failed.
                        if turn_cancel.is_cancelled() {
                            turn.finish(TerminalReason::BargedIn);
                            outcome = TurnOutcome::BargedIn;
                        } else {
                            turn.finish(TerminalReason::Error);
                            outcome = TurnOutcome::Failed;
                        }
                        break;
                    }
                },
            }
        }

        // Close the synthesis stream; the flush drains through the pump.
        drop(synth_text);
        if let Some(mut pump) = frame_pump {
            // On completion this drains every remaining frame before the
            // next turn may start (per-turn audio ordering); on
            // cancellation the pump exits promptly. A synthesizer that
            // never finishes its stream is cut off at the turn wall clock.
            let drain_budget = Duration::from_millis(deps.config.pipeline.turn_timeout_ms);
            if tokio::time::timeout(drain_budget, &mut pump).await.is_err() {
                tracing::warn!(session_id = %self.session_id, "synthesis drain exceeded budget");
                pump.abort();
            }
        }

        if done_cleanly {
            turn.finish(TerminalReason::Completed);
            set_state(
                &deps.store,
                &self.shared,
                &self.outbound,
                &self.session_id,
                SessionState::Listening,
            )
            .await?;
            outcome = TurnOutcome::Completed;
        } else if outcome == TurnOutcome::BargedIn && !self.hub.root().is_cancelled() {
            // The conductor flips to Listening on the barge-in trigger, but
            // this turn may have written Speaking just after that. Re-assert
            // so the next turn starts from a legal state.
            set_state(
                &deps.store,
                &self.shared,
                &self.outbound,
                &self.session_id,
                SessionState::Listening,
            )
            .await?;
        }
        self.hub.end_turn();

        // Freeze the turn into history.
        let cap = deps.config.session.history_cap_turns;
        deps.store
            .mutate(&self.session_id, move |r| {
                r.append_turn(turn.clone(), cap)
            })
            .await?;

        Ok(outcome)
    }

    /// Synthesis voice of the currently active agent.
    async fn current_voice(&self) -> String {
        let active = self
            .deps
            .store
            .load(&self.session_id)
            .await
            .ok()
            .flatten()
            .and_then(|r| r.active_agent);

        active
            .and_then(|key| self.deps.registry.get(&key))
            .map(|agent| agent.voice_profile.clone())
            .unwrap_or_else(|| self.deps.config.tts.default_voice.clone())
    }
}

/// Forward synthesis frames to the transport until the stream ends or the
/// turn is cancelled. Cancellation tells the far end to drop buffered
/// audio. Backpressure is the outbound channel itself: when it is full
/// this pump stalls, which stalls reads from the synthesizer.
fn spawn_frame_pump(
    mut frames: mpsc::Receiver<AudioFrame>,
    outbound: mpsc::Sender<OutboundEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = outbound.send(OutboundEvent::ClearAudio).await;
                    return;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        if outbound.send(OutboundEvent::Audio(frame)).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_preserves_fifo_order() {
        let queue = TurnQueue::new();
        queue.push("one".into());
        queue.push("two".into());
        assert_eq!(queue.pop().await, "one");
        assert_eq!(queue.pop().await, "two");
    }

    #[tokio::test]
    async fn queue_overflow_drops_oldest() {
        let queue = TurnQueue::new();
        for i in 0..5 {
            queue.push(format!("utterance {i}"));
        }
        assert_eq!(queue.len(), QUEUE_DEPTH);
        assert_eq!(queue.pop().await, "utterance 1");
    }

    #[tokio::test]
    async fn queue_pop_waits_for_push() {
        let queue = Arc::new(TurnQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        queue.push("late".into());
        assert_eq!(waiter.await.unwrap(), "late");
    }

    #[tokio::test]
    async fn queue_clear_abandons_pending() {
        let queue = TurnQueue::new();
        queue.push("a".into());
        queue.push("b".into());
        queue.clear();
        assert!(queue.is_empty());
    }
}
