//! Session conductor — per-call lifecycle and barge-in.
//!
//! One conductor per live call. It owns the session's task cluster and
//! the bounded channels between them: the transport reader feeds
//! [`InboundEvent`]s in, the STT consumer turns recognizer events into
//! state transitions and queued turns, the router serves turns, and the
//! writer drains [`OutboundEvent`]s back to the transport. Nothing holds
//! a back-reference; teardown closes channels in a fixed order (inbound,
//! then STT, then outbound) so everything drains cleanly.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use vb_domain::config::StreamingMode;
use vb_domain::error::{Error, Result};
use vb_sessions::{CacheEvent, CreateOutcome, SessionRecord, SessionState, TransportKind};

use super::cancel::CancelHub;
use super::turn_router::{TurnQueue, TurnRouter};
use super::{set_state, speak_phrase, PipelineDeps, SharedState, SttLease, TtsLease};
use crate::state::ComponentStatus;
use crate::transport::{InboundEvent, OutboundEvent};
use vb_domain::audio::TranscriptEvent;

/// How long an STT push may block before the frame is dropped from the
/// head. Voice quality over completeness.
const STT_PUSH_BUDGET: Duration = Duration::from_millis(500);

/// Parameters fixed at session creation.
pub struct SessionParams {
    pub session_id: String,
    pub transport_kind: TransportKind,
    pub participant: Option<String>,
    /// The session's pinned sample rate; frames at any other rate are a
    /// protocol violation.
    pub sample_rate: u32,
}

/// Drive one session to completion.
///
/// Returns `Err(Error::Protocol)` when the remote violated the wire
/// contract (the transport closes with code 1002); other errors end the
/// session quietly. The final session record is always committed.
pub async fn run_session(
    deps: Arc<PipelineDeps>,
    params: SessionParams,
    inbound: mpsc::Receiver<InboundEvent>,
    outbound: mpsc::Sender<OutboundEvent>,
    hub: Arc<CancelHub>,
) -> Result<()> {
    let session_id = params.session_id.clone();

    let result = match deps.config.streaming.mode {
        StreamingMode::RealtimeVoice => {
            run_realtime(deps.clone(), params, inbound, outbound.clone(), hub.clone()).await
        }
        StreamingMode::Media | StreamingMode::Transcription => {
            run_transcription(deps.clone(), params, inbound, outbound.clone(), hub.clone()).await
        }
    };

    hub.cancel_all();
    if let Err(e) = deps
        .store
        .mutate(&session_id, |r| r.transition(SessionState::Ended))
        .await
    {
        tracing::debug!(session_id = %session_id, error = %e, "final session commit failed");
    }
    let _ = outbound.send(OutboundEvent::State(SessionState::Ended)).await;

    match &result {
        Ok(()) => tracing::info!(session_id = %session_id, "session ended"),
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "session ended with error");
            if matches!(e, Error::Internal(_)) {
                deps.health.set("sessions", ComponentStatus::Degraded);
            }
        }
    }
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcription pipeline (media / browser)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_transcription(
    deps: Arc<PipelineDeps>,
    params: SessionParams,
    mut inbound: mpsc::Receiver<InboundEvent>,
    outbound: mpsc::Sender<OutboundEvent>,
    hub: Arc<CancelHub>,
) -> Result<()> {
    let session_id = params.session_id.clone();
    let pipeline = &deps.config.pipeline;

    adopt_or_create_record(&deps, &params, &hub).await?;
    let shared: SharedState = Arc::new(Mutex::new(SessionState::Greeting));
    let _ = outbound
        .send(OutboundEvent::State(SessionState::Greeting))
        .await;

    // Cross-worker barge-in: watch the store for epoch bumps from other
    // ingress nodes.
    let epoch_watch = {
        let mut events = deps.store.subscribe(&session_id);
        let hub = hub.clone();
        let root = hub.root();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = root.cancelled() => return,
                    event = events.recv() => match event {
                        Ok(CacheEvent::EpochBumped { epoch }) => hub.observe_epoch(epoch),
                        Ok(_) => {}
                        Err(_) => return,
                    },
                }
            }
        })
    };

    // Leases held for the session's life. The TTS lease is shared with
    // the router through a mutex so the conductor can speak the greeting
    // and goodbye; phrase playback and turn synthesis never overlap.
    let tts: Arc<tokio::sync::Mutex<TtsLease>> =
        Arc::new(tokio::sync::Mutex::new(deps.tts.acquire(&session_id).await?));
    let mut stt: Option<SttLease> = Some(deps.stt.acquire(&session_id).await?);

    // Greeting: synthetic agent speech before the first user turn.
    {
        let voice = deps.registry.greeter().voice_profile.clone();
        let mut guard = tts.lock().await;
        if let Err(e) = speak_phrase(
            &mut guard,
            &voice,
            &deps.config.phrases.greeting,
            &outbound,
            hub.root().child_token(),
        )
        .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "greeting synthesis failed");
        }
    }

    set_state(
        &deps.store,
        &shared,
        &outbound,
        &session_id,
        SessionState::Listening,
    )
    .await?;

    let stream = stt
        .as_mut()
        .expect("stt lease held")
        .start(params.sample_rate)
        .await?;
    let mut stt_frames = Some(stream.frames);
    let mut stt_events = stream.events;

    let queue = Arc::new(TurnQueue::new());
    let router_task = tokio::spawn(
        TurnRouter {
            deps: deps.clone(),
            session_id: session_id.clone(),
            shared: shared.clone(),
            outbound: outbound.clone(),
            hub: hub.clone(),
            queue: queue.clone(),
        }
        .run(tts.clone()),
    );

    // ── Main loop ───────────────────────────────────────────────────
    let root = hub.root();
    let silence_timeout = Duration::from_secs(pipeline.silence_timeout_secs);
    let silence = tokio::time::sleep(silence_timeout);
    tokio::pin!(silence);

    let stability_threshold = pipeline.barge_in_stability_threshold;
    let min_audio_ms = pipeline.barge_in_min_audio_ms;

    // (wall clock, offset_ms) of the first above-threshold partial in the
    // current speech burst.
    let mut barge_start: Option<(Instant, u64)> = None;
    let mut stt_strikes: u32 = 0;
    let mut dropped_frames: u64 = 0;
    let mut goodbye_on_end = false;
    let mut protocol_violation: Option<Error> = None;

    loop {
        tokio::select! {
            () = root.cancelled() => break,

            () = &mut silence => {
                if *shared.lock() == SessionState::Listening {
                    tracing::info!(session_id = %session_id, "silence timeout in Listening");
                    goodbye_on_end = true;
                    break;
                }
                silence.as_mut().reset(Instant::now() + silence_timeout);
            }

            event = inbound.recv() => match event {
                None | Some(InboundEvent::Hangup) => break,

                Some(InboundEvent::Audio(frame)) => {
                    if frame.sample_rate() != params.sample_rate {
                        protocol_violation = Some(Error::Protocol(format!(
                            "audio at {} Hz on a session pinned to {} Hz",
                            frame.sample_rate(),
                            params.sample_rate
                        )));
                        break;
                    }
                    if let Some(frames_tx) = &stt_frames {
                        match tokio::time::timeout(STT_PUSH_BUDGET, frames_tx.send(frame)).await {
                            Ok(Ok(())) => {}
                            // Stream gone; the events side notices and recovers.
                            Ok(Err(_)) => {}
                            Err(_) => {
                                dropped_frames += 1;
                                if dropped_frames == 1 || dropped_frames % 100 == 0 {
                                    tracing::warn!(
                                        session_id = %session_id,
                                        dropped = dropped_frames,
                                        "recognizer backpressure, dropping inbound audio"
                                    );
                                }
                            }
                        }
                    }
                }

                Some(InboundEvent::Text(text)) => {
                    silence.as_mut().reset(Instant::now() + silence_timeout);
                    let _ = outbound.send(OutboundEvent::Transcript {
                        role: "user",
                        text: text.clone(),
                        is_final: true,
                    }).await;
                    queue.push(text);
                }

                Some(InboundEvent::Interrupt) => {
                    barge_in(&deps, &hub, &session_id, &shared, &outbound).await;
                }

                Some(InboundEvent::Reset) => {
                    tracing::info!(session_id = %session_id, "conversation reset");
                    queue.clear();
                    barge_in(&deps, &hub, &session_id, &shared, &outbound).await;
                }
            },

            event = stt_events.recv() => match event {
                Some(Ok(TranscriptEvent::Partial { text, stability, offset_ms })) => {
                    silence.as_mut().reset(Instant::now() + silence_timeout);
                    let _ = deps.store.touch(&session_id).await;
                    let _ = outbound.send(OutboundEvent::Transcript {
                        role: "user",
                        text,
                        is_final: false,
                    }).await;

                    let state = *shared.lock();
                    let interruptible =
                        matches!(state, SessionState::Thinking | SessionState::Speaking);
                    if interruptible && stability >= stability_threshold {
                        let now = Instant::now();
                        match barge_start {
                            None => barge_start = Some((now, offset_ms)),
                            Some((first_wall, first_offset)) => {
                                let sustained_ms = offset_ms
                                    .saturating_sub(first_offset)
                                    .max(now.duration_since(first_wall).as_millis() as u64);
                                if sustained_ms >= min_audio_ms {
                                    barge_start = None;
                                    barge_in(&deps, &hub, &session_id, &shared, &outbound).await;
                                }
                            }
                        }
                    } else if !interruptible {
                        barge_start = None;
                    }
                }

                Some(Ok(TranscriptEvent::Final { text, .. })) => {
                    silence.as_mut().reset(Instant::now() + silence_timeout);
                    barge_start = None;
                    stt_strikes = 0;
                    if !text.trim().is_empty() {
                        let _ = outbound.send(OutboundEvent::Transcript {
                            role: "user",
                            text: text.clone(),
                            is_final: true,
                        }).await;
                        queue.push(text);
                    }
                }

                Some(Err(e)) => {
                    // Recognizer failed: discard the handle, dial a fresh
                    // one. Three in a row end the call.
                    stt_strikes += 1;
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        strikes = stt_strikes,
                        "recognizer failure"
                    );
                    if stt_strikes >= pipeline.max_consecutive_failures {
                        goodbye_on_end = true;
                        break;
                    }
                    match restart_recognizer(&deps, &session_id, &mut stt, params.sample_rate).await {
                        Some(stream) => {
                            stt_frames = Some(stream.frames);
                            stt_events = stream.events;
                        }
                        None => {
                            goodbye_on_end = true;
                            break;
                        }
                    }
                }

                None => {
                    // Stream closed unannounced; treat like a failure.
                    stt_strikes += 1;
                    tracing::warn!(
                        session_id = %session_id,
                        strikes = stt_strikes,
                        "recognizer stream closed"
                    );
                    if stt_strikes >= pipeline.max_consecutive_failures {
                        goodbye_on_end = true;
                        break;
                    }
                    match restart_recognizer(&deps, &session_id, &mut stt, params.sample_rate).await {
                        Some(stream) => {
                            stt_frames = Some(stream.frames);
                            stt_events = stream.events;
                        }
                        None => {
                            goodbye_on_end = true;
                            break;
                        }
                    }
                }
            },
        }
    }

    // ── Teardown: inbound first, then STT, then outbound ────────────
    drop(inbound);
    drop(stt_frames.take());

    if goodbye_on_end && !root.is_cancelled() {
        hub.barge_in();
        let voice = deps.registry.greeter().voice_profile.clone();
        let mut guard = tts.lock().await;
        if let Err(e) = speak_phrase(
            &mut guard,
            &voice,
            &deps.config.phrases.goodbye,
            &outbound,
            root.child_token(),
        )
        .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "goodbye synthesis failed");
        }
    }

    hub.cancel_all();
    queue.clear();
    let _ = router_task.await;
    epoch_watch.abort();

    if stt_strikes > 0 {
        if let Some(lease) = stt.take() {
            lease.discard();
        }
    }
    drop(stt);
    drop(tts);

    match protocol_violation {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Realtime voice pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// End-to-end speech model: no STT/TTS pools, no orchestrator. The mode
/// is pinned at session creation; there is no switching mid-call.
async fn run_realtime(
    deps: Arc<PipelineDeps>,
    params: SessionParams,
    mut inbound: mpsc::Receiver<InboundEvent>,
    outbound: mpsc::Sender<OutboundEvent>,
    hub: Arc<CancelHub>,
) -> Result<()> {
    let session_id = params.session_id.clone();
    let client = deps
        .realtime
        .clone()
        .ok_or_else(|| Error::Config("realtime_voice mode without a realtime client".into()))?;

    adopt_or_create_record(&deps, &params, &hub).await?;
    let shared: SharedState = Arc::new(Mutex::new(SessionState::Greeting));
    let _ = outbound
        .send(OutboundEvent::State(SessionState::Greeting))
        .await;

    let cancel = hub.root().child_token();
    let mut stream = client
        .open(&session_id, params.sample_rate, cancel.clone())
        .await?;

    set_state(
        &deps.store,
        &shared,
        &outbound,
        &session_id,
        SessionState::Listening,
    )
    .await?;

    let root = hub.root();
    loop {
        tokio::select! {
            () = root.cancelled() => break,

            event = inbound.recv() => match event {
                None | Some(InboundEvent::Hangup) => break,
                Some(InboundEvent::Audio(frame)) => {
                    if frame.sample_rate() != params.sample_rate {
                        return Err(Error::Protocol(format!(
                            "audio at {} Hz on a session pinned to {} Hz",
                            frame.sample_rate(),
                            params.sample_rate
                        )));
                    }
                    if tokio::time::timeout(STT_PUSH_BUDGET, stream.audio_in.send(frame))
                        .await
                        .is_err()
                    {
                        tracing::warn!(session_id = %session_id, "realtime backpressure, dropping frame");
                    }
                }
                // The speech model handles interruption natively.
                Some(other) => {
                    tracing::debug!(session_id = %session_id, event = ?other, "ignored in realtime mode");
                }
            },

            frame = stream.audio_out.recv() => match frame {
                Some(frame) => {
                    if outbound.send(OutboundEvent::Audio(frame)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            transcript = stream.transcripts.recv() => {
                if let Some(event) = transcript {
                    let _ = deps.store.touch(&session_id).await;
                    let _ = outbound.send(OutboundEvent::Transcript {
                        role: "user",
                        text: event.text().to_owned(),
                        is_final: event.is_final(),
                    }).await;
                }
            }
        }
    }

    cancel.cancel();
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Discard the errored recognizer handle and dial a fresh one.
async fn restart_recognizer(
    deps: &Arc<PipelineDeps>,
    session_id: &str,
    stt: &mut Option<SttLease>,
    sample_rate: u32,
) -> Option<vb_clients::RecognizerStream> {
    if let Some(old) = stt.take() {
        old.discard();
    }
    let mut fresh = match deps.stt.acquire(session_id).await {
        Ok(lease) => lease,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "recognizer re-acquire failed");
            return None;
        }
    };
    match fresh.start(sample_rate).await {
        Ok(stream) => {
            *stt = Some(fresh);
            Some(stream)
        }
        Err(e) => {
            tracing::warn!(session_id, error = %e, "recognizer restart failed");
            fresh.discard();
            None
        }
    }
}

/// Create the session record, or adopt one pre-created by call control
/// (outbound calls create the record before the media stream connects).
async fn adopt_or_create_record(
    deps: &PipelineDeps,
    params: &SessionParams,
    hub: &CancelHub,
) -> Result<()> {
    let mut record = SessionRecord::new(
        &params.session_id,
        params.transport_kind,
        deps.store.owner_id(),
    );
    record.participant = params.participant.clone();

    match deps.store.create(&record).await? {
        CreateOutcome::Created => Ok(()),
        CreateOutcome::AlreadyExists => {
            let existing = deps
                .store
                .load(&params.session_id)
                .await?
                .ok_or_else(|| Error::Internal("session record vanished at adoption".into()))?;
            if existing.owner_id != deps.store.owner_id() {
                return Err(Error::Internal(format!(
                    "session {} is owned by worker {}",
                    params.session_id, existing.owner_id
                )));
            }
            hub.sync_epoch(existing.cancel_epoch);
            Ok(())
        }
    }
}

/// Barge-in: bump the cancel epoch locally and in the store, cancel the
/// in-flight turn, tell the far end to drop buffered audio, and return
/// to Listening. Finalization of the user's new utterance still waits
/// for its final transcript.
async fn barge_in(
    deps: &PipelineDeps,
    hub: &CancelHub,
    session_id: &str,
    shared: &SharedState,
    outbound: &mpsc::Sender<OutboundEvent>,
) {
    let local_epoch = hub.barge_in();
    match deps.store.bump_cancel_epoch(session_id).await {
        Ok(store_epoch) => hub.sync_epoch(store_epoch.max(local_epoch)),
        Err(e) => {
            tracing::warn!(session_id, error = %e, "cancel epoch bump failed");
        }
    }

    let _ = outbound.send(OutboundEvent::ClearAudio).await;
    if let Err(e) = set_state(
        &deps.store,
        shared,
        outbound,
        session_id,
        SessionState::Listening,
    )
    .await
    {
        tracing::warn!(session_id, error = %e, "barge-in state transition failed");
    }
    tracing::info!(session_id, epoch = hub.epoch(), "barge-in");
}
