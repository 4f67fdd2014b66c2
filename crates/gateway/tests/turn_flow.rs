//! End-to-end pipeline tests with scripted upstream clients.
//!
//! The conductor, router, and orchestrator run exactly as in production;
//! only the STT/TTS/LLM clients are scripted fakes driven by the tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vb_clients::{
    ChatClient, ChatRequest, ClientFactory, ClientPool, Recognizer, RecognizerStream,
    SynthesisStream, Synthesizer,
};
use vb_domain::audio::{frame_bytes, AudioFrame, TranscriptEvent};
use vb_domain::config::{AgentConfig, Config, ToolBackend, ToolConfig};
use vb_domain::error::{Error, Result};
use vb_domain::stream::{BoxStream, ChatEvent};
use vb_gateway::runtime::cancel::CancelHub;
use vb_gateway::runtime::conductor::{run_session, SessionParams};
use vb_gateway::runtime::{AgentRegistry, PipelineDeps, ToolRegistry};
use vb_gateway::state::HealthRegistry;
use vb_gateway::transport::{InboundEvent, OutboundEvent};
use vb_sessions::{
    MemoryCache, SessionState, SessionStore, TerminalReason, TransportKind,
};

const SESSION_ID: &str = "test-session";
const WAIT: Duration = Duration::from_secs(5);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted recognizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type SttSlot = Arc<Mutex<Option<mpsc::Sender<Result<TranscriptEvent>>>>>;

struct ScriptedRecognizer {
    slot: SttSlot,
}

#[async_trait::async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn start(&mut self, _sample_rate: u32) -> Result<RecognizerStream> {
        let (events_tx, events_rx) = mpsc::channel(32);
        let (frames_tx, mut frames_rx) = mpsc::channel::<AudioFrame>(32);
        // Swallow pushed audio; the test injects transcript events directly.
        tokio::spawn(async move { while frames_rx.recv().await.is_some() {} });
        *self.slot.lock() = Some(events_tx);
        Ok(RecognizerStream {
            frames: frames_tx,
            events: events_rx,
        })
    }

    async fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

struct ScriptedSttFactory {
    slot: SttSlot,
}

#[async_trait::async_trait]
impl ClientFactory<Box<dyn Recognizer>> for ScriptedSttFactory {
    async fn connect(&self) -> Result<Box<dyn Recognizer>> {
        Ok(Box::new(ScriptedRecognizer {
            slot: self.slot.clone(),
        }))
    }
    fn service(&self) -> &str {
        "stt"
    }
}

/// Take the current recognition stream's event sender, waiting for the
/// conductor to (re)open one.
async fn take_stt(slot: &SttSlot) -> mpsc::Sender<Result<TranscriptEvent>> {
    for _ in 0..500 {
        if let Some(tx) = slot.lock().take() {
            return tx;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("recognizer never started");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fake synthesizer — two silent frames per text chunk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FakeSynthesizer;

#[async_trait::async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn open_stream(
        &mut self,
        _voice_profile: &str,
        cancel: CancellationToken,
    ) -> Result<SynthesisStream> {
        let (text_tx, mut text_rx) = mpsc::channel::<String>(32);
        let (frames_tx, frames_rx) = mpsc::channel(32);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    chunk = text_rx.recv() => match chunk {
                        Some(_) => {
                            for _ in 0..2 {
                                let frame =
                                    AudioFrame::new(vec![0u8; frame_bytes(16_000)], 16_000, 0);
                                tokio::select! {
                                    () = cancel.cancelled() => return,
                                    sent = frames_tx.send(frame) => {
                                        if sent.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                        None => return,
                    },
                }
            }
        });
        Ok(SynthesisStream {
            text: text_tx,
            frames: frames_rx,
        })
    }

    async fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

struct FakeTtsFactory;

#[async_trait::async_trait]
impl ClientFactory<Box<dyn Synthesizer>> for FakeTtsFactory {
    async fn connect(&self) -> Result<Box<dyn Synthesizer>> {
        Ok(Box::new(FakeSynthesizer))
    }
    fn service(&self) -> &str {
        "tts"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted chat client — one script entry per chat call, in order
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
enum Step {
    Token(&'static str),
    Delay(Duration),
    ToolCall {
        name: &'static str,
        arguments: serde_json::Value,
    },
}

struct ScriptedChat {
    scripts: Mutex<VecDeque<Vec<Step>>>,
}

#[async_trait::async_trait]
impl ChatClient for ScriptedChat {
    async fn chat_stream(
        &self,
        _req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<ChatEvent>>> {
        let steps = self.scripts.lock().pop_front().unwrap_or_default();
        let stream = async_stream::stream! {
            let mut call_seq = 0u32;
            let mut had_tool = false;
            for step in steps {
                match step {
                    Step::Token(text) => yield Ok(ChatEvent::Token { text: text.to_owned() }),
                    Step::Delay(duration) => tokio::time::sleep(duration).await,
                    Step::ToolCall { name, arguments } => {
                        call_seq += 1;
                        had_tool = true;
                        yield Ok(ChatEvent::ToolCallRequested {
                            call_id: format!("call_{call_seq}"),
                            tool_name: name.to_owned(),
                            arguments,
                        });
                    }
                }
            }
            let reason = if had_tool { "tool_calls" } else { "stop" };
            yield Ok(ChatEvent::Finished { reason: Some(reason.into()) });
        };
        Ok(Box::pin(stream))
    }

    fn client_id(&self) -> &str {
        "scripted"
    }
}

struct ScriptedChatFactory {
    chat: Arc<ScriptedChat>,
}

#[async_trait::async_trait]
impl ClientFactory<Arc<dyn ChatClient>> for ScriptedChatFactory {
    async fn connect(&self) -> Result<Arc<dyn ChatClient>> {
        Ok(self.chat.clone() as Arc<dyn ChatClient>)
    }
    fn service(&self) -> &str {
        "llm"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    deps: Arc<PipelineDeps>,
    slot: SttSlot,
    inbound: mpsc::Sender<InboundEvent>,
    outbound: mpsc::Receiver<OutboundEvent>,
    hub: Arc<CancelHub>,
    conductor: tokio::task::JoinHandle<Result<()>>,
}

async fn start_session(config: Config, scripts: Vec<Vec<Step>>) -> Harness {
    let config = Arc::new(config);
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(SessionStore::new(
        cache,
        "worker-test",
        Duration::from_secs(3600),
    ));

    let slot: SttSlot = Arc::new(Mutex::new(None));
    let stt = ClientPool::new(Arc::new(ScriptedSttFactory { slot: slot.clone() }), 4);
    let tts = ClientPool::new(Arc::new(FakeTtsFactory), 4);
    let chat = Arc::new(ScriptedChat {
        scripts: Mutex::new(scripts.into_iter().collect()),
    });
    let llm = ClientPool::new(Arc::new(ScriptedChatFactory { chat }), 4);

    let registry = Arc::new(AgentRegistry::from_config(&config));
    let tools = Arc::new(ToolRegistry::from_config(&config).expect("tool registry"));
    let health = Arc::new(HealthRegistry::new());

    let deps = Arc::new(PipelineDeps {
        config: config.clone(),
        store,
        stt,
        tts,
        llm,
        registry,
        tools,
        realtime: None,
        health,
    });

    let hub = Arc::new(CancelHub::new());
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (outbound_tx, outbound_rx) = mpsc::channel(256);

    let params = SessionParams {
        session_id: SESSION_ID.to_owned(),
        transport_kind: TransportKind::Browser,
        participant: None,
        sample_rate: 16_000,
    };
    let conductor = tokio::spawn(run_session(
        deps.clone(),
        params,
        inbound_rx,
        outbound_tx,
        hub.clone(),
    ));

    Harness {
        deps,
        slot,
        inbound: inbound_tx,
        outbound: outbound_rx,
        hub,
        conductor,
    }
}

/// Receive outbound events until one matches, skipping the rest.
async fn expect_event(
    rx: &mut mpsc::Receiver<OutboundEvent>,
    what: &str,
    pred: impl Fn(&OutboundEvent) -> bool,
) -> OutboundEvent {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timeout waiting for {what}"))
            .unwrap_or_else(|| panic!("outbound closed waiting for {what}"));
        if pred(&event) {
            return event;
        }
    }
}

async fn expect_state(rx: &mut mpsc::Receiver<OutboundEvent>, state: SessionState) {
    expect_event(rx, &format!("state {state}"), |e| {
        matches!(e, OutboundEvent::State(s) if *s == state)
    })
    .await;
}

async fn drain_greeting(h: &mut Harness) {
    expect_state(&mut h.outbound, SessionState::Greeting).await;
    expect_event(&mut h.outbound, "greeting audio", |e| {
        matches!(e, OutboundEvent::Audio(_))
    })
    .await;
    expect_state(&mut h.outbound, SessionState::Listening).await;
}

fn partial(text: &str, stability: f32, offset_ms: u64) -> Result<TranscriptEvent> {
    Ok(TranscriptEvent::Partial {
        text: text.to_owned(),
        stability,
        offset_ms,
    })
}

fn final_utterance(text: &str) -> Result<TranscriptEvent> {
    Ok(TranscriptEvent::Final {
        text: text.to_owned(),
        offset_ms: 0,
        duration_ms: 900,
    })
}

/// Poll until every pool lease has been returned. The orchestrator task
/// releases its LLM lease a beat after the conductor joins.
async fn wait_leases_released(deps: &PipelineDeps) {
    for _ in 0..500 {
        if deps.stt.leased() == 0 && deps.tts.leased() == 0 && deps.llm.leased() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "leases not released: stt={} tts={} llm={}",
        deps.stt.leased(),
        deps.tts.leased(),
        deps.llm.leased()
    );
}

/// Poll the store until the session's history reaches `len` turns.
async fn wait_for_history(deps: &PipelineDeps, len: usize) -> vb_sessions::SessionRecord {
    for _ in 0..500 {
        if let Ok(Some(record)) = deps.store.load(SESSION_ID).await {
            if record.history.len() >= len {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("history never reached {len} turns");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn greeting_then_question_and_answer() {
    let scripts = vec![vec![Step::Token("The weather is sunny.")]];
    let mut h = start_session(Config::default(), scripts).await;
    drain_greeting(&mut h).await;

    let stt = take_stt(&h.slot).await;
    stt.send(partial("what's the", 0.4, 120)).await.unwrap();
    expect_event(&mut h.outbound, "user partial", |e| {
        matches!(e, OutboundEvent::Transcript { role: "user", is_final: false, .. })
    })
    .await;

    stt.send(final_utterance("what's the weather")).await.unwrap();
    expect_event(&mut h.outbound, "user final", |e| {
        matches!(e, OutboundEvent::Transcript { role: "user", is_final: true, .. })
    })
    .await;

    expect_state(&mut h.outbound, SessionState::Thinking).await;
    expect_state(&mut h.outbound, SessionState::Speaking).await;
    expect_event(&mut h.outbound, "response audio", |e| {
        matches!(e, OutboundEvent::Audio(_))
    })
    .await;
    let assistant = expect_event(&mut h.outbound, "assistant transcript", |e| {
        matches!(e, OutboundEvent::Transcript { role: "assistant", is_final: true, .. })
    })
    .await;
    match assistant {
        OutboundEvent::Transcript { text, .. } => assert!(text.contains("sunny")),
        _ => unreachable!(),
    }
    expect_state(&mut h.outbound, SessionState::Listening).await;

    let record = wait_for_history(&h.deps, 1).await;
    assert_eq!(record.turn_index, 1);
    let turn = &record.history[0];
    assert_eq!(turn.terminal_reason, Some(TerminalReason::Completed));
    assert_eq!(turn.user_text, "what's the weather");
    // The chunk concatenation equals the final response text.
    assert_eq!(turn.response_text(), "The weather is sunny.");
    assert!(turn.ended_at.is_some());

    h.inbound.send(InboundEvent::Hangup).await.unwrap();
    let result = tokio::time::timeout(WAIT, h.conductor).await.unwrap().unwrap();
    assert!(result.is_ok());

    let record = h.deps.store.load(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(record.state, SessionState::Ended);
}

#[tokio::test]
async fn barge_in_interrupts_the_speaking_turn() {
    let scripts = vec![
        vec![
            Step::Token("Let me tell you "),
            Step::Delay(Duration::from_millis(100)),
            Step::Token("a very long story "),
            Step::Delay(Duration::from_secs(10)),
            Step::Token("that never finishes."),
        ],
        vec![Step::Token("The short version then.")],
    ];
    let mut h = start_session(Config::default(), scripts).await;
    drain_greeting(&mut h).await;

    let stt = take_stt(&h.slot).await;
    stt.send(final_utterance("tell me a story")).await.unwrap();
    expect_state(&mut h.outbound, SessionState::Speaking).await;
    expect_event(&mut h.outbound, "story audio", |e| {
        matches!(e, OutboundEvent::Audio(_))
    })
    .await;

    // The caller starts talking over the response: a stable partial
    // sustained past the minimum audio duration triggers barge-in.
    stt.send(partial("wait", 0.5, 0)).await.unwrap();
    stt.send(partial("wait stop", 0.5, 200)).await.unwrap();

    expect_event(&mut h.outbound, "clear audio", |e| {
        matches!(e, OutboundEvent::ClearAudio)
    })
    .await;
    expect_state(&mut h.outbound, SessionState::Listening).await;

    let record = wait_for_history(&h.deps, 1).await;
    assert_eq!(
        record.history[0].terminal_reason,
        Some(TerminalReason::BargedIn)
    );
    assert!(record.cancel_epoch >= 1);

    // The interrupting utterance finalizes into a fresh turn.
    stt.send(final_utterance("never mind, summarize")).await.unwrap();
    expect_state(&mut h.outbound, SessionState::Thinking).await;
    expect_state(&mut h.outbound, SessionState::Speaking).await;
    expect_state(&mut h.outbound, SessionState::Listening).await;

    let record = wait_for_history(&h.deps, 2).await;
    assert_eq!(
        record.history[1].terminal_reason,
        Some(TerminalReason::Completed)
    );

    h.inbound.send(InboundEvent::Hangup).await.unwrap();
    let _ = tokio::time::timeout(WAIT, h.conductor).await.unwrap();
}

#[tokio::test]
async fn tool_invocation_feeds_the_response() {
    let mut config = Config::default();
    config.agents.insert(
        "claims".into(),
        AgentConfig {
            display_name: "Claims".into(),
            system_prompt: "You handle insurance claims.".into(),
            intents: vec!["policy".into()],
            tools: vec!["lookup_policy".into()],
            can_escalate_to: vec![],
            voice_profile: "en-claims".into(),
        },
    );
    config.tools.insert(
        "lookup_policy".into(),
        ToolConfig {
            description: "Look up a policy by number".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "policy_number": { "type": "string" } },
                "required": ["policy_number"],
            }),
            backend: ToolBackend::Canned {
                response: r#"{"ok":true,"holder":"J. Doe"}"#.into(),
            },
            idempotent: true,
        },
    );

    let scripts = vec![
        // Intent classification picks the claims agent.
        vec![Step::Token("claims")],
        // The claims agent calls its tool...
        vec![Step::ToolCall {
            name: "lookup_policy",
            arguments: serde_json::json!({"policy_number": "A123"}),
        }],
        // ...and answers with the tool result.
        vec![Step::Token("The policy holder is J. Doe.")],
    ];
    let mut h = start_session(config, scripts).await;
    drain_greeting(&mut h).await;

    let stt = take_stt(&h.slot).await;
    stt.send(final_utterance("policy A123")).await.unwrap();

    let assistant = expect_event(&mut h.outbound, "assistant transcript", |e| {
        matches!(e, OutboundEvent::Transcript { role: "assistant", is_final: true, .. })
    })
    .await;
    match assistant {
        OutboundEvent::Transcript { text, .. } => assert!(text.contains("J. Doe")),
        _ => unreachable!(),
    }

    let record = wait_for_history(&h.deps, 1).await;
    assert_eq!(record.active_agent.as_deref(), Some("claims"));
    let turn = &record.history[0];
    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(turn.tool_calls[0].tool_name, "lookup_policy");
    assert!(turn.tool_calls[0].ok);
    assert_eq!(turn.tool_calls[0].arguments["policy_number"], "A123");

    h.inbound.send(InboundEvent::Hangup).await.unwrap();
    let _ = tokio::time::timeout(WAIT, h.conductor).await.unwrap();
}

#[tokio::test]
async fn handoff_transfers_the_active_agent() {
    let mut config = Config::default();
    config.agents.insert(
        "greeter".into(),
        AgentConfig {
            display_name: "Greeter".into(),
            system_prompt: "You greet and route callers.".into(),
            intents: vec![],
            tools: vec![],
            can_escalate_to: vec!["claims".into()],
            voice_profile: String::new(),
        },
    );
    config.agents.insert(
        "claims".into(),
        AgentConfig {
            display_name: "Claims".into(),
            system_prompt: "You handle insurance claims.".into(),
            intents: vec!["claim".into()],
            tools: vec![],
            can_escalate_to: vec![],
            voice_profile: String::new(),
        },
    );

    let scripts = vec![
        // Classification keeps the greeter for the first exchange.
        vec![Step::Token("greeter")],
        // The greeter hands the caller to claims.
        vec![Step::ToolCall {
            name: "handoff_to",
            arguments: serde_json::json!({"agent": "claims"}),
        }],
        // Claims serves the same utterance.
        vec![Step::Token("I can help you file that claim.")],
    ];
    let mut h = start_session(config, scripts).await;
    drain_greeting(&mut h).await;

    let stt = take_stt(&h.slot).await;
    stt.send(final_utterance("I need to file a claim")).await.unwrap();

    let agent_event = expect_event(&mut h.outbound, "agent change", |e| {
        matches!(e, OutboundEvent::Agent { .. })
    })
    .await;
    match agent_event {
        OutboundEvent::Agent { key } => assert_eq!(key, "claims"),
        _ => unreachable!(),
    }

    let assistant = expect_event(&mut h.outbound, "assistant transcript", |e| {
        matches!(e, OutboundEvent::Transcript { role: "assistant", is_final: true, .. })
    })
    .await;
    match assistant {
        OutboundEvent::Transcript { text, .. } => assert!(text.contains("claim")),
        _ => unreachable!(),
    }

    let record = wait_for_history(&h.deps, 1).await;
    assert_eq!(record.active_agent.as_deref(), Some("claims"));
    assert_eq!(
        record.history[0].terminal_reason,
        Some(TerminalReason::Completed)
    );

    h.inbound.send(InboundEvent::Hangup).await.unwrap();
    let _ = tokio::time::timeout(WAIT, h.conductor).await.unwrap();
}

#[tokio::test]
async fn hangup_during_speaking_tears_down_quickly() {
    let scripts = vec![vec![
        Step::Token("This response "),
        Step::Delay(Duration::from_secs(30)),
        Step::Token("takes forever."),
    ]];
    let mut h = start_session(Config::default(), scripts).await;
    drain_greeting(&mut h).await;

    let stt = take_stt(&h.slot).await;
    stt.send(final_utterance("go on then")).await.unwrap();
    expect_state(&mut h.outbound, SessionState::Speaking).await;

    h.inbound.send(InboundEvent::Hangup).await.unwrap();
    let result = tokio::time::timeout(Duration::from_millis(500), h.conductor)
        .await
        .expect("session must end within 500ms of hang-up")
        .unwrap();
    assert!(result.is_ok());

    // All leases returned.
    wait_leases_released(&h.deps).await;

    let record = h.deps.store.load(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(record.state, SessionState::Ended);
}

#[tokio::test]
async fn repeated_recognizer_failures_end_the_call() {
    let mut h = start_session(Config::default(), vec![]).await;
    drain_greeting(&mut h).await;

    for _ in 0..3 {
        let stt = take_stt(&h.slot).await;
        stt.send(Err(Error::upstream("stt", "socket reset")))
            .await
            .unwrap();
    }

    // The third strike speaks the goodbye phrase and ends the session.
    expect_event(&mut h.outbound, "goodbye audio", |e| {
        matches!(e, OutboundEvent::Audio(_))
    })
    .await;
    expect_state(&mut h.outbound, SessionState::Ended).await;

    let result = tokio::time::timeout(WAIT, h.conductor).await.unwrap().unwrap();
    assert!(result.is_ok());
    wait_leases_released(&h.deps).await;

    let record = h.deps.store.load(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(record.state, SessionState::Ended);
}

#[tokio::test]
async fn silence_in_listening_ends_with_goodbye() {
    let mut config = Config::default();
    config.pipeline.silence_timeout_secs = 1;

    let mut h = start_session(config, vec![]).await;
    drain_greeting(&mut h).await;
    let _stt = take_stt(&h.slot).await;

    expect_event(&mut h.outbound, "goodbye audio", |e| {
        matches!(e, OutboundEvent::Audio(_))
    })
    .await;
    expect_state(&mut h.outbound, SessionState::Ended).await;

    let result = tokio::time::timeout(WAIT, h.conductor).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn typed_text_is_served_like_a_final_transcript() {
    let scripts = vec![vec![Step::Token("Typed and answered.")]];
    let mut h = start_session(Config::default(), scripts).await;
    drain_greeting(&mut h).await;
    let _stt = take_stt(&h.slot).await;

    h.inbound
        .send(InboundEvent::Text("hello in writing".into()))
        .await
        .unwrap();

    expect_state(&mut h.outbound, SessionState::Thinking).await;
    expect_state(&mut h.outbound, SessionState::Speaking).await;
    expect_state(&mut h.outbound, SessionState::Listening).await;

    let record = wait_for_history(&h.deps, 1).await;
    assert_eq!(record.history[0].user_text, "hello in writing");

    h.inbound.send(InboundEvent::Hangup).await.unwrap();
    let _ = tokio::time::timeout(WAIT, h.conductor).await.unwrap();
}

#[tokio::test]
async fn hub_cancel_ends_the_session_like_a_remote_hangup() {
    let mut h = start_session(Config::default(), vec![]).await;
    drain_greeting(&mut h).await;
    let _stt = take_stt(&h.slot).await;

    // What POST /call/hangup does through the active-session registry.
    h.hub.cancel_all();

    let result = tokio::time::timeout(WAIT, h.conductor).await.unwrap().unwrap();
    assert!(result.is_ok());

    let record = h.deps.store.load(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(record.state, SessionState::Ended);
}
