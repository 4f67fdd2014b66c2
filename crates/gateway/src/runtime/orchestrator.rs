//! Agent registry and turn orchestrator.
//!
//! The registry maps agent keys to immutable specs built from config at
//! process start. [`run_turn`] serves one finalized user turn: pick the
//! agent, stream the LLM response as text chunks, execute tool calls with
//! the per-tool wall clock, follow at most one handoff, and finish with
//! the accumulated text (or the configured fallback phrase when the model
//! produced nothing).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vb_clients::{ChatClient, ChatRequest, IntentClassifier};
use vb_domain::agent::{AgentSpec, GREETER_AGENT, HANDOFF_TOOL};
use vb_domain::config::Config;
use vb_domain::error::Result;
use vb_domain::stream::{ChatEvent, OrchestratorEvent};
use vb_domain::tool::{Message, ToolCall};
use vb_sessions::SessionRecord;

use super::PipelineDeps;

/// Tool-call loops per turn before the orchestrator force-stops.
const MAX_TOOL_LOOPS: usize = 5;

/// Handoffs per turn.
const MAX_HANDOFFS: usize = 1;

/// Orchestrator event channel depth.
const EVENT_DEPTH: usize = 32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const DEFAULT_GREETER_PROMPT: &str = "You are a friendly voice assistant answering a phone call. \
     Keep responses short and conversational; the caller hears them spoken aloud. \
     Never mention tools, systems, or technical detail.";

/// Immutable map of registered specialist agents.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentSpec>>,
}

impl AgentRegistry {
    /// Build the registry from config. A default greeter is synthesized
    /// when none is configured, able to escalate to every specialist.
    pub fn from_config(config: &Config) -> Self {
        let mut agents: HashMap<String, Arc<AgentSpec>> = config
            .agents
            .iter()
            .map(|(key, cfg)| {
                (
                    key.clone(),
                    Arc::new(cfg.to_spec(key, &config.tts.default_voice)),
                )
            })
            .collect();

        if !agents.contains_key(GREETER_AGENT) {
            let mut targets: Vec<String> = agents.keys().cloned().collect();
            targets.sort();
            agents.insert(
                GREETER_AGENT.to_owned(),
                Arc::new(AgentSpec {
                    key: GREETER_AGENT.to_owned(),
                    display_name: "Greeter".to_owned(),
                    system_prompt: DEFAULT_GREETER_PROMPT.to_owned(),
                    tools: Vec::new(),
                    can_escalate_to: targets,
                    voice_profile: config.tts.default_voice.clone(),
                    intents: Vec::new(),
                }),
            );
        }

        Self { agents }
    }

    pub fn get(&self, key: &str) -> Option<Arc<AgentSpec>> {
        self.agents.get(key).cloned()
    }

    /// The default agent. The registry always contains it.
    pub fn greeter(&self) -> Arc<AgentSpec> {
        self.agents
            .get(GREETER_AGENT)
            .cloned()
            .expect("registry always contains the greeter")
    }

    /// `(key, display_name)` pairs, sorted by key, for the classifier
    /// prompt and the `/agents` endpoint.
    pub fn listing(&self) -> Vec<(String, String)> {
        let mut listing: Vec<(String, String)> = self
            .agents
            .values()
            .map(|a| (a.key.clone(), a.display_name.clone()))
            .collect();
        listing.sort();
        listing
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — the orchestrator entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serve one turn, streaming [`OrchestratorEvent`]s to the receiver.
///
/// The channel closing without a `Done` means the turn failed (unless it
/// was cancelled); the router applies the fallback policy. Cancellation
/// stops the stream, any in-flight tool, and all further events.
pub fn run_turn(
    deps: Arc<PipelineDeps>,
    record: SessionRecord,
    user_text: String,
    cancel: CancellationToken,
) -> mpsc::Receiver<OrchestratorEvent> {
    let (tx, rx) = mpsc::channel::<OrchestratorEvent>(EVENT_DEPTH);

    let turn_span = tracing::info_span!(
        "turn",
        session_id = %record.session_id,
        turn_index = record.turn_index,
    );
    tokio::spawn(tracing::Instrument::instrument(
        async move {
            tracing::debug!("turn started");
            if let Err(e) = run_turn_inner(deps, record, user_text, cancel, tx).await {
                // The closed channel without a Done is the failure signal;
                // the router speaks the fallback phrase.
                tracing::warn!(error = %e, "turn aborted");
            }
        },
        turn_span,
    ));

    rx
}

async fn run_turn_inner(
    deps: Arc<PipelineDeps>,
    mut record: SessionRecord,
    user_text: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<OrchestratorEvent>,
) -> Result<()> {
    let llm = deps.llm.acquire(&record.session_id).await?;
    let chat: Arc<dyn ChatClient> = (*llm).clone();

    let mut agent = select_agent(&deps, &chat, &record, &user_text).await;
    record = persist_active_agent(&deps, record, &agent.key).await?;

    let fallback = deps.config.phrases.fallback.clone();
    let tool_timeout = Duration::from_millis(deps.config.pipeline.tool_timeout_ms);
    let window = deps.config.pipeline.history_window_turns;

    let mut handoffs = 0usize;

    'agent_loop: loop {
        let tool_defs = deps.tools.definitions_for(&agent);
        let mut messages = compose_messages(&agent, &record, &user_text, window);
        let mut accumulated = String::new();

        for _ in 0..MAX_TOOL_LOOPS {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let req = ChatRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                temperature: Some(0.3),
                max_tokens: None,
                model: None,
            };
            let mut stream = chat.chat_stream(&req).await?;

            // Text of this model call only; tool results are threaded back
            // into the same conversation.
            let mut segment = String::new();
            let mut pending: Vec<ToolCall> = Vec::new();

            loop {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    event = stream.next() => match event {
                        Some(Ok(ChatEvent::Token { text })) => {
                            segment.push_str(&text);
                            accumulated.push_str(&text);
                            if tx.send(OrchestratorEvent::TextChunk { text }).await.is_err() {
                                return Ok(());
                            }
                        }
                        Some(Ok(ChatEvent::ToolCallRequested { call_id, tool_name, arguments })) => {
                            pending.push(ToolCall { call_id, tool_name, arguments });
                        }
                        Some(Ok(ChatEvent::Finished { .. })) | None => break,
                        Some(Err(e)) => return Err(e),
                    },
                }
            }

            // No tool calls: this is the final answer.
            if pending.is_empty() {
                let final_text = if accumulated.trim().is_empty() {
                    if tx
                        .send(OrchestratorEvent::TextChunk {
                            text: fallback.clone(),
                        })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                    fallback.clone()
                } else {
                    accumulated.clone()
                };
                let _ = tx.send(OrchestratorEvent::Done { final_text }).await;
                return Ok(());
            }

            // Handoff wins over ordinary tools: on success the remaining
            // calls are moot because the new agent restarts the turn.
            if let Some(pos) = pending.iter().position(|tc| tc.tool_name == HANDOFF_TOOL) {
                let tc = pending.remove(pos);
                let target = tc
                    .arguments
                    .get("agent")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned();

                let permitted = handoffs < MAX_HANDOFFS && agent.may_escalate_to(&target);
                match deps.registry.get(&target) {
                    Some(next) if permitted => {
                        handoffs += 1;
                        record = persist_active_agent(&deps, record, &next.key).await?;
                        if tx
                            .send(OrchestratorEvent::Handoff {
                                to_agent: next.key.clone(),
                            })
                            .await
                            .is_err()
                        {
                            return Ok(());
                        }
                        tracing::info!(from = %agent.key, to = %next.key, "agent handoff");
                        agent = next;
                        continue 'agent_loop;
                    }
                    _ => {
                        tracing::warn!(target = %target, handoffs, "handoff refused");
                        messages.push(Message::assistant_with_tool_calls(&segment, &[tc.clone()]));
                        messages.push(Message::tool_result(
                            &tc.call_id,
                            format!("handoff refused: \"{target}\" is not an allowed target"),
                        ));
                        continue;
                    }
                }
            }

            // Ordinary tool dispatch.
            messages.push(Message::assistant_with_tool_calls(&segment, &pending));
            for tc in &pending {
                if cancel.is_cancelled() {
                    return Ok(());
                }

                if tx
                    .send(OrchestratorEvent::ToolInvoked {
                        tool_name: tc.tool_name.clone(),
                        arguments: tc.arguments.clone(),
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }

                // A tool outside the agent's list is a model error; the
                // model gets told and the turn continues.
                let (content, is_error) = if agent.tools.iter().any(|t| t == &tc.tool_name) {
                    deps.tools
                        .dispatch(&tc.tool_name, &tc.arguments, &record, tool_timeout, &cancel)
                        .await
                } else {
                    (
                        format!("tool \"{}\" is not available", tc.tool_name),
                        true,
                    )
                };

                if tx
                    .send(OrchestratorEvent::ToolResult {
                        tool_name: tc.tool_name.clone(),
                        ok: !is_error,
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                messages.push(Message::tool_result(&tc.call_id, content));
            }
        }

        // Tool loop limit reached: close the turn with whatever we have.
        tracing::warn!(
            session_id = %record.session_id,
            limit = MAX_TOOL_LOOPS,
            "tool loop limit reached"
        );
        let final_text = if accumulated.trim().is_empty() {
            let _ = tx
                .send(OrchestratorEvent::TextChunk {
                    text: fallback.clone(),
                })
                .await;
            fallback
        } else {
            accumulated
        };
        let _ = tx.send(OrchestratorEvent::Done { final_text }).await;
        return Ok(());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pick the serving agent: keep the active one when it claims the
/// utterance, otherwise ask the intent classifier, otherwise greeter.
async fn select_agent(
    deps: &PipelineDeps,
    chat: &Arc<dyn ChatClient>,
    record: &SessionRecord,
    user_text: &str,
) -> Arc<AgentSpec> {
    if let Some(key) = &record.active_agent {
        if let Some(spec) = deps.registry.get(key) {
            if spec.can_handle(user_text, &record.context) {
                return spec;
            }
        }
    }

    let listing = deps.registry.listing();
    if listing.len() <= 1 {
        return deps.registry.greeter();
    }

    let classifier =
        IntentClassifier::new(chat.clone(), deps.config.llm.classifier_model.clone());
    match classifier.classify(user_text, &listing).await {
        Ok(Some(key)) => deps
            .registry
            .get(&key)
            .unwrap_or_else(|| deps.registry.greeter()),
        Ok(None) => deps.registry.greeter(),
        Err(e) => {
            tracing::warn!(error = %e, "intent classification failed, using greeter");
            deps.registry.greeter()
        }
    }
}

async fn persist_active_agent(
    deps: &PipelineDeps,
    record: SessionRecord,
    key: &str,
) -> Result<SessionRecord> {
    if record.active_agent.as_deref() == Some(key) {
        return Ok(record);
    }
    let key = key.to_owned();
    deps.store
        .mutate(&record.session_id, move |r| {
            r.active_agent = Some(key.clone());
            Ok(())
        })
        .await
}

/// System prompt + the last N turns + the new user message.
fn compose_messages(
    agent: &AgentSpec,
    record: &SessionRecord,
    user_text: &str,
    window: usize,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(window * 2 + 2);
    messages.push(Message::system(&agent.system_prompt));

    for turn in record.recent_turns(window) {
        messages.push(Message::user(&turn.user_text));
        let response = turn.response_text();
        if !response.is_empty() {
            messages.push(Message::assistant(response));
        }
    }

    messages.push(Message::user(user_text));
    messages
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use vb_domain::config::AgentConfig;
    use vb_sessions::{TerminalReason, TransportKind, TurnRecord};

    fn config_with_claims() -> Config {
        let mut config = Config::default();
        config.agents.insert(
            "claims".into(),
            AgentConfig {
                display_name: "Claims".into(),
                system_prompt: "You handle claims.".into(),
                intents: vec!["claim".into()],
                tools: vec![],
                can_escalate_to: vec![],
                voice_profile: "en-claims".into(),
            },
        );
        config
    }

    #[test]
    fn registry_synthesizes_a_greeter() {
        let registry = AgentRegistry::from_config(&config_with_claims());
        assert_eq!(registry.len(), 2);

        let greeter = registry.greeter();
        assert_eq!(greeter.key, GREETER_AGENT);
        assert_eq!(greeter.can_escalate_to, vec!["claims".to_string()]);
        assert_eq!(greeter.voice_profile, "en-neutral");
    }

    #[test]
    fn configured_greeter_is_kept() {
        let mut config = config_with_claims();
        config.agents.insert(
            GREETER_AGENT.into(),
            AgentConfig {
                display_name: "Front Desk".into(),
                system_prompt: "custom".into(),
                intents: vec![],
                tools: vec![],
                can_escalate_to: vec!["claims".into()],
                voice_profile: String::new(),
            },
        );
        let registry = AgentRegistry::from_config(&config);
        assert_eq!(registry.greeter().display_name, "Front Desk");
    }

    #[test]
    fn listing_is_sorted() {
        let registry = AgentRegistry::from_config(&config_with_claims());
        let listing = registry.listing();
        assert_eq!(listing[0].0, "claims");
        assert_eq!(listing[1].0, "greeter");
    }

    #[test]
    fn compose_messages_windows_history() {
        let registry = AgentRegistry::from_config(&Config::default());
        let agent = registry.greeter();

        let mut record = SessionRecord::new("s1", TransportKind::Browser, "w");
        for i in 0..4 {
            let mut turn = TurnRecord::open(i, format!("question {i}"), 0);
            turn.push_chunk(format!("answer {i}"));
            turn.finish(TerminalReason::Completed);
            record.append_turn(turn, 8).unwrap();
        }

        let messages = compose_messages(&agent, &record, "newest question", 2);
        // system + 2 windowed turns (user+assistant each) + new user message
        assert_eq!(messages.len(), 1 + 4 + 1);
        assert_eq!(messages[1].content.extract_all_text(), "question 2");
        assert_eq!(
            messages.last().unwrap().content.extract_all_text(),
            "newest question"
        );
    }
}
