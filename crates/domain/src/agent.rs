//! Specialist agent specifications.
//!
//! Agents are registered from declarative config at process start and
//! immutable afterwards. Specialization is data, not subclassing: an
//! [`AgentSpec`] bundles a prompt, a tool list, escalation targets, and
//! a synthesis voice.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved tool name an agent calls to transfer the conversation.
pub const HANDOFF_TOOL: &str = "handoff_to";

/// Registry key of the default agent that greets callers and handles
/// anything no specialist claims.
pub const GREETER_AGENT: &str = "greeter";

/// Context key suffix an agent sets while it is mid-dialog (collecting
/// slots, awaiting confirmation) so routing keeps the turn with it.
pub const OWNS_DIALOG_KEY: &str = "owns_dialog";

/// One registered specialist agent. Immutable after registry construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub key: String,
    pub display_name: String,
    pub system_prompt: String,
    /// Names of registered tools this agent may call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Agent keys this agent may hand the conversation to.
    #[serde(default)]
    pub can_escalate_to: Vec<String>,
    /// Synthesis voice used for this agent's responses.
    pub voice_profile: String,
    /// Lowercase keyword hints backing `can_handle`.
    #[serde(default)]
    pub intents: Vec<String>,
}

impl AgentSpec {
    /// Whether this agent should keep the turn without re-classification.
    ///
    /// True when the agent flagged itself as mid-dialog in the session
    /// context, or when the utterance matches one of its intent keywords.
    pub fn can_handle(
        &self,
        user_text: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> bool {
        let dialog_key = format!("{}.{}", self.key, OWNS_DIALOG_KEY);
        if context
            .get(&dialog_key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return true;
        }

        let text = user_text.to_ascii_lowercase();
        self.intents.iter().any(|intent| text.contains(intent))
    }

    /// Whether a handoff to `target` is permitted.
    pub fn may_escalate_to(&self, target: &str) -> bool {
        self.can_escalate_to.iter().any(|k| k == target)
    }
}
