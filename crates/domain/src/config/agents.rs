use serde::{Deserialize, Serialize};

use crate::agent::AgentSpec;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Specialist agent definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declarative configuration for one specialist agent (key = registry key).
///
/// New agents register via config, not code: a prompt, a tool allowlist,
/// escalation targets, and a voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub display_name: String,
    pub system_prompt: String,
    /// Lowercase keyword hints for routing without a classifier call.
    #[serde(default)]
    pub intents: Vec<String>,
    /// Names of registered tools this agent may call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Agent keys this agent may hand the conversation to.
    #[serde(default)]
    pub can_escalate_to: Vec<String>,
    /// Synthesis voice; falls back to `tts.default_voice` when empty.
    #[serde(default)]
    pub voice_profile: String,
}

impl AgentConfig {
    /// Materialize the immutable spec for the registry.
    pub fn to_spec(&self, key: &str, default_voice: &str) -> AgentSpec {
        AgentSpec {
            key: key.to_owned(),
            display_name: self.display_name.clone(),
            system_prompt: self.system_prompt.clone(),
            tools: self.tools.clone(),
            can_escalate_to: self.can_escalate_to.clone(),
            voice_profile: if self.voice_profile.is_empty() {
                default_voice.to_owned()
            } else {
                self.voice_profile.clone()
            },
            intents: self.intents.iter().map(|i| i.to_ascii_lowercase()).collect(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a configured tool is executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolBackend {
    /// POST the arguments as JSON to an HTTP endpoint; the response body
    /// is the tool result.
    Http { url: String },
    /// Fixed response template. `{name}` placeholders are filled from the
    /// arguments object.
    Canned { response: String },
}

/// Declarative configuration for one tool (key = tool name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub description: String,
    /// JSON Schema for the tool's arguments.
    #[serde(default = "d_schema")]
    pub input_schema: serde_json::Value,
    #[serde(flatten)]
    pub backend: ToolBackend,
    #[serde(default)]
    pub idempotent: bool,
}

fn d_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_spec_fills_default_voice_and_lowercases_intents() {
        let cfg = AgentConfig {
            display_name: "Claims".into(),
            system_prompt: "p".into(),
            intents: vec!["Claim".into(), "POLICY".into()],
            tools: vec![],
            can_escalate_to: vec![],
            voice_profile: String::new(),
        };
        let spec = cfg.to_spec("claims", "en-neutral");
        assert_eq!(spec.voice_profile, "en-neutral");
        assert_eq!(spec.intents, vec!["claim", "policy"]);
    }

    #[test]
    fn tool_backend_deserializes_tagged() {
        let toml = r#"
            description = "Look up a policy"
            kind = "canned"
            response = "{\"ok\":true}"
        "#;
        let cfg: ToolConfig = toml::from_str(toml).expect("parse");
        assert!(matches!(cfg.backend, ToolBackend::Canned { .. }));
        assert!(!cfg.idempotent);
    }
}
