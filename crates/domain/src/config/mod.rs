mod agents;
mod pipeline;
mod server;
mod streaming;
mod upstream;

pub use agents::*;
pub use pipeline::*;
pub use server::*;
pub use streaming::*;
pub use upstream::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::agent::GREETER_AGENT;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub pool_sizes: PoolSizes,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub phrases: PhraseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Specialist agent definitions (key = registry key).
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    /// Tool definitions (key = tool name).
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn err(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warn(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

const SUPPORTED_SAMPLE_RATES: [u32; 2] = [16_000, 24_000];

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        // ── Server ──────────────────────────────────────────────────
        if self.server.port == 0 {
            issues.push(err("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            issues.push(err("server.host", "host must not be empty"));
        }

        // ── Upstream endpoints ──────────────────────────────────────
        check_ws_url(&mut issues, "stt.endpoint", &self.stt.endpoint);
        check_ws_url(&mut issues, "tts.endpoint", &self.tts.endpoint);
        check_http_url(&mut issues, "llm.base_url", &self.llm.base_url);
        check_http_url(&mut issues, "telephony.base_url", &self.telephony.base_url);
        check_ws_url(
            &mut issues,
            "telephony.media_stream_url",
            &self.telephony.media_stream_url,
        );

        for (field, rate) in [
            ("stt.sample_rate", self.stt.sample_rate),
            ("tts.sample_rate", self.tts.sample_rate),
            ("llm.realtime_sample_rate", self.llm.realtime_sample_rate),
        ] {
            if !SUPPORTED_SAMPLE_RATES.contains(&rate) {
                issues.push(err(
                    field,
                    format!("unsupported sample rate {rate} (expected 16000 or 24000)"),
                ));
            }
        }

        // ── Realtime voice mode ─────────────────────────────────────
        if self.streaming.mode == StreamingMode::RealtimeVoice {
            match &self.llm.realtime_endpoint {
                Some(url) => check_ws_url(&mut issues, "llm.realtime_endpoint", url),
                None => issues.push(err(
                    "llm.realtime_endpoint",
                    "realtime_voice mode requires a realtime endpoint",
                )),
            }
        }

        // ── Pool sizes ──────────────────────────────────────────────
        for (field, size) in [
            ("pool_sizes.stt", self.pool_sizes.stt),
            ("pool_sizes.tts", self.pool_sizes.tts),
            ("pool_sizes.llm", self.pool_sizes.llm),
        ] {
            if size == 0 {
                issues.push(err(field, "pool size must be greater than 0"));
            }
        }

        // ── Pipeline knobs ──────────────────────────────────────────
        if self.pipeline.turn_timeout_ms == 0 {
            issues.push(err("pipeline.turn_timeout_ms", "must be greater than 0"));
        }
        if self.pipeline.tool_timeout_ms == 0 {
            issues.push(err("pipeline.tool_timeout_ms", "must be greater than 0"));
        }
        let threshold = self.pipeline.barge_in_stability_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            issues.push(err(
                "pipeline.barge_in_stability_threshold",
                format!("must be within [0, 1], got {threshold}"),
            ));
        }
        if self.pipeline.history_window_turns == 0 {
            issues.push(warn(
                "pipeline.history_window_turns",
                "history window of 0 means every turn is served without context",
            ));
        }

        // ── Transport limits ────────────────────────────────────────
        if self.streaming.max_message_bytes == 0 {
            issues.push(err("streaming.max_message_bytes", "must be greater than 0"));
        }
        if self.streaming.max_inbound_backlog == 0 {
            issues.push(err("streaming.max_inbound_backlog", "must be greater than 0"));
        }
        if self.streaming.outbound_high_water_frames == 0 {
            issues.push(err(
                "streaming.outbound_high_water_frames",
                "must be greater than 0",
            ));
        }

        // ── Agents ──────────────────────────────────────────────────
        if !self.agents.is_empty() && !self.agents.contains_key(GREETER_AGENT) {
            issues.push(warn(
                "agents",
                format!("no \"{GREETER_AGENT}\" agent configured — a default one will be registered"),
            ));
        }
        for (key, agent) in &self.agents {
            for tool in &agent.tools {
                if !self.tools.contains_key(tool) {
                    issues.push(err(
                        format!("agents.{key}.tools"),
                        format!("references unknown tool \"{tool}\""),
                    ));
                }
            }
            for target in &agent.can_escalate_to {
                if !self.agents.contains_key(target) {
                    issues.push(err(
                        format!("agents.{key}.can_escalate_to"),
                        format!("references unknown agent \"{target}\""),
                    ));
                }
            }
        }

        // ── Tools ───────────────────────────────────────────────────
        for (name, tool) in &self.tools {
            if let ToolBackend::Http { url } = &tool.backend {
                check_http_url(&mut issues, format!("tools.{name}.url"), url);
            }
        }

        // ── Phrases ─────────────────────────────────────────────────
        for (field, phrase) in [
            ("phrases.greeting", &self.phrases.greeting),
            ("phrases.fallback", &self.phrases.fallback),
            ("phrases.goodbye", &self.phrases.goodbye),
        ] {
            if phrase.trim().is_empty() {
                issues.push(err(field, "phrase must not be empty"));
            }
        }

        issues
    }
}

fn check_http_url(issues: &mut Vec<ConfigError>, field: impl Into<String>, url: &str) {
    let field = field.into();
    if url.is_empty() {
        issues.push(err(field, "URL must not be empty"));
    } else if !url.starts_with("http://") && !url.starts_with("https://") {
        issues.push(err(
            field,
            format!("must start with http:// or https:// (got \"{url}\")"),
        ));
    }
}

fn check_ws_url(issues: &mut Vec<ConfigError>, field: impl Into<String>, url: &str) {
    let field = field.into();
    if url.is_empty() {
        issues.push(err(field, "URL must not be empty"));
    } else if !url.starts_with("ws://") && !url.starts_with("wss://") {
        issues.push(err(
            field,
            format!("must start with ws:// or wss:// (got \"{url}\")"),
        ));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: find the first issue matching a field prefix.
    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn default_config_passes() {
        let issues = Config::default().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.port").expect("expected server.port error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn stt_endpoint_must_be_websocket() {
        let mut cfg = Config::default();
        cfg.stt.endpoint = "http://localhost:9100".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "stt.endpoint").expect("expected stt.endpoint error");
        assert!(issue.message.contains("ws://"));
    }

    #[test]
    fn unsupported_sample_rate_is_error() {
        let mut cfg = Config::default();
        cfg.stt.sample_rate = 44_100;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "stt.sample_rate").is_some());
    }

    #[test]
    fn realtime_mode_requires_endpoint() {
        let mut cfg = Config::default();
        cfg.streaming.mode = StreamingMode::RealtimeVoice;
        cfg.llm.realtime_endpoint = None;
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "llm.realtime_endpoint").expect("expected realtime error");
        assert_eq!(issue.severity, ConfigSeverity::Error);

        cfg.llm.realtime_endpoint = Some("wss://voice.example/v1".into());
        assert!(find_issue(&cfg.validate(), "llm.realtime_endpoint").is_none());
    }

    #[test]
    fn zero_pool_size_is_error() {
        let mut cfg = Config::default();
        cfg.pool_sizes.tts = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "pool_sizes.tts").is_some());
    }

    #[test]
    fn barge_threshold_out_of_range_is_error() {
        let mut cfg = Config::default();
        cfg.pipeline.barge_in_stability_threshold = 1.5;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "pipeline.barge_in_stability_threshold").is_some());
    }

    #[test]
    fn agent_with_unknown_tool_is_error() {
        let mut cfg = Config::default();
        cfg.agents.insert(
            "claims".into(),
            AgentConfig {
                display_name: "Claims".into(),
                system_prompt: "p".into(),
                intents: vec![],
                tools: vec!["lookup_policy".into()],
                can_escalate_to: vec![],
                voice_profile: String::new(),
            },
        );
        let issues = cfg.validate();
        let issue = find_issue(&issues, "agents.claims.tools").expect("expected tool ref error");
        assert!(issue.message.contains("lookup_policy"));
    }

    #[test]
    fn agent_with_unknown_escalation_target_is_error() {
        let mut cfg = Config::default();
        cfg.agents.insert(
            "greeter".into(),
            AgentConfig {
                display_name: "Greeter".into(),
                system_prompt: "p".into(),
                intents: vec![],
                tools: vec![],
                can_escalate_to: vec!["billing".into()],
                voice_profile: String::new(),
            },
        );
        let issues = cfg.validate();
        assert!(find_issue(&issues, "agents.greeter.can_escalate_to").is_some());
    }

    #[test]
    fn missing_greeter_is_warning() {
        let mut cfg = Config::default();
        cfg.agents.insert(
            "claims".into(),
            AgentConfig {
                display_name: "Claims".into(),
                system_prompt: "p".into(),
                intents: vec![],
                tools: vec![],
                can_escalate_to: vec![],
                voice_profile: String::new(),
            },
        );
        let issues = cfg.validate();
        let issue = find_issue(&issues, "agents").expect("expected greeter warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn empty_phrase_is_error() {
        let mut cfg = Config::default();
        cfg.phrases.goodbye = "  ".into();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "phrases.goodbye").is_some());
    }

    #[test]
    fn config_error_display_format() {
        let e = err("server.port", "port must be greater than 0");
        assert_eq!(format!("{e}"), "[ERROR] server.port: port must be greater than 0");
        let w = warn("agents", "no greeter");
        assert_eq!(format!("{w}"), "[WARN] agents: no greeter");
    }
}
