//! Tool registry and dispatch.
//!
//! A tool is a `{name, schema, execute}` record; lookup is a map; execute
//! returns a result variant. Tools come from declarative config: an HTTP
//! backend POSTing arguments to an endpoint, or a canned template for
//! demos and tests. The reserved `handoff_to` tool is synthesized per
//! agent from its escalation targets and intercepted by the orchestrator
//! before dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use vb_domain::agent::{AgentSpec, HANDOFF_TOOL};
use vb_domain::config::{Config, ToolBackend};
use vb_domain::error::{Error, Result};
use vb_domain::tool::ToolDefinition;
use vb_sessions::SessionRecord;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes one tool call. The session record is read-only context
/// (caller identity, collected slots); mutation goes through the
/// orchestrator, never through tools.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: &Value, session: &SessionRecord) -> Result<String>;
}

pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub idempotent: bool,
    executor: Arc<dyn ToolExecutor>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        idempotent: bool,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            idempotent,
            executor,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in executors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POSTs the arguments as JSON; the response body is the tool result.
struct HttpTool {
    url: String,
    client: reqwest::Client,
}

#[async_trait::async_trait]
impl ToolExecutor for HttpTool {
    async fn execute(&self, args: &Value, _session: &SessionRecord) -> Result<String> {
        let resp = self
            .client
            .post(&self.url)
            .json(args)
            .send()
            .await
            .map_err(|e| Error::upstream("tool", e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::upstream("tool", e.to_string()))?;

        if !status.is_success() {
            return Err(Error::upstream(
                "tool",
                format!("HTTP {} - {}", status.as_u16(), body),
            ));
        }
        Ok(body)
    }
}

/// Fixed response template; `{name}` placeholders are filled from the
/// arguments object.
struct CannedTool {
    template: String,
}

#[async_trait::async_trait]
impl ToolExecutor for CannedTool {
    async fn execute(&self, args: &Value, _session: &SessionRecord) -> Result<String> {
        let mut out = self.template.clone();
        if let Some(obj) = args.as_object() {
            for (key, value) in obj {
                let needle = format!("{{{key}}}");
                let replacement = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out = out.replace(&needle, &replacement);
            }
        }
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("building tool HTTP client: {e}")))?;

        let mut registry = Self::new();
        for (name, tool_cfg) in &config.tools {
            if name == HANDOFF_TOOL {
                return Err(Error::Config(format!(
                    "tool name \"{HANDOFF_TOOL}\" is reserved"
                )));
            }
            let executor: Arc<dyn ToolExecutor> = match &tool_cfg.backend {
                ToolBackend::Http { url } => Arc::new(HttpTool {
                    url: url.clone(),
                    client: client.clone(),
                }),
                ToolBackend::Canned { response } => Arc::new(CannedTool {
                    template: response.clone(),
                }),
            };
            registry.register(ToolDescriptor::new(
                name.clone(),
                tool_cfg.description.clone(),
                tool_cfg.input_schema.clone(),
                tool_cfg.idempotent,
                executor,
            ));
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) {
        self.tools.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions offered to the model for one agent: the agent's
    /// allowlisted tools plus a synthesized `handoff_to` when the agent
    /// has escalation targets.
    pub fn definitions_for(&self, agent: &AgentSpec) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = agent
            .tools
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(ToolDescriptor::definition)
            .collect();

        if !agent.can_escalate_to.is_empty() {
            defs.push(handoff_definition(&agent.can_escalate_to));
        }
        defs
    }

    /// Execute one tool under the per-tool wall clock.
    ///
    /// Returns `(content, is_error)`: unknown tools, timeouts, and
    /// executor failures all come back as error content for the model
    /// rather than aborting the turn.
    pub async fn dispatch(
        &self,
        name: &str,
        args: &Value,
        session: &SessionRecord,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> (String, bool) {
        let descriptor = match self.tools.get(name) {
            Some(d) => d,
            None => return (format!("unknown tool \"{name}\""), true),
        };

        let work = descriptor.executor.execute(args, session);
        tokio::select! {
            () = cancel.cancelled() => ("tool cancelled".into(), true),
            result = tokio::time::timeout(timeout, work) => match result {
                Ok(Ok(content)) => (content, false),
                Ok(Err(e)) => {
                    tracing::warn!(tool = name, error = %e, "tool execution failed");
                    (format!("tool failed: {e}"), true)
                }
                Err(_) => {
                    tracing::warn!(tool = name, timeout_ms = timeout.as_millis() as u64, "tool timed out");
                    (format!("tool \"{name}\" timed out"), true)
                }
            },
        }
    }
}

/// The reserved handoff tool, parameterized by the agent's targets.
pub fn handoff_definition(targets: &[String]) -> ToolDefinition {
    ToolDefinition {
        name: HANDOFF_TOOL.into(),
        description: "Transfer the caller to another specialist agent. \
                      Use only when the caller's need is outside your domain."
            .into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "enum": targets,
                    "description": "Registry key of the agent to hand the caller to",
                }
            },
            "required": ["agent"],
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use vb_sessions::TransportKind;

    fn session() -> SessionRecord {
        SessionRecord::new("s1", TransportKind::Browser, "worker-a")
    }

    fn canned(name: &str, template: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            "test tool",
            serde_json::json!({"type": "object"}),
            true,
            Arc::new(CannedTool {
                template: template.into(),
            }),
        )
    }

    #[tokio::test]
    async fn canned_tool_fills_placeholders() {
        let mut registry = ToolRegistry::new();
        registry.register(canned(
            "lookup_policy",
            r#"{"ok":true,"policy":"{policy_number}","holder":"J. Doe"}"#,
        ));

        let (content, is_error) = registry
            .dispatch(
                "lookup_policy",
                &serde_json::json!({"policy_number": "A123"}),
                &session(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await;

        assert!(!is_error);
        assert!(content.contains("A123"));
        assert!(content.contains("J. Doe"));
    }

    #[tokio::test]
    async fn unknown_tool_is_error_content() {
        let registry = ToolRegistry::new();
        let (content, is_error) = registry
            .dispatch(
                "nope",
                &serde_json::json!({}),
                &session(),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;
        assert!(is_error);
        assert!(content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn slow_tool_hits_the_wall_clock() {
        struct SlowTool;

        #[async_trait::async_trait]
        impl ToolExecutor for SlowTool {
            async fn execute(&self, _args: &Value, _session: &SessionRecord) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("too late".into())
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new(
            "slow",
            "sleeps",
            serde_json::json!({"type": "object"}),
            false,
            Arc::new(SlowTool),
        ));

        let started = std::time::Instant::now();
        let (content, is_error) = registry
            .dispatch(
                "slow",
                &serde_json::json!({}),
                &session(),
                Duration::from_millis(50),
                &CancellationToken::new(),
            )
            .await;
        assert!(is_error);
        assert!(content.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancelled_turn_stops_the_tool() {
        struct SlowTool;

        #[async_trait::async_trait]
        impl ToolExecutor for SlowTool {
            async fn execute(&self, _args: &Value, _session: &SessionRecord) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("too late".into())
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new(
            "slow",
            "sleeps",
            serde_json::json!({"type": "object"}),
            false,
            Arc::new(SlowTool),
        ));

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let (content, is_error) = registry
            .dispatch(
                "slow",
                &serde_json::json!({}),
                &session(),
                Duration::from_secs(10),
                &cancel,
            )
            .await;
        assert!(is_error);
        assert!(content.contains("cancelled"));
    }

    #[test]
    fn definitions_include_handoff_for_escalating_agents() {
        let mut registry = ToolRegistry::new();
        registry.register(canned("lookup_policy", "{}"));

        let agent = AgentSpec {
            key: "claims".into(),
            display_name: "Claims".into(),
            system_prompt: "p".into(),
            tools: vec!["lookup_policy".into()],
            can_escalate_to: vec!["greeter".into()],
            voice_profile: "v".into(),
            intents: vec![],
        };

        let defs = registry.definitions_for(&agent);
        assert_eq!(defs.len(), 2);
        assert!(defs.iter().any(|d| d.name == "lookup_policy"));
        let handoff = defs.iter().find(|d| d.name == HANDOFF_TOOL).unwrap();
        assert_eq!(handoff.parameters["properties"]["agent"]["enum"][0], "greeter");
    }

    #[test]
    fn reserved_tool_name_is_a_config_error() {
        let mut config = Config::default();
        config.tools.insert(
            HANDOFF_TOOL.into(),
            vb_domain::config::ToolConfig {
                description: "bad".into(),
                input_schema: serde_json::json!({}),
                backend: ToolBackend::Canned {
                    response: "x".into(),
                },
                idempotent: false,
            },
        );
        assert!(matches!(
            ToolRegistry::from_config(&config),
            Err(Error::Config(_))
        ));
    }
}
