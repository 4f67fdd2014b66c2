use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use vb_clients::{ChatClient, ClientFactory, OpenAiChatClient};
use vb_domain::config::Config;
use vb_domain::error::Result;

use crate::runtime::cancel::CancelHub;
use crate::runtime::PipelineDeps;
use crate::telephony::TelephonyClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Active session registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Live sessions served by this worker, keyed by session id.
///
/// Holds each session's cancellation hub so HTTP call control
/// (`POST /call/hangup`) and shutdown can end sessions the transports own.
#[derive(Default)]
pub struct ActiveSessions {
    inner: Mutex<HashMap<String, Arc<CancelHub>>>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: &str, hub: Arc<CancelHub>) {
        self.inner.lock().insert(session_id.to_owned(), hub);
    }

    pub fn remove(&self, session_id: &str) {
        self.inner.lock().remove(session_id);
    }

    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }

    /// End one session. Returns false when it is not served here.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.inner.lock().get(session_id) {
            Some(hub) => {
                hub.cancel_all();
                true
            }
            None => false,
        }
    }

    /// Force-end every session (shutdown path).
    pub fn cancel_all(&self) {
        for hub in self.inner.lock().values() {
            hub.cancel_all();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Component health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentStatus {
    Healthy,
    /// An internal invariant tripped; the affected session was ended.
    Degraded,
    /// Misconfiguration surfaced at runtime; the component is unusable.
    Unhealthy,
}

impl ComponentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Per-component status reported by `/readiness`.
#[derive(Default)]
pub struct HealthRegistry {
    inner: RwLock<HashMap<&'static str, ComponentStatus>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, component: &'static str, status: ComponentStatus) {
        self.inner.write().insert(component, status);
    }

    pub fn get(&self, component: &str) -> ComponentStatus {
        self.inner
            .read()
            .get(component)
            .copied()
            .unwrap_or(ComponentStatus::Healthy)
    }

    /// Worst status across all components.
    pub fn overall(&self) -> ComponentStatus {
        self.inner
            .read()
            .values()
            .copied()
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat client factory (LLM pool)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds OpenAI-compatible chat clients for the LLM pool.
pub struct ChatClientFactory {
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatClientFactory {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait::async_trait]
impl ClientFactory<Arc<dyn ChatClient>> for ChatClientFactory {
    async fn connect(&self) -> Result<Arc<dyn ChatClient>> {
        let client =
            OpenAiChatClient::new(self.base_url.clone(), self.api_key.clone(), self.model.clone())?;
        Ok(Arc::new(client))
    }

    fn service(&self) -> &str {
        "llm"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// App state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Everything the per-session pipeline needs (store, pools, registry).
    pub deps: Arc<PipelineDeps>,
    pub telephony: Arc<TelephonyClient>,
    pub active: Arc<ActiveSessions>,
    pub health: Arc<HealthRegistry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_registry_reports_worst_status() {
        let health = HealthRegistry::new();
        assert_eq!(health.overall(), ComponentStatus::Healthy);

        health.set("stt", ComponentStatus::Degraded);
        assert_eq!(health.overall(), ComponentStatus::Degraded);

        health.set("tts", ComponentStatus::Unhealthy);
        assert_eq!(health.overall(), ComponentStatus::Unhealthy);

        health.set("tts", ComponentStatus::Healthy);
        assert_eq!(health.overall(), ComponentStatus::Degraded);
    }

    #[test]
    fn active_sessions_cancel_by_id() {
        let active = ActiveSessions::new();
        let hub = Arc::new(CancelHub::new());
        active.register("s1", hub.clone());
        assert_eq!(active.count(), 1);

        assert!(active.cancel("s1"));
        assert!(hub.root().is_cancelled());
        assert!(!active.cancel("ghost"));

        active.remove("s1");
        assert_eq!(active.count(), 0);
    }
}
