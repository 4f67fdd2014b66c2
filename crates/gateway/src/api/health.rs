//! Health, readiness, and agent-listing endpoints.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use std::time::Instant;

use crate::state::{AppState, ComponentStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health — lightweight liveness probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_sessions": state.active.count(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /readiness — per-component checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = Vec::with_capacity(4);

    // Pool checks: reported status plus lease accounting.
    for (component, leased, capacity) in [
        ("stt", state.deps.stt.leased(), state.deps.stt.capacity()),
        ("tts", state.deps.tts.leased(), state.deps.tts.capacity()),
        ("llm", state.deps.llm.leased(), state.deps.llm.capacity()),
    ] {
        let started = Instant::now();
        let status = state.health.get(component);
        checks.push(serde_json::json!({
            "component": component,
            "status": status.as_str(),
            "check_time_ms": started.elapsed().as_millis() as u64,
            "details": format!("{leased}/{capacity} handles leased"),
        }));
    }

    // Session store: a read round trip against a probe key.
    {
        let started = Instant::now();
        let status = match state.deps.store.load("__readiness_probe__").await {
            Ok(_) => state.health.get("session_store"),
            Err(_) => ComponentStatus::Unhealthy,
        };
        checks.push(serde_json::json!({
            "component": "session_store",
            "status": status.as_str(),
            "check_time_ms": started.elapsed().as_millis() as u64,
        }));
    }

    let overall = state.health.overall();
    Json(serde_json::json!({
        "status": overall.as_str(),
        "checks": checks,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /agents — registered specialists
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn agents(State(state): State<AppState>) -> impl IntoResponse {
    let agents: Vec<serde_json::Value> = state
        .deps
        .registry
        .listing()
        .into_iter()
        .map(|(key, display_name)| {
            serde_json::json!({
                "key": key,
                "display_name": display_name,
            })
        })
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "agents": agents,
    }))
}
