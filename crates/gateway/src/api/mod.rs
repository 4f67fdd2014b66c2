pub mod calls;
pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;
use crate::transport;

/// Build the API router: the two WebSocket ingress points, call control,
/// and the health surface.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/realtime", get(transport::browser::realtime_ws))
        .route("/call/stream", get(transport::telephony::call_stream_ws))
        .route("/call/incoming", post(calls::incoming))
        .route("/call/outbound", post(calls::outbound))
        .route("/call/hangup", post(calls::hangup))
        .route("/health", get(health::health))
        .route("/readiness", get(health::readiness))
        .route("/agents", get(health::agents))
}
