//! Unauthenticated health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /api/health` — liveness probe.
///
/// Reports uptime, version, and whether a remote instance is configured.
/// Deliberately does not probe the remote: a dead remote must not make the
/// local host look unhealthy.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let remote = &state.config.remote;

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "remote": {
            "configured": remote.is_configured(),
            "url": remote.url,
            "timeout_secs": remote.timeout_secs,
        },
    }))
}
