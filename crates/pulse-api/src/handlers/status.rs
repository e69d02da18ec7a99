//! /status and /heartbeat handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub identity: String,
    pub domain: Option<String>,
    pub running: bool,
    pub heartbeat_interval_ms: u64,
    pub stale_after_ms: u64,
    pub domains: Vec<String>,
    pub change_detection: String,
    pub tracked_peers: usize,
    pub members: usize,
    pub subscribers: usize,
    pub uptime_secs: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let config = state.detector.config();
    let local = state.registry.local_identity();

    Json(StatusResponse {
        identity: local.to_string(),
        domain: local.domain().map(str::to_string),
        running: state.detector.is_running(),
        heartbeat_interval_ms: config.heartbeat_interval().as_millis() as u64,
        stale_after_ms: config.stale_after().as_millis() as u64,
        domains: config.domains().iter().cloned().collect(),
        change_detection: format!("{:?}", config.change_detection()).to_lowercase(),
        tracked_peers: state.detector.tracked_peers().len(),
        members: state.registry.len(),
        subscribers: state.registry.subscriber_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// ── /heartbeat (POST) ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub sent: bool,
}

pub async fn handle_heartbeat(State(state): State<ApiState>) -> Json<HeartbeatResponse> {
    let sent = state.detector.heartbeat();
    tracing::info!(sent, "heartbeat forced via API");
    Json(HeartbeatResponse { sent })
}
