//! /members and /domain handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiState, MemberInfo};

// ── /members ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct MembersQuery {
    pub subsystem: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub members: Vec<MemberInfo>,
}

pub async fn handle_members(
    State(state): State<ApiState>,
    Query(query): Query<MembersQuery>,
) -> Json<MembersResponse> {
    let entries = match query.subsystem.as_deref() {
        Some(subsystem) if !subsystem.is_empty() => state.registry.query_subsystem(subsystem),
        _ => state.registry.all(),
    };
    let mut members: Vec<MemberInfo> = entries.iter().map(MemberInfo::from).collect();
    members.sort_by(|a, b| a.identity.cmp(&b.identity));

    Json(MembersResponse { members })
}

// ── /domain (POST) ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DomainRequest {
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct DomainResponse {
    pub domain: String,
    pub members: usize,
}

/// Move this process into another domain.
///
/// The detector re-announces itself under the new domain, accepts heartbeats
/// from it only and forgets peers outside it; the registry evicts them too.
pub async fn handle_change_domain(
    State(state): State<ApiState>,
    Json(req): Json<DomainRequest>,
) -> Result<Json<DomainResponse>, (StatusCode, String)> {
    let domain = req.domain.trim();
    if domain.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "domain must not be empty".to_string()));
    }

    let evicted = state.detector.change_domain(domain);
    tracing::info!(domain, evicted, "domain changed via API");

    Ok(Json(DomainResponse {
        domain: domain.to_string(),
        members: state.registry.len(),
    }))
}
