//! SeedCheck audit endpoints.

use axum::extract::{Query, State};
use axum::Json;
use tracing::{info, instrument};

use crate::api::error::ApiError;
use crate::api::types::{EventsQuery, EventsResponse, FindingsResponse};
use crate::server::AppState;

const MAX_EVENTS_PAGE: usize = 1000;

/// GET /api/v1/audit/findings - Run a full audit over the event log.
#[instrument(skip(state))]
pub async fn get_findings(
    State(state): State<AppState>,
) -> Result<Json<FindingsResponse>, ApiError> {
    let head_sequence = state.service.store().head_sequence().await?;
    let findings = state.audit.run_audit().await?;
    info!(
        head_sequence,
        findings = findings.len(),
        staleness_secs = state.audit.config().staleness_threshold.as_secs(),
        "Audit served"
    );

    Ok(Json(FindingsResponse {
        head_sequence,
        count: findings.len(),
        findings,
    }))
}

/// GET /api/v1/audit/events?after=N&limit=M - Page through the audit log.
#[instrument(skip(state))]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(MAX_EVENTS_PAGE).clamp(1, MAX_EVENTS_PAGE);
    let events = state.service.store().events_page(query.after, limit).await?;
    let next_after = events.last().map(|e| e.sequence).unwrap_or(query.after);

    Ok(Json(EventsResponse { events, next_after }))
}
