//! Liveness and readiness checks

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::ProofStatus;
use crate::server::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Response for the basic health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Response for the readiness endpoint
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub head_sequence: u64,
    pub pending_proofs: usize,
    pub authority: String,
    pub confirmation_worker: bool,
    pub response_time_ms: u64,
}

/// Basic health check endpoint.
///
/// No deep checks; suitable for liveness checks.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Healthy,
        service: "provenance-ledger",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness check endpoint.
///
/// Reads the log head and the pending backlog from the proof store.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<serde_json::Value>)> {
    let start = std::time::Instant::now();
    let store = state.service.store();

    let check = async {
        let head = store.head_sequence().await?;
        let pending = store.list_by_status(ProofStatus::Pending).await?;
        Ok::<_, crate::infra::ProvenanceError>((head, pending.len()))
    };

    match check.await {
        Ok((head_sequence, pending_proofs)) => Ok(Json(ReadinessResponse {
            status: "ready",
            head_sequence,
            pending_proofs,
            authority: state.service.anchor().authority_id(),
            confirmation_worker: state.worker.as_ref().is_some_and(|w| !w.is_closed()),
            response_time_ms: start.elapsed().as_millis() as u64,
        })),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": HealthStatus::Unhealthy,
                "error": format!("Proof store unavailable: {e}"),
            })),
        )),
    }
}
