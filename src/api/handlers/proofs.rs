//! Proof record lookup and confirmation control.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::instrument;

use crate::anchor::WorkerMessage;
use crate::api::error::{ApiError, ErrorCode};
use crate::domain::{Fingerprint, ProofRecord};
use crate::infra::ProvenanceError;
use crate::server::AppState;

/// GET /api/v1/proofs/:fingerprint - Proof record for a fingerprint.
#[instrument(skip(state))]
pub async fn get_proof(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<Json<ProofRecord>, ApiError> {
    let fingerprint = Fingerprint::from_hex(&fingerprint)?;
    let record = state
        .service
        .store()
        .get(&fingerprint)
        .await?
        .ok_or(ProvenanceError::RecordNotFound(fingerprint))?;
    Ok(Json(record))
}

/// POST /api/v1/anchors/poll - Ask the confirmation worker for an immediate pass.
#[instrument(skip(state))]
pub async fn poll_anchors(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let Some(worker) = state.worker.as_ref() else {
        return Err(ApiError::new(
            ErrorCode::AnchorUnavailable,
            "confirmation worker is not running",
        ));
    };
    worker.send(WorkerMessage::PollNow).await.map_err(|_| {
        ApiError::new(ErrorCode::InternalError, "confirmation worker has stopped")
    })?;
    Ok(StatusCode::ACCEPTED)
}
