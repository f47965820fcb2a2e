//! Document submission, verification and history.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, instrument};

use crate::api::error::{not_found, validation_error, ApiError};
use crate::api::types::{
    HistoryResponse, IntentionalDuplicateRequest, SubmitDocumentRequest, VerifyRequest,
    VerifyResponse,
};
use crate::crypto::{canonicalize, fingerprint};
use crate::domain::DocumentIdentity;
use crate::server::AppState;
use crate::service::{SubmitReceipt, SubmitRequest};

use super::{decode_content, parse_format};

/// POST /api/v1/documents - Fingerprint, anchor and register a document.
///
/// `201 Created` when a new proof record was made, `200 OK` when the content
/// was already on record.
#[instrument(skip(state, request), fields(identity = %request.identity, format = %request.format))]
pub async fn submit_document(
    State(state): State<AppState>,
    Json(request): Json<SubmitDocumentRequest>,
) -> Result<(StatusCode, Json<SubmitReceipt>), ApiError> {
    let identity = request.identity.trim();
    if identity.is_empty() {
        return Err(validation_error("identity", "identity must not be empty"));
    }
    let identity = DocumentIdentity::new(identity);
    let format = parse_format(&request.format)?;
    let bytes = decode_content(&request.content)?;
    let storage_location = request
        .storage_location
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| identity.slug());

    let receipt = state
        .intake
        .submit(SubmitRequest {
            identity,
            bytes,
            format,
            storage_location,
        })
        .await?;

    let status = if receipt.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(receipt)))
}

/// POST /api/v1/verify - Check content against a proof.
#[instrument(
    skip(state, request),
    fields(format = %request.format, claimed = request.proof.is_some())
)]
pub async fn verify_document(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let format = parse_format(&request.format)?;
    let bytes = decode_content(&request.content)?;
    let actual = fingerprint(&canonicalize(&bytes, format)?);

    let result = state
        .service
        .verify_document(&bytes, format, request.proof)
        .await?;

    debug!(fingerprint = %actual.short(), outcome = result.name(), "Verified");
    Ok(Json(VerifyResponse {
        fingerprint: actual,
        result,
    }))
}

/// GET /api/v1/documents/:identity - Version history of a document.
#[instrument(skip(state))]
pub async fn get_document_history(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let identity = DocumentIdentity::new(identity);
    let entry = state.service.mapping().entry(&identity).await?;
    if entry.is_none() {
        return Err(not_found("Document", &identity));
    }
    let versions = state.service.history(&identity).await?;

    Ok(Json(HistoryResponse {
        identity,
        versions,
        entry,
    }))
}

/// POST /api/v1/documents/:identity/intentional-duplicates - Acknowledge a
/// fingerprint this identity shares with another on purpose.
#[instrument(skip(state, request), fields(fingerprint = %request.fingerprint.short()))]
pub async fn mark_intentional_duplicate(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Json(request): Json<IntentionalDuplicateRequest>,
) -> Result<StatusCode, ApiError> {
    let identity = DocumentIdentity::new(identity);
    state
        .service
        .mapping()
        .mark_intentional_duplicate(&identity, &request.fingerprint)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
