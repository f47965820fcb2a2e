//! REST surface of the provenance ledger
//!
//! All routes are mounted under `/api` by the server; the health checks live at the
//! root.

pub mod error;
pub mod handlers;
pub mod types;

use axum::routing::{get, post};
use axum::Router;

use crate::server::AppState;

pub use error::{ApiError, ErrorCode};

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/documents", post(handlers::submit_document))
        .route("/v1/documents/:identity", get(handlers::get_document_history))
        .route(
            "/v1/documents/:identity/intentional-duplicates",
            post(handlers::mark_intentional_duplicate),
        )
        .route("/v1/verify", post(handlers::verify_document))
        .route("/v1/proofs/:fingerprint", get(handlers::get_proof))
        .route("/v1/anchors/poll", post(handlers::poll_anchors))
        .route("/v1/audit/findings", get(handlers::get_findings))
        .route("/v1/audit/events", get(handlers::list_events))
}
