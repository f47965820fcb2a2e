//! Structured API error responses with error codes
//!
//! Every endpoint reports failures as an [`ApiError`] body carrying a stable
//! machine-readable code, its numeric category and a human-readable message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::infra::ProvenanceError;

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for API responses
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    /// Request body is malformed
    InvalidRequestBody,
    /// Field value is invalid
    InvalidFieldValue,
    /// Declared format unknown, or content does not parse as it
    UnsupportedFormat,
    /// Fingerprint is not 64 hex characters
    InvalidFingerprint,
    /// Receipt document could not be parsed
    InvalidReceipt,

    // Resource errors (2xxx)
    /// Requested resource not found
    ResourceNotFound,
    /// No proof record for the fingerprint
    RecordNotFound,
    /// Identity has no registration for the fingerprint
    NotRegistered,

    // Conflict errors (3xxx)
    /// A record already exists for the fingerprint
    DuplicateRecord,
    /// Status change not allowed from the current status
    InvalidStateTransition,
    /// Confirmed records never change
    ImmutableRecord,
    /// Registration refers to a fingerprint with no record
    DanglingFingerprint,
    /// Status change lacks its evidence
    MissingEvidence,

    // Integrity errors (4xxx)
    /// Content does not match the claimed fingerprint
    ContentMismatch,
    /// Anchor evidence fails independent validation
    TamperedAnchor,

    // Anchoring errors (5xxx)
    /// Timestamping authority unreachable or overloaded
    AnchorUnavailable,
    /// Timestamping authority rejected the anchor
    AnchorFailed,

    // System errors (8xxx)
    /// Database operation failed
    DatabaseError,
    /// Operation timed out
    Timeout,
    /// Unexpected internal error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric error code
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::InvalidRequestBody => 1001,
            ErrorCode::InvalidFieldValue => 1002,
            ErrorCode::UnsupportedFormat => 1003,
            ErrorCode::InvalidFingerprint => 1004,
            ErrorCode::InvalidReceipt => 1005,

            ErrorCode::ResourceNotFound => 2001,
            ErrorCode::RecordNotFound => 2002,
            ErrorCode::NotRegistered => 2003,

            ErrorCode::DuplicateRecord => 3001,
            ErrorCode::InvalidStateTransition => 3002,
            ErrorCode::ImmutableRecord => 3003,
            ErrorCode::DanglingFingerprint => 3004,
            ErrorCode::MissingEvidence => 3005,

            ErrorCode::ContentMismatch => 4001,
            ErrorCode::TamperedAnchor => 4002,

            ErrorCode::AnchorUnavailable => 5001,
            ErrorCode::AnchorFailed => 5002,

            ErrorCode::DatabaseError => 8001,
            ErrorCode::Timeout => 8002,
            ErrorCode::InternalError => 8999,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequestBody
            | ErrorCode::InvalidFieldValue
            | ErrorCode::UnsupportedFormat
            | ErrorCode::InvalidFingerprint
            | ErrorCode::InvalidReceipt => StatusCode::BAD_REQUEST,

            ErrorCode::ResourceNotFound | ErrorCode::RecordNotFound | ErrorCode::NotRegistered => {
                StatusCode::NOT_FOUND
            }

            ErrorCode::DuplicateRecord
            | ErrorCode::InvalidStateTransition
            | ErrorCode::ImmutableRecord
            | ErrorCode::DanglingFingerprint
            | ErrorCode::MissingEvidence => StatusCode::CONFLICT,

            ErrorCode::ContentMismatch | ErrorCode::TamperedAnchor => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            ErrorCode::AnchorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::AnchorFailed => StatusCode::BAD_GATEWAY,

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::InvalidFieldValue => "INVALID_FIELD_VALUE",
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::InvalidFingerprint => "INVALID_FINGERPRINT",
            ErrorCode::InvalidReceipt => "INVALID_RECEIPT",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::RecordNotFound => "RECORD_NOT_FOUND",
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::DuplicateRecord => "DUPLICATE_RECORD",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::ImmutableRecord => "IMMUTABLE_RECORD",
            ErrorCode::DanglingFingerprint => "DANGLING_FINGERPRINT",
            ErrorCode::MissingEvidence => "MISSING_EVIDENCE",
            ErrorCode::ContentMismatch => "CONTENT_MISMATCH",
            ErrorCode::TamperedAnchor => "TAMPERED_ANCHOR",
            ErrorCode::AnchorUnavailable => "ANCHOR_UNAVAILABLE",
            ErrorCode::AnchorFailed => "ANCHOR_FAILED",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

/// Structured error response for API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Fingerprint or identity the error concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Seconds after which a retry may succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
                resource_id: None,
                retry_after: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.error.resource_id = Some(id.into());
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.error.retry_after = Some(seconds);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.as_str();
        let mut response = (status, Json(self)).into_response();

        response.headers_mut().insert(
            axum::http::header::HeaderName::from_static("x-error-code"),
            axum::http::HeaderValue::from_static(code_str),
        );

        response
    }
}

// ============================================================================
// Conversion from ProvenanceError
// ============================================================================

impl From<ProvenanceError> for ApiError {
    fn from(err: ProvenanceError) -> Self {
        let message = err.to_string();
        match err {
            ProvenanceError::UnsupportedFormat(_) => {
                ApiError::new(ErrorCode::UnsupportedFormat, message)
            }
            ProvenanceError::ContentMismatch { expected, actual } => {
                ApiError::new(ErrorCode::ContentMismatch, message).with_details(
                    serde_json::json!({
                        "expected": expected,
                        "actual": actual,
                    }),
                )
            }
            ProvenanceError::DanglingFingerprint(fp) => {
                ApiError::new(ErrorCode::DanglingFingerprint, message).with_resource_id(fp.to_hex())
            }
            ProvenanceError::ImmutableRecordViolation(fp) => {
                ApiError::new(ErrorCode::ImmutableRecord, message).with_resource_id(fp.to_hex())
            }
            ProvenanceError::TamperedAnchor(_) => ApiError::new(ErrorCode::TamperedAnchor, message),
            ProvenanceError::AnchorAuthorityUnavailable(_) => {
                ApiError::new(ErrorCode::AnchorUnavailable, message).with_retry_after(30)
            }
            ProvenanceError::AnchorFailed(_) => ApiError::new(ErrorCode::AnchorFailed, message),
            ProvenanceError::RecordNotFound(fp) => {
                ApiError::new(ErrorCode::RecordNotFound, message).with_resource_id(fp.to_hex())
            }
            ProvenanceError::DuplicateRecord(fp) => {
                ApiError::new(ErrorCode::DuplicateRecord, message).with_resource_id(fp.to_hex())
            }
            ProvenanceError::InvalidStateTransition {
                fingerprint,
                from,
                to,
            } => ApiError::new(ErrorCode::InvalidStateTransition, message)
                .with_resource_id(fingerprint.to_hex())
                .with_details(serde_json::json!({
                    "from_state": from,
                    "to_state": to,
                })),
            ProvenanceError::MissingEvidence { fingerprint, .. } => {
                ApiError::new(ErrorCode::MissingEvidence, message)
                    .with_resource_id(fingerprint.to_hex())
            }
            ProvenanceError::NotRegistered {
                document,
                fingerprint,
            } => ApiError::new(ErrorCode::NotRegistered, message)
                .with_resource_id(fingerprint.to_hex())
                .with_details(serde_json::json!({ "document": document })),
            ProvenanceError::InvalidFingerprint(_) => {
                ApiError::new(ErrorCode::InvalidFingerprint, message)
            }
            ProvenanceError::InvalidReceipt(_) => ApiError::new(ErrorCode::InvalidReceipt, message),
            ProvenanceError::Database(sqlx::Error::PoolTimedOut) => {
                ApiError::new(ErrorCode::Timeout, message)
            }
            ProvenanceError::Database(_) | ProvenanceError::Migration(_) => {
                ApiError::new(ErrorCode::DatabaseError, message)
            }
            ProvenanceError::Serialization(_) => {
                ApiError::new(ErrorCode::InvalidRequestBody, message)
            }
            ProvenanceError::Io(_)
            | ProvenanceError::Configuration(_)
            | ProvenanceError::Internal(_) => ApiError::new(ErrorCode::InternalError, message),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Create a not found error for a specific resource type
pub fn not_found(resource_type: &str, id: impl std::fmt::Display) -> ApiError {
    ApiError::new(
        ErrorCode::ResourceNotFound,
        format!("{} not found: {}", resource_type, id),
    )
    .with_resource_id(id.to_string())
}

/// Create a validation error with field details
pub fn validation_error(field: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InvalidFieldValue, message.into())
        .with_details(serde_json::json!({ "field": field }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Fingerprint;

    #[test]
    fn test_error_code_numeric() {
        assert_eq!(ErrorCode::InvalidRequestBody.numeric_code(), 1001);
        assert_eq!(ErrorCode::RecordNotFound.numeric_code(), 2002);
        assert_eq!(ErrorCode::DuplicateRecord.numeric_code(), 3001);
        assert_eq!(ErrorCode::ContentMismatch.numeric_code(), 4001);
        assert_eq!(ErrorCode::AnchorUnavailable.numeric_code(), 5001);
        assert_eq!(ErrorCode::InternalError.numeric_code(), 8999);
    }

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::UnsupportedFormat.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::RecordNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::ImmutableRecord.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::TamperedAnchor.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::AnchorUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_from_provenance_error() {
        let fp = Fingerprint([7u8; 32]);
        let err: ApiError = ProvenanceError::RecordNotFound(fp).into();
        assert_eq!(err.error.code, ErrorCode::RecordNotFound);
        assert_eq!(err.error.resource_id, Some(fp.to_hex()));

        let err: ApiError = ProvenanceError::AnchorAuthorityUnavailable("down".into()).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error.retry_after, Some(30));

        let err: ApiError = ProvenanceError::UnsupportedFormat("docx".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.error.message.contains("docx"));
    }

    #[test]
    fn test_error_serialization() {
        let error = ApiError::new(ErrorCode::TamperedAnchor, "root mismatch");
        let json = serde_json::to_string(&error).unwrap();

        assert!(json.contains("TAMPERED_ANCHOR"));
        assert!(json.contains("root mismatch"));
        assert!(json.contains("4002"));
        assert!(!json.contains("retry_after"));
    }

    #[test]
    fn test_validation_error() {
        let error = validation_error("content", "not valid base64");
        assert_eq!(error.error.code, ErrorCode::InvalidFieldValue);
        assert_eq!(error.error.details, Some(serde_json::json!({ "field": "content" })));
    }
}
