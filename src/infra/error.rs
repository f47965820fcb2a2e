//! Error types for the provenance ledger

use thiserror::Error;

use crate::domain::Fingerprint;

/// Errors that can occur in the provenance ledger
#[derive(Error, Debug)]
pub enum ProvenanceError {
    /// Declared format not recognized, or bytes do not parse as it
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Recomputed fingerprint differs from the claimed one
    #[error("content mismatch: expected {expected}, got {actual}")]
    ContentMismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },

    /// Mapping registration for a fingerprint with no proof record
    #[error("dangling fingerprint: no proof record for {0}")]
    DanglingFingerprint(Fingerprint),

    /// Attempt to change a confirmed proof record
    #[error("immutable record violation: {0} is confirmed")]
    ImmutableRecordViolation(Fingerprint),

    /// Anchor evidence fails independent validation
    #[error("tampered anchor: {0}")]
    TamperedAnchor(String),

    /// Timestamping authority unreachable or overloaded (transient)
    #[error("anchor authority unavailable: {0}")]
    AnchorAuthorityUnavailable(String),

    /// Anchor abandoned or rejected (terminal)
    #[error("anchor failed: {0}")]
    AnchorFailed(String),

    /// Proof record not found
    #[error("proof record not found: {0}")]
    RecordNotFound(Fingerprint),

    /// Second record for an existing fingerprint
    #[error("duplicate proof record: {0}")]
    DuplicateRecord(Fingerprint),

    /// Invalid status transition
    #[error("invalid state transition for {fingerprint}: {from} -> {to}")]
    InvalidStateTransition {
        fingerprint: Fingerprint,
        from: String,
        to: String,
    },

    /// Status change without the evidence it requires
    #[error("missing evidence for {fingerprint} -> {status}")]
    MissingEvidence {
        fingerprint: Fingerprint,
        status: String,
    },

    /// Identity has no registration for the fingerprint
    #[error("{document} has no registration for {fingerprint}")]
    NotRegistered {
        document: String,
        fingerprint: Fingerprint,
    },

    /// Malformed fingerprint string
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Receipt document could not be parsed
    #[error("invalid receipt: {0}")]
    InvalidReceipt(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProvenanceError {
    /// Whether the failure may clear up on its own and is worth retrying.
    ///
    /// Integrity faults are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            ProvenanceError::AnchorAuthorityUnavailable(_) => true,
            ProvenanceError::Database(err) => super::retry::is_transient_db_error(err),
            _ => false,
        }
    }

    /// Whether the error signals an integrity fault that must surface immediately.
    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            ProvenanceError::ContentMismatch { .. }
                | ProvenanceError::TamperedAnchor(_)
                | ProvenanceError::ImmutableRecordViolation(_)
        )
    }
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, ProvenanceError>;
