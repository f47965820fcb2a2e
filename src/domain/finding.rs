//! Audit findings and verification outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DocumentIdentity, Fingerprint};

/// Kind of integrity anomaly reported by an audit pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    /// Record without an owning mapping entry, or mapping without a record
    Orphaned,
    /// Several identities claim the same fingerprint
    DuplicateClaim,
    /// Pending past the staleness threshold with no terminal follow-up
    StaleAnchor,
    /// Missing or non-increasing sequence number in the log
    SequenceGap,
    /// Anchor abandoned after retries or rejected by the authority
    FailedAnchor,
}

impl FindingSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingSeverity::Orphaned => "orphaned",
            FindingSeverity::DuplicateClaim => "duplicate_claim",
            FindingSeverity::StaleAnchor => "stale_anchor",
            FindingSeverity::SequenceGap => "sequence_gap",
            FindingSeverity::FailedAnchor => "failed_anchor",
        }
    }
}

impl fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reported integrity anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: FindingSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<DocumentIdentity>,
    /// Sequence number the anomaly was detected at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    pub message: String,
}

impl Finding {
    pub fn new(severity: FindingSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            fingerprint: None,
            documents: Vec::new(),
            sequence: None,
            message: message.into(),
        }
    }

    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn documents(mut self, documents: impl IntoIterator<Item = DocumentIdentity>) -> Self {
        self.documents = documents.into_iter().collect();
        self
    }

    pub fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// Outcome of verifying a document against a claimed proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationResult {
    /// Content matches and the receipt independently validates
    Confirmed { confirmed_at: DateTime<Utc> },
    /// Content matches; submission proven, timestamp not yet anchored
    Unconfirmed,
    /// Recomputed fingerprint differs from the claimed one
    ContentMismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },
    /// Claimed as confirmed but the receipt fails validation
    TamperedAnchor { reason: String },
    /// Content matches but the anchor was abandoned
    AnchorFailed { reason: String },
}

impl VerificationResult {
    pub fn name(&self) -> &'static str {
        match self {
            VerificationResult::Confirmed { .. } => "confirmed",
            VerificationResult::Unconfirmed => "unconfirmed",
            VerificationResult::ContentMismatch { .. } => "content_mismatch",
            VerificationResult::TamperedAnchor { .. } => "tampered_anchor",
            VerificationResult::AnchorFailed { .. } => "anchor_failed",
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, VerificationResult::Confirmed { .. })
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationResult::Confirmed { confirmed_at } => {
                write!(f, "confirmed at {}", confirmed_at.to_rfc3339())
            }
            VerificationResult::Unconfirmed => f.write_str("unconfirmed"),
            VerificationResult::ContentMismatch { expected, actual } => {
                write!(f, "content mismatch (expected {expected}, got {actual})")
            }
            VerificationResult::TamperedAnchor { reason } => {
                write!(f, "tampered anchor: {reason}")
            }
            VerificationResult::AnchorFailed { reason } => write!(f, "anchor failed: {reason}"),
        }
    }
}
