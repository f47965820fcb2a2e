//! Proof records and their anchor lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{AnchorHandle, AnchorReceipt, DocumentFormat, DocumentIdentity, Fingerprint};
use crate::infra::ProvenanceError;

/// Anchor lifecycle state of a proof record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStatus {
    /// Submitted to the authority, not yet included in a block
    Pending,
    /// Included in a block; record is immutable from here on
    Confirmed,
    /// Retry ceiling or confirmation deadline exhausted, or rejected by the authority
    Failed,
}

impl ProofStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofStatus::Pending => "pending",
            ProofStatus::Confirmed => "confirmed",
            ProofStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProofStatus::Pending)
    }
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofStatus {
    type Err = ProvenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProofStatus::Pending),
            "confirmed" => Ok(ProofStatus::Confirmed),
            "failed" => Ok(ProofStatus::Failed),
            other => Err(ProvenanceError::Internal(format!(
                "unknown proof status: {other}"
            ))),
        }
    }
}

/// Evidence accompanying a status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEvidence {
    None,
    Confirmation {
        confirmed_at: DateTime<Utc>,
        receipt: AnchorReceipt,
    },
    Failure {
        reason: String,
    },
}

/// Durable evidence object binding a fingerprint to its anchor lifecycle.
///
/// Keyed by fingerprint. Never references mapping entries; ownership runs
/// mapping -> fingerprint only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub fingerprint: Fingerprint,
    /// Identity the content was first submitted under
    pub document: DocumentIdentity,
    pub format: DocumentFormat,
    /// Size of the canonical bytes
    pub size_bytes: u64,
    /// Local clock at submission
    pub submitted_at: DateTime<Utc>,
    pub anchor: AnchorHandle,
    pub status: ProofStatus,
    /// Authority-asserted confirmation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<AnchorReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Previous version of the same document, if this record corrects or replaces it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Fingerprint>,
}

impl ProofRecord {
    /// Create a freshly submitted record.
    pub fn pending(
        fingerprint: Fingerprint,
        document: DocumentIdentity,
        format: DocumentFormat,
        size_bytes: u64,
        anchor: AnchorHandle,
    ) -> Self {
        Self {
            fingerprint,
            document,
            format,
            size_bytes,
            submitted_at: Utc::now(),
            anchor,
            status: ProofStatus::Pending,
            confirmed_at: None,
            receipt: None,
            failure: None,
            supersedes: None,
        }
    }

    pub fn with_submitted_at(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    pub fn superseding(mut self, previous: Fingerprint) -> Self {
        self.supersedes = Some(previous);
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ProofStatus::Confirmed
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProofStatus::Pending
    }

    /// Evidence currently held by the record, in the shape `update_status` takes.
    pub fn evidence(&self) -> StatusEvidence {
        match (self.status, &self.confirmed_at, &self.receipt, &self.failure) {
            (ProofStatus::Confirmed, Some(confirmed_at), Some(receipt), _) => {
                StatusEvidence::Confirmation {
                    confirmed_at: *confirmed_at,
                    receipt: receipt.clone(),
                }
            }
            (ProofStatus::Failed, _, _, Some(reason)) => StatusEvidence::Failure {
                reason: reason.clone(),
            },
            _ => StatusEvidence::None,
        }
    }

    /// Apply a validated transition. Callers enforce the lifecycle rules.
    pub(crate) fn apply(&mut self, status: ProofStatus, evidence: &StatusEvidence) {
        self.status = status;
        match evidence {
            StatusEvidence::Confirmation {
                confirmed_at,
                receipt,
            } => {
                self.confirmed_at = Some(*confirmed_at);
                self.receipt = Some(receipt.clone());
            }
            StatusEvidence::Failure { reason } => {
                self.failure = Some(reason.clone());
            }
            StatusEvidence::None => {}
        }
    }
}

/// Check a status transition against the record lifecycle.
///
/// Returns `Ok(false)` for an idempotent repeat that must not be written.
pub fn check_transition(
    record: &ProofRecord,
    new_status: ProofStatus,
    evidence: &StatusEvidence,
) -> Result<bool, ProvenanceError> {
    match (new_status, evidence) {
        (ProofStatus::Confirmed, StatusEvidence::Confirmation { .. }) => {}
        (ProofStatus::Failed, StatusEvidence::Failure { .. }) => {}
        (ProofStatus::Pending, StatusEvidence::None) => {}
        (status, _) => {
            return Err(ProvenanceError::MissingEvidence {
                fingerprint: record.fingerprint,
                status: status.to_string(),
            })
        }
    }

    match (record.status, new_status) {
        (ProofStatus::Confirmed, ProofStatus::Confirmed) if record.evidence() == *evidence => {
            Ok(false)
        }
        (ProofStatus::Confirmed, _) => {
            Err(ProvenanceError::ImmutableRecordViolation(record.fingerprint))
        }
        (ProofStatus::Pending, ProofStatus::Pending) => Ok(false),
        (ProofStatus::Pending, _) => Ok(true),
        (ProofStatus::Failed, ProofStatus::Failed) if record.evidence() == *evidence => Ok(false),
        (from, to) => Err(ProvenanceError::InvalidStateTransition {
            fingerprint: record.fingerprint,
            from: from.to_string(),
            to: to.to_string(),
        }),
    }
}
