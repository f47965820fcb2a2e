//! Append-only audit events
//!
//! Every state transition of the ledger is recorded as one event with a
//! gapless, strictly increasing sequence number. The log is the sole input of
//! the audit engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AnchorHandle, DocumentIdentity, Fingerprint, ProofRecord, StatusEvidence};

/// What happened, with the data needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Proof record created `pending`
    Submitted {
        document: DocumentIdentity,
        submitted_at: DateTime<Utc>,
        anchor: AnchorHandle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        supersedes: Option<Fingerprint>,
    },
    /// Authority confirmed blockchain inclusion
    Confirmed {
        confirmed_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx_id: Option<String>,
    },
    /// Anchor abandoned
    Failed { reason: String },
    /// Mapping registered the fingerprint under an identity
    Registered {
        document: DocumentIdentity,
        storage_location: String,
    },
    /// Identity declared its claim on a shared fingerprint as intentional
    DuplicateAcknowledged { document: DocumentIdentity },
    /// A verification was performed against the record
    Verified { outcome: String },
}

impl AuditEventKind {
    /// Event recording the creation of a pending record.
    pub fn submitted(record: &ProofRecord) -> Self {
        AuditEventKind::Submitted {
            document: record.document.clone(),
            submitted_at: record.submitted_at,
            anchor: record.anchor.clone(),
            supersedes: record.supersedes,
        }
    }

    /// Event recording a status change; `None` for evidence that changes nothing.
    pub fn from_evidence(evidence: &StatusEvidence) -> Option<Self> {
        match evidence {
            StatusEvidence::Confirmation {
                confirmed_at,
                receipt,
            } => Some(AuditEventKind::Confirmed {
                confirmed_at: *confirmed_at,
                tx_id: receipt.primary_tx_id().map(str::to_string),
            }),
            StatusEvidence::Failure { reason } => Some(AuditEventKind::Failed {
                reason: reason.clone(),
            }),
            StatusEvidence::None => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuditEventKind::Submitted { .. } => "submitted",
            AuditEventKind::Confirmed { .. } => "confirmed",
            AuditEventKind::Failed { .. } => "failed",
            AuditEventKind::Registered { .. } => "registered",
            AuditEventKind::DuplicateAcknowledged { .. } => "duplicate_acknowledged",
            AuditEventKind::Verified { .. } => "verified",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the audit log. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

impl AuditEvent {
    pub fn new(sequence: u64, fingerprint: Fingerprint, kind: AuditEventKind) -> Self {
        Self {
            sequence,
            recorded_at: Utc::now(),
            fingerprint,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat_with_tag() {
        let event = AuditEvent::new(
            4,
            Fingerprint([2u8; 32]),
            AuditEventKind::Registered {
                document: DocumentIdentity::new("Doc-A"),
                storage_location: "docs/a.pdf".into(),
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["sequence"], 4);
        assert_eq!(value["event"], "registered");
        assert_eq!(value["document"], "Doc-A");
        assert_eq!(value["fingerprint"], "02".repeat(32));

        let back: AuditEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
