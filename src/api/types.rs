//! Request and response bodies of the REST API.

use serde::{Deserialize, Serialize};

use crate::domain::{
    AuditEvent, DocumentIdentity, Finding, Fingerprint, MappingEntry, ProofRecord,
    VerificationResult,
};

/// Body of `POST /api/v1/documents`.
#[derive(Debug, Deserialize)]
pub struct SubmitDocumentRequest {
    pub identity: String,
    /// Format tag: `pdf`, `txt`, `md` or `json`
    pub format: String,
    /// Raw document bytes, standard base64
    pub content: String,
    /// Where the raw bytes live; defaults to the identity's slug
    #[serde(default)]
    pub storage_location: Option<String>,
}

/// Body of `POST /api/v1/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub format: String,
    pub content: String,
    /// Proof to check against; the ledger's own record when absent
    #[serde(default)]
    pub proof: Option<ProofRecord>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub fingerprint: Fingerprint,
    pub result: VerificationResult,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub identity: DocumentIdentity,
    pub versions: Vec<ProofRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<MappingEntry>,
}

/// Body of `POST /api/v1/documents/:identity/intentional-duplicates`.
#[derive(Debug, Deserialize)]
pub struct IntentionalDuplicateRequest {
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Serialize)]
pub struct FindingsResponse {
    pub head_sequence: u64,
    pub count: usize,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after: u64,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<AuditEvent>,
    /// Pass as `after` to continue
    pub next_after: u64,
}
