//! Trait definitions for the ledger's storage services

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{
    AuditEvent, AuditEventKind, DocumentIdentity, Fingerprint, MappingEntry, ProofRecord,
    ProofStatus, StatusEvidence,
};

use super::Result;

/// Durable store of proof records and the audit event log.
///
/// Invariant: every write appends exactly one audit event in the same atomic
/// unit as the record change. The store is the only writer of the log.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProofStore: Send + Sync {
    /// Persist a freshly submitted (`pending`) record.
    ///
    /// Fails with `DuplicateRecord` if the fingerprint already has one.
    async fn put(&self, record: ProofRecord) -> Result<AuditEvent>;

    /// Fetch the record for a fingerprint
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<ProofRecord>>;

    /// Move a record through its lifecycle.
    ///
    /// An identical repeat is a no-op and returns the stored record. Any
    /// change to a confirmed record fails with `ImmutableRecordViolation`.
    async fn update_status(
        &self,
        fingerprint: &Fingerprint,
        status: ProofStatus,
        evidence: StatusEvidence,
    ) -> Result<ProofRecord>;

    /// Records in a given status, oldest submission first
    async fn list_by_status(&self, status: ProofStatus) -> Result<Vec<ProofRecord>>;

    /// Every record, oldest submission first
    async fn list_all(&self) -> Result<Vec<ProofRecord>>;

    /// Append an event that does not change a record (mapping, verification).
    ///
    /// Fails with `RecordNotFound` if the fingerprint has no record.
    async fn append_event(
        &self,
        fingerprint: &Fingerprint,
        kind: AuditEventKind,
    ) -> Result<AuditEvent>;

    /// Events with a sequence number strictly greater than `after`, in order
    async fn events_since(&self, after: u64) -> Result<Vec<AuditEvent>>;

    /// At most `limit` events after `after`, in order
    async fn events_page(&self, after: u64, limit: usize) -> Result<Vec<AuditEvent>>;

    /// Highest sequence number written (0 for an empty log)
    async fn head_sequence(&self) -> Result<u64>;
}

/// Global correspondence table: document identity -> proof history.
///
/// References proof records by fingerprint only.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MappingIndex: Send + Sync {
    /// Bind a fingerprint to an identity.
    ///
    /// Returns `false` when the pair was already registered. Fails with
    /// `DanglingFingerprint` if the store holds no record for it.
    async fn register(
        &self,
        document: &DocumentIdentity,
        fingerprint: &Fingerprint,
        storage_location: &str,
    ) -> Result<bool>;

    /// Version history, oldest submission first
    async fn lookup(&self, document: &DocumentIdentity) -> Result<Vec<Fingerprint>>;

    /// Owning identity: the first one to register the fingerprint
    async fn lookup_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<DocumentIdentity>>;

    /// Every identity claiming the fingerprint, in registration order
    async fn owners(&self, fingerprint: &Fingerprint) -> Result<Vec<DocumentIdentity>>;

    async fn entry(&self, document: &DocumentIdentity) -> Result<Option<MappingEntry>>;

    /// All entries ordered by identity
    async fn entries(&self) -> Result<Vec<MappingEntry>>;

    /// Declare that `document` shares `fingerprint` with another identity on purpose.
    async fn mark_intentional_duplicate(
        &self,
        document: &DocumentIdentity,
        fingerprint: &Fingerprint,
    ) -> Result<()>;
}
