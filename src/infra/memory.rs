//! In-memory proof store and mapping index
//!
//! Used by tests, benches and offline tooling. Same contracts as the SQLite
//! implementations, no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::domain::{
    check_transition, AuditEvent, AuditEventKind, DocumentIdentity, Fingerprint, MappingEntry,
    ProofRecord, ProofStatus, StatusEvidence, VersionRef,
};

use super::locks::FingerprintLocks;
use super::{MappingIndex, ProofStore, ProvenanceError, Result};

fn by_submission(records: &mut [ProofRecord]) {
    records.sort_by(|a, b| {
        (a.submitted_at, a.fingerprint).cmp(&(b.submitted_at, b.fingerprint))
    });
}

/// Proof store backed by process memory.
#[derive(Default)]
pub struct MemoryProofStore {
    records: RwLock<HashMap<Fingerprint, ProofRecord>>,
    /// Append lock; the next sequence number is `len + 1`
    log: Mutex<Vec<AuditEvent>>,
    locks: FingerprintLocks,
}

impl MemoryProofStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProofStore for MemoryProofStore {
    async fn put(&self, record: ProofRecord) -> Result<AuditEvent> {
        let fingerprint = record.fingerprint;
        let _writer = self.locks.acquire(&fingerprint).await;

        if record.status != ProofStatus::Pending {
            return Err(ProvenanceError::InvalidStateTransition {
                fingerprint,
                from: "none".to_string(),
                to: record.status.to_string(),
            });
        }
        if self.records.read().await.contains_key(&fingerprint) {
            return Err(ProvenanceError::DuplicateRecord(fingerprint));
        }

        let mut log = self.log.lock().await;
        let event = AuditEvent::new(
            log.len() as u64 + 1,
            fingerprint,
            AuditEventKind::submitted(&record),
        );
        log.push(event.clone());
        self.records.write().await.insert(fingerprint, record);

        debug!(
            fingerprint = %fingerprint.short(),
            sequence = event.sequence,
            "Stored pending proof record"
        );
        Ok(event)
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<ProofRecord>> {
        Ok(self.records.read().await.get(fingerprint).cloned())
    }

    async fn update_status(
        &self,
        fingerprint: &Fingerprint,
        status: ProofStatus,
        evidence: StatusEvidence,
    ) -> Result<ProofRecord> {
        let _writer = self.locks.acquire(fingerprint).await;

        let mut record = self
            .records
            .read()
            .await
            .get(fingerprint)
            .cloned()
            .ok_or(ProvenanceError::RecordNotFound(*fingerprint))?;

        if !check_transition(&record, status, &evidence)? {
            return Ok(record);
        }
        let kind = AuditEventKind::from_evidence(&evidence).ok_or_else(|| {
            ProvenanceError::Internal(format!("no event for transition to {status}"))
        })?;
        record.apply(status, &evidence);

        let mut log = self.log.lock().await;
        let event = AuditEvent::new(log.len() as u64 + 1, *fingerprint, kind);
        log.push(event);
        self.records
            .write()
            .await
            .insert(*fingerprint, record.clone());

        Ok(record)
    }

    async fn list_by_status(&self, status: ProofStatus) -> Result<Vec<ProofRecord>> {
        let mut records: Vec<ProofRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        by_submission(&mut records);
        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<ProofRecord>> {
        let mut records: Vec<ProofRecord> = self.records.read().await.values().cloned().collect();
        by_submission(&mut records);
        Ok(records)
    }

    async fn append_event(
        &self,
        fingerprint: &Fingerprint,
        kind: AuditEventKind,
    ) -> Result<AuditEvent> {
        let _writer = self.locks.acquire(fingerprint).await;

        if !self.records.read().await.contains_key(fingerprint) {
            return Err(ProvenanceError::RecordNotFound(*fingerprint));
        }

        let mut log = self.log.lock().await;
        let event = AuditEvent::new(log.len() as u64 + 1, *fingerprint, kind);
        log.push(event.clone());
        Ok(event)
    }

    async fn events_since(&self, after: u64) -> Result<Vec<AuditEvent>> {
        let log = self.log.lock().await;
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(log.len());
        Ok(log[start..].to_vec())
    }

    async fn events_page(&self, after: u64, limit: usize) -> Result<Vec<AuditEvent>> {
        let log = self.log.lock().await;
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(log.len());
        Ok(log[start..].iter().take(limit).cloned().collect())
    }

    async fn head_sequence(&self) -> Result<u64> {
        Ok(self.log.lock().await.len() as u64)
    }
}

#[derive(Default)]
struct MappingState {
    entries: BTreeMap<DocumentIdentity, MappingEntry>,
    /// Claimants per fingerprint in registration order
    owners: HashMap<Fingerprint, Vec<DocumentIdentity>>,
}

/// Mapping index backed by process memory.
pub struct MemoryMappingIndex {
    store: Arc<dyn ProofStore>,
    state: RwLock<MappingState>,
}

impl MemoryMappingIndex {
    pub fn new(store: Arc<dyn ProofStore>) -> Self {
        Self {
            store,
            state: RwLock::new(MappingState::default()),
        }
    }
}

#[async_trait]
impl MappingIndex for MemoryMappingIndex {
    async fn register(
        &self,
        document: &DocumentIdentity,
        fingerprint: &Fingerprint,
        storage_location: &str,
    ) -> Result<bool> {
        let record = self
            .store
            .get(fingerprint)
            .await?
            .ok_or(ProvenanceError::DanglingFingerprint(*fingerprint))?;

        let mut state = self.state.write().await;
        if state
            .entries
            .get(document)
            .map(|e| e.contains(fingerprint))
            .unwrap_or(false)
        {
            return Ok(false);
        }

        self.store
            .append_event(
                fingerprint,
                AuditEventKind::Registered {
                    document: document.clone(),
                    storage_location: storage_location.to_string(),
                },
            )
            .await?;

        state
            .entries
            .entry(document.clone())
            .or_insert_with(|| MappingEntry::new(document.clone()))
            .insert_version(VersionRef {
                fingerprint: *fingerprint,
                submitted_at: record.submitted_at,
                storage_location: storage_location.to_string(),
            });
        state
            .owners
            .entry(*fingerprint)
            .or_default()
            .push(document.clone());

        debug!(document = %document, fingerprint = %fingerprint.short(), "Registered mapping");
        Ok(true)
    }

    async fn lookup(&self, document: &DocumentIdentity) -> Result<Vec<Fingerprint>> {
        Ok(self
            .state
            .read()
            .await
            .entries
            .get(document)
            .map(MappingEntry::fingerprints)
            .unwrap_or_default())
    }

    async fn lookup_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<DocumentIdentity>> {
        Ok(self
            .state
            .read()
            .await
            .owners
            .get(fingerprint)
            .and_then(|owners| owners.first().cloned()))
    }

    async fn owners(&self, fingerprint: &Fingerprint) -> Result<Vec<DocumentIdentity>> {
        Ok(self
            .state
            .read()
            .await
            .owners
            .get(fingerprint)
            .cloned()
            .unwrap_or_default())
    }

    async fn entry(&self, document: &DocumentIdentity) -> Result<Option<MappingEntry>> {
        Ok(self.state.read().await.entries.get(document).cloned())
    }

    async fn entries(&self) -> Result<Vec<MappingEntry>> {
        Ok(self.state.read().await.entries.values().cloned().collect())
    }

    async fn mark_intentional_duplicate(
        &self,
        document: &DocumentIdentity,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(document)
            .filter(|e| e.contains(fingerprint))
            .ok_or_else(|| ProvenanceError::NotRegistered {
                document: document.to_string(),
                fingerprint: *fingerprint,
            })?;

        if entry.intentional_duplicates.contains(fingerprint) {
            return Ok(());
        }

        self.store
            .append_event(
                fingerprint,
                AuditEventKind::DuplicateAcknowledged {
                    document: document.clone(),
                },
            )
            .await?;
        entry.intentional_duplicates.insert(*fingerprint);
        Ok(())
    }
}
