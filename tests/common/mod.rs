//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use provenance_ledger::anchor::{
    AnchorClient, AnchorClientConfig, ConfirmationWorker, MemoryCalendar, WorkerConfig,
};
use provenance_ledger::audit::AuditConfig;
use provenance_ledger::domain::{DocumentFormat, DocumentIdentity};
use provenance_ledger::infra::{
    MappingIndex, MemoryMappingIndex, MemoryProofStore, ProofStore, RetryConfig,
    SqliteMappingIndex, SqliteProofStore,
};
use provenance_ledger::service::{ProvenanceService, SubmitRequest};

/// A ledger wired to the in-process calendar.
pub struct TestLedger {
    pub calendar: Arc<MemoryCalendar>,
    pub store: Arc<dyn ProofStore>,
    pub mapping: Arc<dyn MappingIndex>,
    pub anchor: Arc<AnchorClient>,
    pub service: Arc<ProvenanceService>,
}

impl TestLedger {
    /// Confirmation worker polling immediately, with the given retry ceiling
    pub fn worker(&self, retry_ceiling: u32) -> ConfirmationWorker {
        ConfirmationWorker::new(
            worker_config(retry_ceiling),
            self.store.clone(),
            self.anchor.clone(),
        )
    }

    /// Anchor everything the calendar holds in one synthetic transaction
    pub fn seal(&self, at: DateTime<Utc>) {
        self.calendar
            .seal(&"ab".repeat(32), at)
            .expect("calendar had nothing to seal");
    }
}

fn anchor_client(calendar: Arc<MemoryCalendar>) -> Arc<AnchorClient> {
    Arc::new(AnchorClient::new(
        calendar,
        AnchorClientConfig {
            submit_retry: RetryConfig::fast(),
            refresh_timeout: Duration::from_millis(50),
        },
    ))
}

fn assemble(
    calendar: Arc<MemoryCalendar>,
    store: Arc<dyn ProofStore>,
    mapping: Arc<dyn MappingIndex>,
) -> TestLedger {
    let anchor = anchor_client(calendar.clone());
    let service = Arc::new(ProvenanceService::new(
        store.clone(),
        mapping.clone(),
        anchor.clone(),
    ));
    TestLedger {
        calendar,
        store,
        mapping,
        anchor,
        service,
    }
}

/// Ledger backed by the in-memory store and index
pub fn memory_ledger() -> TestLedger {
    let store: Arc<dyn ProofStore> = Arc::new(MemoryProofStore::new());
    let mapping: Arc<dyn MappingIndex> = Arc::new(MemoryMappingIndex::new(store.clone()));
    assemble(Arc::new(MemoryCalendar::new()), store, mapping)
}

/// Ledger backed by an in-memory SQLite database
pub async fn sqlite_ledger() -> TestLedger {
    let sqlite = Arc::new(
        SqliteProofStore::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite"),
    );
    let mapping: Arc<dyn MappingIndex> = Arc::new(SqliteMappingIndex::new(sqlite.clone()));
    assemble(Arc::new(MemoryCalendar::new()), sqlite, mapping)
}

pub fn worker_config(retry_ceiling: u32) -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        backoff: RetryConfig::fast()
            .with_initial_delay(Duration::ZERO)
            .with_jitter(0.0),
        retry_ceiling,
        confirmation_deadline: None,
        max_concurrent_polls: 4,
    }
}

pub fn audit_config() -> AuditConfig {
    AuditConfig::new(Duration::from_secs(3600))
}

/// Plain-text submission
pub fn text_request(identity: &str, body: &str) -> SubmitRequest {
    SubmitRequest {
        identity: DocumentIdentity::new(identity),
        bytes: body.as_bytes().to_vec(),
        format: DocumentFormat::Text,
        storage_location: format!("docs/{}.txt", DocumentIdentity::new(identity).slug()),
    }
}

/// Exactly 32 bytes of text
pub const PRINCIPLE_VII: &str = "Principle VII: truth persists..\n";

/// Fixed confirmation time for reproducible assertions
pub fn block_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}
