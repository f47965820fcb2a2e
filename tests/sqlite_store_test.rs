//! SQLite persistence tests: records, the audit log and the mapping survive
//! a reopen, and the log stays gap-free.

mod common;

use std::sync::Arc;

use common::{block_time, text_request, worker_config};
use provenance_ledger::anchor::{
    AnchorClient, AnchorClientConfig, ConfirmationWorker, MemoryCalendar,
};
use provenance_ledger::domain::{
    AnchorHandle, DocumentFormat, DocumentIdentity, Fingerprint, ProofRecord, ProofStatus,
    StatusEvidence,
};
use provenance_ledger::infra::{
    MappingIndex, ProofStore, ProvenanceError, RetryConfig, SqliteMappingIndex, SqliteProofStore,
};
use provenance_ledger::service::ProvenanceService;

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("ledger.db").display())
}

fn pending(byte: u8, name: &str) -> ProofRecord {
    ProofRecord::pending(
        Fingerprint([byte; 32]),
        DocumentIdentity::new(name),
        DocumentFormat::Binary,
        64,
        AnchorHandle::new("memory", format!("id-{byte}")),
    )
}

#[tokio::test]
async fn test_records_and_log_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = database_url(&dir);
    let calendar = Arc::new(MemoryCalendar::new());

    let fingerprint = {
        let store = Arc::new(SqliteProofStore::connect(&url).await.unwrap());
        let mapping = Arc::new(SqliteMappingIndex::new(store.clone()));
        let anchor = Arc::new(AnchorClient::new(
            calendar.clone(),
            AnchorClientConfig {
                submit_retry: RetryConfig::fast(),
                ..AnchorClientConfig::default()
            },
        ));
        let service = ProvenanceService::new(store.clone(), mapping, anchor.clone());
        let receipt = service
            .submit(text_request("Principle-VII v1.0", "body"))
            .await
            .unwrap();

        calendar.seal(&"cd".repeat(32), block_time()).unwrap();
        let worker = ConfirmationWorker::new(worker_config(3), store.clone(), anchor);
        assert_eq!(worker.poll_once().await.unwrap().confirmed, 1);
        store.pool().close().await;
        receipt.fingerprint
    };

    let store = Arc::new(SqliteProofStore::connect(&url).await.unwrap());
    let mapping = SqliteMappingIndex::new(store.clone());

    let record = store.get(&fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, ProofStatus::Confirmed);
    assert_eq!(record.confirmed_at, Some(block_time()));
    let receipt = record.receipt.expect("receipt persisted");
    assert_eq!(receipt.target_hash, fingerprint);

    assert_eq!(store.head_sequence().await.unwrap(), 3);
    let doc = DocumentIdentity::new("Principle-VII v1.0");
    assert_eq!(mapping.lookup(&doc).await.unwrap(), vec![fingerprint]);

    // Sequence numbering continues after the reopen
    let event = store.put(pending(9, "Later")).await.unwrap();
    assert_eq!(event.sequence, 4);
    let sequences: Vec<u64> = store
        .events_since(0)
        .await
        .unwrap()
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_failed_record_is_terminal() {
    let store = SqliteProofStore::connect("sqlite::memory:").await.unwrap();
    let record = pending(1, "Doc");
    let fp = record.fingerprint;
    store.put(record).await.unwrap();

    let failed = store
        .update_status(
            &fp,
            ProofStatus::Failed,
            StatusEvidence::Failure {
                reason: "rejected".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(failed.failure.as_deref(), Some("rejected"));

    // Failed is terminal too
    let err = store
        .update_status(&fp, ProofStatus::Pending, StatusEvidence::None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProvenanceError::InvalidStateTransition { .. } | ProvenanceError::MissingEvidence { .. }
    ));
    assert_eq!(store.head_sequence().await.unwrap(), 2);
}

#[tokio::test]
async fn test_duplicate_put_writes_nothing() {
    let store = SqliteProofStore::connect("sqlite::memory:").await.unwrap();
    store.put(pending(1, "Doc")).await.unwrap();
    assert!(matches!(
        store.put(pending(1, "Other")).await,
        Err(ProvenanceError::DuplicateRecord(_))
    ));
    assert_eq!(store.head_sequence().await.unwrap(), 1);
    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_mapping_rules() {
    let store = Arc::new(SqliteProofStore::connect("sqlite::memory:").await.unwrap());
    let mapping = SqliteMappingIndex::new(store.clone());
    let fp = Fingerprint([4u8; 32]);
    let a = DocumentIdentity::new("Doc-A");
    let b = DocumentIdentity::new("Doc-B");

    assert!(matches!(
        mapping.register(&a, &fp, "a.pdf").await,
        Err(ProvenanceError::DanglingFingerprint(_))
    ));
    assert_eq!(store.head_sequence().await.unwrap(), 0);

    store.put(pending(4, "Doc-A")).await.unwrap();
    assert!(mapping.register(&a, &fp, "a.pdf").await.unwrap());
    assert!(!mapping.register(&a, &fp, "a.pdf").await.unwrap());
    assert!(mapping.register(&b, &fp, "b.pdf").await.unwrap());

    assert_eq!(mapping.owners(&fp).await.unwrap(), vec![a.clone(), b.clone()]);
    assert_eq!(mapping.lookup_by_fingerprint(&fp).await.unwrap(), Some(a.clone()));

    assert!(matches!(
        mapping
            .mark_intentional_duplicate(&DocumentIdentity::new("Doc-C"), &fp)
            .await,
        Err(ProvenanceError::NotRegistered { .. })
    ));
    mapping.mark_intentional_duplicate(&b, &fp).await.unwrap();
    let entry = mapping.entry(&b).await.unwrap().unwrap();
    assert!(entry.intentional_duplicates.contains(&fp));
    assert_eq!(entry.versions[0].storage_location, "b.pdf");

    let entries = mapping.entries().await.unwrap();
    assert_eq!(
        entries.iter().map(|e| e.document.clone()).collect::<Vec<_>>(),
        vec![a, b]
    );
    // submitted, two registrations, one acknowledgement
    assert_eq!(store.head_sequence().await.unwrap(), 4);
}

#[tokio::test]
async fn test_supersedes_round_trip() {
    let store = SqliteProofStore::connect("sqlite::memory:").await.unwrap();
    store.put(pending(1, "Charter")).await.unwrap();
    store
        .put(pending(2, "Charter").superseding(Fingerprint([1u8; 32])))
        .await
        .unwrap();

    let record = store.get(&Fingerprint([2u8; 32])).await.unwrap().unwrap();
    assert_eq!(record.supersedes, Some(Fingerprint([1u8; 32])));
    assert_eq!(store.list_by_status(ProofStatus::Pending).await.unwrap().len(), 2);
}

fn client(calendar: Arc<MemoryCalendar>) -> Arc<AnchorClient> {
    Arc::new(AnchorClient::new(
        calendar,
        AnchorClientConfig {
            submit_retry: RetryConfig::fast(),
            ..AnchorClientConfig::default()
        },
    ))
}

#[tokio::test]
async fn test_pending_proofs_survive_offline_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = database_url(&dir);

    let (first, old_handle) = {
        let store = Arc::new(SqliteProofStore::connect(&url).await.unwrap());
        let mapping = Arc::new(SqliteMappingIndex::new(store.clone()));
        let anchor = client(Arc::new(MemoryCalendar::new()));
        let service = ProvenanceService::new(store.clone(), mapping, anchor);
        let receipt = service.submit(text_request("Charter v1.0", "draft")).await.unwrap();
        let record = store.get(&receipt.fingerprint).await.unwrap().unwrap();
        store.pool().close().await;
        (receipt.fingerprint, record.anchor)
    };

    // A new process gets a fresh in-process calendar
    let calendar = Arc::new(MemoryCalendar::new());
    let store = Arc::new(SqliteProofStore::connect(&url).await.unwrap());
    let mapping = Arc::new(SqliteMappingIndex::new(store.clone()));
    let anchor = client(calendar.clone());
    let service = ProvenanceService::new(store.clone(), mapping, anchor.clone());
    assert_eq!(service.resume().await.unwrap(), 1);

    let worker = ConfirmationWorker::new(worker_config(0), store.clone(), anchor);
    let summary = worker.poll_once().await.unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.still_pending, 1);
    assert!(store.get(&first).await.unwrap().unwrap().is_pending());

    // New submissions never reuse the earlier process's ids
    let second = service.submit(text_request("Manifesto v1.0", "new")).await.unwrap();
    let record = store.get(&second.fingerprint).await.unwrap().unwrap();
    assert_ne!(record.anchor.id, old_handle.id);

    calendar.seal(&"ef".repeat(32), block_time()).unwrap();
    let summary = worker.poll_once().await.unwrap();
    assert_eq!(summary.confirmed, 1);
    assert!(store.get(&first).await.unwrap().unwrap().is_pending());
}

#[tokio::test]
async fn test_events_page_limits_rows() {
    let store = SqliteProofStore::connect("sqlite::memory:").await.unwrap();
    for byte in 1..=5 {
        store.put(pending(byte, &format!("Doc {byte}"))).await.unwrap();
    }

    let page = store.events_page(1, 3).await.unwrap();
    assert_eq!(
        page.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![2, 3, 4]
    );
    assert!(store.events_page(5, 10).await.unwrap().is_empty());
}
