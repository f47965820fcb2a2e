//! End-to-end provenance scenarios, run against both storage backends.

mod common;

use chrono::{Duration as ChronoDuration, Utc};

use common::{audit_config, block_time, memory_ledger, sqlite_ledger, text_request, TestLedger};
use common::PRINCIPLE_VII;
use provenance_ledger::audit::{audit_events, AuditEngine};
use provenance_ledger::domain::{
    AuditEventKind, DocumentFormat, DocumentIdentity, FindingSeverity, ProofStatus,
    VerificationResult,
};
use provenance_ledger::verifier;

// ============================================================================
// Scenario A: submit, confirm, verify
// ============================================================================

async fn submit_confirm_verify(ledger: TestLedger) {
    assert_eq!(PRINCIPLE_VII.len(), 32);
    let receipt = ledger
        .service
        .submit(text_request("Principle-VII v1.0", PRINCIPLE_VII))
        .await
        .unwrap();
    assert_eq!(receipt.status, ProofStatus::Pending);
    assert!(receipt.created);
    assert!(receipt.registered);

    let worker = ledger.worker(3);
    let summary = worker.poll_once().await.unwrap();
    assert_eq!(summary.still_pending, 1);

    ledger.seal(block_time());
    let summary = worker.poll_once().await.unwrap();
    assert_eq!(summary.confirmed, 1);

    let record = ledger.store.get(&receipt.fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, ProofStatus::Confirmed);
    assert_eq!(record.confirmed_at, Some(block_time()));

    let result = ledger
        .service
        .verify_document(PRINCIPLE_VII.as_bytes(), DocumentFormat::Text, None)
        .await
        .unwrap();
    assert_eq!(
        result,
        VerificationResult::Confirmed {
            confirmed_at: block_time()
        }
    );

    // Third parties need nothing but the bytes and the record
    let offline =
        verifier::verify(PRINCIPLE_VII.as_bytes(), DocumentFormat::Text, &record).unwrap();
    assert!(offline.is_confirmed());

    let events = ledger.store.events_since(0).await.unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.kind.name()).collect();
    assert_eq!(names, vec!["submitted", "registered", "confirmed", "verified"]);

    let findings = AuditEngine::new(ledger.store.clone(), audit_config())
        .run_audit()
        .await
        .unwrap();
    assert!(findings.is_empty(), "unexpected findings: {findings:?}");
}

#[tokio::test]
async fn scenario_a_memory() {
    submit_confirm_verify(memory_ledger()).await;
}

#[tokio::test]
async fn scenario_a_sqlite() {
    submit_confirm_verify(sqlite_ledger().await).await;
}

// ============================================================================
// Scenario B: identical bytes under two identities
// ============================================================================

async fn duplicate_claim(ledger: TestLedger) {
    let a = ledger
        .service
        .submit(text_request("Doc-A", "shared body"))
        .await
        .unwrap();
    let b = ledger
        .service
        .submit(text_request("Doc-B", "shared body"))
        .await
        .unwrap();

    assert_eq!(a.fingerprint, b.fingerprint);
    assert!(a.created);
    assert!(!b.created);
    assert!(b.registered);
    assert_eq!(ledger.store.list_all().await.unwrap().len(), 1);

    let doc_a = DocumentIdentity::new("Doc-A");
    let doc_b = DocumentIdentity::new("Doc-B");
    assert_eq!(ledger.mapping.lookup(&doc_a).await.unwrap(), vec![a.fingerprint]);
    assert_eq!(ledger.mapping.lookup(&doc_b).await.unwrap(), vec![a.fingerprint]);

    let engine = AuditEngine::new(ledger.store.clone(), audit_config());
    let findings = engine.run_audit().await.unwrap();
    let duplicate = findings
        .iter()
        .find(|f| f.severity == FindingSeverity::DuplicateClaim)
        .expect("duplicate claim reported");
    assert_eq!(duplicate.fingerprint, Some(a.fingerprint));
    assert_eq!(duplicate.documents, vec![doc_a.clone(), doc_b.clone()]);

    ledger
        .mapping
        .mark_intentional_duplicate(&doc_b, &a.fingerprint)
        .await
        .unwrap();
    let findings = engine.run_audit().await.unwrap();
    assert!(findings
        .iter()
        .all(|f| f.severity != FindingSeverity::DuplicateClaim));
}

#[tokio::test]
async fn scenario_b_memory() {
    duplicate_claim(memory_ledger()).await;
}

#[tokio::test]
async fn scenario_b_sqlite() {
    duplicate_claim(sqlite_ledger().await).await;
}

// ============================================================================
// Scenario C: silent authority, stale then failed
// ============================================================================

async fn stale_then_failed(ledger: TestLedger) {
    let receipt = ledger
        .service
        .submit(text_request("Charter v2.0", "charter text"))
        .await
        .unwrap();
    ledger.calendar.set_hanging(true);

    let later = Utc::now() + ChronoDuration::hours(2);
    let events = ledger.store.events_since(0).await.unwrap();
    let findings = audit_events(&events, &audit_config(), later);
    assert!(findings.iter().any(|f| {
        f.severity == FindingSeverity::StaleAnchor && f.fingerprint == Some(receipt.fingerprint)
    }));

    // Not yet stale an hour early
    let findings = audit_events(&events, &audit_config(), Utc::now());
    assert!(findings
        .iter()
        .all(|f| f.severity != FindingSeverity::StaleAnchor));

    let worker = ledger.worker(2);
    for _ in 0..2 {
        let summary = worker.poll_once().await.unwrap();
        assert_eq!(summary.transient_errors, 1);
    }
    let summary = worker.poll_once().await.unwrap();
    assert_eq!(summary.failed, 1);

    let record = ledger.store.get(&receipt.fingerprint).await.unwrap().unwrap();
    assert_eq!(record.status, ProofStatus::Failed);
    assert!(record.failure.is_some());

    let events = ledger.store.events_since(0).await.unwrap();
    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(AuditEventKind::Failed { .. })
    ));
    let findings = audit_events(&events, &audit_config(), later);
    assert!(findings
        .iter()
        .all(|f| f.severity != FindingSeverity::StaleAnchor));
    assert!(findings
        .iter()
        .any(|f| f.severity == FindingSeverity::FailedAnchor));

    // Content still matches; the anchor is what failed
    let result = ledger
        .service
        .verify_document(b"charter text", DocumentFormat::Text, None)
        .await
        .unwrap();
    assert!(matches!(result, VerificationResult::AnchorFailed { .. }));
}

#[tokio::test]
async fn scenario_c_memory() {
    stale_then_failed(memory_ledger()).await;
}

#[tokio::test]
async fn scenario_c_sqlite() {
    stale_then_failed(sqlite_ledger().await).await;
}

// ============================================================================
// Scenario D: altered bytes
// ============================================================================

async fn altered_content(ledger: TestLedger) {
    let receipt = ledger
        .service
        .submit(text_request("Principle-VII v1.0", PRINCIPLE_VII))
        .await
        .unwrap();
    let altered = PRINCIPLE_VII.replace("truth", "trust");

    let pending = ledger.store.get(&receipt.fingerprint).await.unwrap().unwrap();
    let result = ledger
        .service
        .verify_document(altered.as_bytes(), DocumentFormat::Text, Some(pending))
        .await
        .unwrap();
    assert!(matches!(
        result,
        VerificationResult::ContentMismatch { expected, .. } if expected == receipt.fingerprint
    ));

    ledger.seal(block_time());
    ledger.worker(3).poll_once().await.unwrap();
    let confirmed = ledger.store.get(&receipt.fingerprint).await.unwrap().unwrap();
    assert!(confirmed.is_confirmed());

    let result = verifier::verify(altered.as_bytes(), DocumentFormat::Text, &confirmed).unwrap();
    assert!(matches!(result, VerificationResult::ContentMismatch { .. }));

    // Line-ending changes are not alterations
    let crlf = PRINCIPLE_VII.replace('\n', "\r\n");
    let result = verifier::verify(crlf.as_bytes(), DocumentFormat::Text, &confirmed).unwrap();
    assert!(result.is_confirmed());
}

#[tokio::test]
async fn scenario_d_memory() {
    altered_content(memory_ledger()).await;
}

#[tokio::test]
async fn scenario_d_sqlite() {
    altered_content(sqlite_ledger().await).await;
}

// ============================================================================
// Versions and resubmission
// ============================================================================

#[tokio::test]
async fn test_new_version_supersedes_previous() {
    let ledger = memory_ledger();
    let v1 = ledger
        .service
        .submit(text_request("Charter", "first draft"))
        .await
        .unwrap();
    let v2 = ledger
        .service
        .submit(text_request("Charter", "second draft"))
        .await
        .unwrap();

    let history = ledger
        .service
        .history(&DocumentIdentity::new("Charter"))
        .await
        .unwrap();
    assert_eq!(
        history.iter().map(|r| r.fingerprint).collect::<Vec<_>>(),
        vec![v1.fingerprint, v2.fingerprint]
    );
    assert_eq!(history[1].supersedes, Some(v1.fingerprint));

    // Resubmitting changes nothing and calls the authority only once per content
    let again = ledger
        .service
        .submit(text_request("Charter", "first draft"))
        .await
        .unwrap();
    assert!(!again.created);
    assert!(!again.registered);
    assert_eq!(ledger.calendar.submit_calls(), 2);
}

#[tokio::test]
async fn test_unsupported_content_rejected_before_anchoring() {
    let ledger = memory_ledger();
    let mut request = text_request("Config", "{not json");
    request.format = DocumentFormat::Json;

    assert!(ledger.service.submit(request).await.is_err());
    assert_eq!(ledger.calendar.submit_calls(), 0);
    assert_eq!(ledger.store.head_sequence().await.unwrap(), 0);
}
