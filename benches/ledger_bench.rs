//! Performance benchmarks for the provenance ledger.
//!
//! Run with: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use provenance_ledger::anchor::{AnchorClient, AnchorClientConfig, MemoryCalendar};
use provenance_ledger::crypto::{canonicalize, fingerprint, merkle_path, merkle_root, sha256};
use provenance_ledger::domain::{DocumentFormat, DocumentIdentity};
use provenance_ledger::infra::{MemoryMappingIndex, MemoryProofStore, ProofStore};
use provenance_ledger::service::{ProvenanceService, SubmitRequest};
use provenance_ledger::verifier;

fn text_document(lines: usize) -> Vec<u8> {
    (0..lines)
        .map(|i| format!("Clause {i}: the commons are held in trust.\r\n"))
        .collect::<String>()
        .into_bytes()
}

/// Canonicalization plus SHA-256 for each format
fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for lines in [10, 1_000, 10_000].iter() {
        let doc = text_document(*lines);
        group.throughput(Throughput::Bytes(doc.len() as u64));
        group.bench_with_input(BenchmarkId::new("text", lines), &doc, |b, doc| {
            b.iter(|| fingerprint(&canonicalize(black_box(doc), DocumentFormat::Text).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("binary", lines), &doc, |b, doc| {
            b.iter(|| fingerprint(&canonicalize(black_box(doc), DocumentFormat::Binary).unwrap()));
        });
    }

    let json = serde_json::to_vec(&json!({
        "title": "Charter",
        "generated_at": "2025-03-01T12:00:00Z",
        "clauses": (0..200).map(|i| json!({ "n": i, "text": "held in trust" })).collect::<Vec<_>>(),
    }))
    .unwrap();
    group.throughput(Throughput::Bytes(json.len() as u64));
    group.bench_function("json", |b| {
        b.iter(|| fingerprint(&canonicalize(black_box(&json), DocumentFormat::Json).unwrap()));
    });

    group.finish();
}

/// Merkle root and path construction
fn bench_merkle(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle");

    for count in [16, 256, 4096].iter() {
        let leaves: Vec<[u8; 32]> = (0..*count as u32).map(|i| sha256(&i.to_le_bytes())).collect();
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("root", count), &leaves, |b, leaves| {
            b.iter(|| merkle_root(black_box(leaves)));
        });
        group.bench_with_input(BenchmarkId::new("path", count), &leaves, |b, leaves| {
            b.iter(|| merkle_path(black_box(leaves), leaves.len() / 2));
        });
    }

    group.finish();
}

/// Submission through the in-memory pipeline, then offline verification
fn bench_submit_and_verify(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store: Arc<dyn ProofStore> = Arc::new(MemoryProofStore::new());
    let mapping = Arc::new(MemoryMappingIndex::new(store.clone()));
    let anchor = Arc::new(AnchorClient::new(
        Arc::new(MemoryCalendar::new()),
        AnchorClientConfig::default(),
    ));
    let service = Arc::new(ProvenanceService::new(store.clone(), mapping, anchor));

    let mut counter = 0u64;
    c.bench_function("submit_memory", |b| {
        b.to_async(&rt).iter(|| {
            counter += 1;
            let service = service.clone();
            let request = SubmitRequest {
                identity: DocumentIdentity::new(format!("Doc-{counter}")),
                bytes: format!("document body {counter}\n").into_bytes(),
                format: DocumentFormat::Text,
                storage_location: format!("docs/doc-{counter}.txt"),
            };
            async move { service.submit(request).await.unwrap() }
        });
    });

    let doc = text_document(1_000);
    let receipt = rt
        .block_on(service.submit(SubmitRequest {
            identity: DocumentIdentity::new("Charter v1.0"),
            bytes: doc.clone(),
            format: DocumentFormat::Text,
            storage_location: "docs/charter.txt".into(),
        }))
        .unwrap();
    let record = rt.block_on(store.get(&receipt.fingerprint)).unwrap().unwrap();

    c.bench_function("verify_text_1000_lines", |b| {
        b.iter(|| verifier::verify(black_box(&doc), DocumentFormat::Text, &record).unwrap());
    });
}

criterion_group!(benches, bench_fingerprint, bench_merkle, bench_submit_and_verify);
criterion_main!(benches);
