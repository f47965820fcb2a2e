//! Submission pipeline
//!
//! `ProvenanceService` ties the components together: canonicalize, fingerprint,
//! anchor, persist, register. Confirmation happens later in the
//! [`ConfirmationWorker`](crate::anchor::ConfirmationWorker).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::anchor::{verify_receipt, AnchorClient};
use crate::crypto::{canonicalize, fingerprint};
use crate::domain::{
    AnchorHandle, AnchorReceipt, AuditEventKind, DocumentFormat, DocumentIdentity, Fingerprint,
    ProofRecord, ProofStatus, StatusEvidence, VerificationResult,
};
use crate::infra::export::ProofAnnexes;
use crate::infra::import::{scan_stamped, StampedScan};
use crate::infra::{FingerprintLocks, MappingIndex, ProofStore, ProvenanceError, Result};
use crate::verifier;

/// Authority recorded for proofs anchored outside the ledger and imported.
pub const IMPORT_AUTHORITY: &str = "import";

/// A document to submit
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub identity: DocumentIdentity,
    pub bytes: Vec<u8>,
    pub format: DocumentFormat,
    /// Where the raw bytes live (path, URI, object key)
    pub storage_location: String,
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub fingerprint: Fingerprint,
    pub status: ProofStatus,
    /// A new proof record was created
    pub created: bool,
    /// The identity gained a new version
    pub registered: bool,
}

/// Counts of a stamped-tree import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub warnings: Vec<String>,
}

impl ImportReport {
    fn count(&mut self, status: ProofStatus) {
        self.imported += 1;
        match status {
            ProofStatus::Confirmed => self.confirmed += 1,
            ProofStatus::Failed => self.failed += 1,
            ProofStatus::Pending => {}
        }
    }
}

pub struct ProvenanceService {
    store: Arc<dyn ProofStore>,
    mapping: Arc<dyn MappingIndex>,
    anchor: Arc<AnchorClient>,
    locks: FingerprintLocks,
}

impl ProvenanceService {
    pub fn new(
        store: Arc<dyn ProofStore>,
        mapping: Arc<dyn MappingIndex>,
        anchor: Arc<AnchorClient>,
    ) -> Self {
        Self {
            store,
            mapping,
            anchor,
            locks: FingerprintLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProofStore> {
        &self.store
    }

    pub fn mapping(&self) -> &Arc<dyn MappingIndex> {
        &self.mapping
    }

    pub fn anchor(&self) -> &Arc<AnchorClient> {
        &self.anchor
    }

    /// Teach the anchor client the handles of persisted pending proofs so a
    /// restarted process never resubmits them.
    pub async fn resume(&self) -> Result<usize> {
        let pending = self.store.list_by_status(ProofStatus::Pending).await?;
        for record in &pending {
            self.anchor.remember(record.fingerprint, record.anchor.clone());
        }
        if !pending.is_empty() {
            info!(pending = pending.len(), "Resumed pending proofs");
        }
        Ok(pending.len())
    }

    async fn previous_version(
        &self,
        identity: &DocumentIdentity,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Fingerprint>> {
        Ok(self
            .mapping
            .entry(identity)
            .await?
            .and_then(|entry| entry.latest().map(|v| v.fingerprint))
            .filter(|latest| latest != fingerprint))
    }

    async fn create_record(
        &self,
        request: &SubmitRequest,
        format: DocumentFormat,
        fingerprint: Fingerprint,
        size_bytes: usize,
        anchor: AnchorHandle,
    ) -> Result<ProofRecord> {
        let mut record = ProofRecord::pending(
            fingerprint,
            request.identity.clone(),
            format,
            size_bytes as u64,
            anchor,
        );
        if let Some(previous) = self.previous_version(&request.identity, &fingerprint).await? {
            record = record.superseding(previous);
        }
        self.store.put(record.clone()).await?;
        Ok(record)
    }

    /// Submit a document for anchoring.
    ///
    /// Content already on record reuses the existing proof; the identity is
    /// still registered against it, which the audit reports as a duplicate
    /// claim when the identities differ.
    #[instrument(
        skip(self, request),
        fields(identity = %request.identity, format = request.format.as_str())
    )]
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt> {
        let canonical = canonicalize(&request.bytes, request.format)?;
        let fp = fingerprint(&canonical);
        let _writer = self.locks.acquire(&fp).await;

        let (status, created) = match self.store.get(&fp).await? {
            Some(existing) => {
                debug!(
                    fingerprint = %fp.short(),
                    status = %existing.status,
                    "Content already on record"
                );
                (existing.status, false)
            }
            None => {
                let handle = self.anchor.submit(&fp).await?;
                self.create_record(&request, request.format, fp, canonical.len(), handle)
                    .await?;
                (ProofStatus::Pending, true)
            }
        };

        let registered = self
            .mapping
            .register(&request.identity, &fp, &request.storage_location)
            .await?;

        info!(fingerprint = %fp.short(), created, registered, "Document submitted");
        Ok(SubmitReceipt {
            fingerprint: fp,
            status,
            created,
            registered,
        })
    }

    /// Record a document anchored elsewhere together with its receipt.
    ///
    /// The receipt is validated like any confirmation: a receipt that does
    /// not prove this content leaves the record `failed`. Outside services
    /// stamp the file as stored, so when only the raw bytes match the
    /// receipt the proof is kept for the raw bytes, recorded as binary.
    #[instrument(skip(self, request, receipt), fields(identity = %request.identity))]
    pub async fn submit_with_receipt(
        &self,
        request: SubmitRequest,
        receipt: AnchorReceipt,
    ) -> Result<SubmitReceipt> {
        let (format, canonical) = receipt_subject(&request, &receipt)?;
        let fp = fingerprint(&canonical);
        let _writer = self.locks.acquire(&fp).await;

        let (mut record, created) = match self.store.get(&fp).await? {
            Some(existing) => (existing, false),
            None => {
                let handle = AnchorHandle::new(
                    IMPORT_AUTHORITY,
                    receipt.proof_id.clone().unwrap_or_else(|| fp.to_hex()),
                );
                let record = self
                    .create_record(&request, format, fp, canonical.len(), handle)
                    .await?;
                (record, true)
            }
        };

        if record.is_pending() {
            let (status, evidence) = match verify_receipt(&receipt, &fp) {
                Ok(confirmed_at) => (
                    ProofStatus::Confirmed,
                    StatusEvidence::Confirmation {
                        confirmed_at,
                        receipt,
                    },
                ),
                Err(e) => {
                    warn!(
                        fingerprint = %fp.short(),
                        error = %e,
                        "Imported receipt does not validate"
                    );
                    (
                        ProofStatus::Failed,
                        StatusEvidence::Failure {
                            reason: format!("imported receipt rejected: {e}"),
                        },
                    )
                }
            };
            record = self.store.update_status(&fp, status, evidence).await?;
            self.anchor.forget(&fp);
        }

        let registered = self
            .mapping
            .register(&request.identity, &fp, &request.storage_location)
            .await?;

        Ok(SubmitReceipt {
            fingerprint: fp,
            status: record.status,
            created,
            registered,
        })
    }

    /// Verify bytes against a claimed proof, or against the ledger's own
    /// record for the content when no proof is supplied.
    ///
    /// Verifications of records held by this ledger are logged.
    #[instrument(skip(self, bytes, claimed), fields(format = format.as_str()))]
    pub async fn verify_document(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
        claimed: Option<ProofRecord>,
    ) -> Result<VerificationResult> {
        let canonical = canonicalize(bytes, format)?;
        let actual = fingerprint(&canonical);

        let claimed = match claimed {
            Some(record) => record,
            None => self
                .store
                .get(&actual)
                .await?
                .ok_or(ProvenanceError::RecordNotFound(actual))?,
        };

        let result = verifier::verify_fingerprint(&actual, &claimed);
        if self.store.get(&claimed.fingerprint).await?.is_some() {
            self.store
                .append_event(
                    &claimed.fingerprint,
                    AuditEventKind::Verified {
                        outcome: result.name().to_string(),
                    },
                )
                .await?;
        }

        info!(
            fingerprint = %claimed.fingerprint.short(),
            outcome = result.name(),
            "Verification complete"
        );
        Ok(result)
    }

    /// Proof records of an identity, oldest first.
    pub async fn history(&self, identity: &DocumentIdentity) -> Result<Vec<ProofRecord>> {
        let mut records = Vec::new();
        for fp in self.mapping.lookup(identity).await? {
            if let Some(record) = self.store.get(&fp).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn scan(root: &Path) -> Result<StampedScan> {
        let scan_root: PathBuf = root.to_path_buf();
        tokio::task::spawn_blocking(move || scan_stamped(&scan_root))
            .await
            .map_err(|e| ProvenanceError::Internal(format!("import scan: {e}")))?
    }

    /// Import every paired document under `root/stamped/`.
    #[instrument(skip(self))]
    pub async fn import_stamped(&self, root: &Path) -> Result<ImportReport> {
        let scan = Self::scan(root).await?;
        let mut report = ImportReport {
            warnings: scan.warnings,
            ..ImportReport::default()
        };

        for doc in scan.documents {
            let bytes = tokio::fs::read(&doc.document_path).await?;
            let request = SubmitRequest {
                identity: doc.identity,
                bytes,
                format: doc.format,
                storage_location: doc.storage_location,
            };
            let outcome = self.submit_with_receipt(request, doc.receipt).await?;
            report.count(outcome.status);
        }

        info!(
            imported = report.imported,
            confirmed = report.confirmed,
            failed = report.failed,
            warnings = report.warnings.len(),
            "Stamped import complete"
        );
        Ok(report)
    }

    /// What `import_stamped` would do, without writing anything.
    #[instrument(skip(self))]
    pub async fn preview_stamped(&self, root: &Path) -> Result<ImportReport> {
        let scan = Self::scan(root).await?;
        let mut report = ImportReport {
            warnings: scan.warnings,
            ..ImportReport::default()
        };

        for doc in scan.documents {
            let bytes = tokio::fs::read(&doc.document_path).await?;
            let request = SubmitRequest {
                identity: doc.identity,
                bytes,
                format: doc.format,
                storage_location: doc.storage_location,
            };
            let (_, subject) = receipt_subject(&request, &doc.receipt)?;
            let fp = fingerprint(&subject);

            let status = match self.store.get(&fp).await? {
                Some(existing) if !existing.is_pending() => existing.status,
                _ => match verify_receipt(&doc.receipt, &fp) {
                    Ok(_) => ProofStatus::Confirmed,
                    Err(_) => ProofStatus::Failed,
                },
            };
            debug!(
                identity = %request.identity,
                fingerprint = %fp.short(),
                status = %status,
                "Would import"
            );
            report.count(status);
        }
        Ok(report)
    }

    /// Receipt annexes of the stamped tree, keyed by storage location.
    pub async fn stamped_annexes(&self, root: &Path) -> Result<HashMap<String, ProofAnnexes>> {
        Ok(Self::scan(root).await?.annexes())
    }
}

/// Format and bytes a stamped receipt is checked against.
fn receipt_subject(
    request: &SubmitRequest,
    receipt: &AnchorReceipt,
) -> Result<(DocumentFormat, Vec<u8>)> {
    let canonical = canonicalize(&request.bytes, request.format)?;
    if fingerprint(&canonical) != receipt.target_hash
        && fingerprint(&request.bytes) == receipt.target_hash
    {
        debug!(
            format = request.format.as_str(),
            "Receipt proves the raw file, recording it as binary"
        );
        return Ok((DocumentFormat::Binary, request.bytes.clone()));
    }
    Ok((request.format, canonical))
}

struct IntakeJob {
    request: SubmitRequest,
    reply: oneshot::Sender<Result<SubmitReceipt>>,
}

/// Bounded queue feeding submissions to a fixed set of workers.
pub struct IntakeQueue {
    tx: mpsc::Sender<IntakeJob>,
    workers: Vec<JoinHandle<()>>,
}

impl IntakeQueue {
    pub fn spawn(service: Arc<ProvenanceService>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<IntakeJob>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let service = service.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else {
                            debug!(worker, "Intake worker stopping");
                            break;
                        };
                        let result = service.submit(job.request).await;
                        // Caller may have stopped waiting
                        let _ = job.reply.send(result);
                    }
                })
            })
            .collect();

        Self { tx, workers }
    }

    /// Queue a submission; the receiver yields its outcome.
    pub async fn enqueue(
        &self,
        request: SubmitRequest,
    ) -> Result<oneshot::Receiver<Result<SubmitReceipt>>> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(IntakeJob { request, reply })
            .await
            .map_err(|_| ProvenanceError::Internal("intake queue closed".to_string()))?;
        Ok(outcome)
    }

    /// Queue a submission and wait for it.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt> {
        self.enqueue(request)
            .await?
            .await
            .map_err(|_| ProvenanceError::Internal("intake worker dropped job".to_string()))?
    }

    /// Stop accepting work and wait for queued jobs to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Intake worker panicked");
            }
        }
    }
}
