//! SeedCheck audit engine
//!
//! Replays the audit event log and reports integrity anomalies as findings.
//! The engine only reads: it never writes to the store or the mapping, and a
//! run always completes with the full list of findings.
//!
//! Replay state lives in an [`AuditCheckpoint`], so a long-running process can
//! resume from the last sequence it saw instead of replaying from the start.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::domain::{
    AuditEvent, AuditEventKind, DocumentIdentity, Finding, FindingSeverity, Fingerprint,
};
use crate::infra::{ProofStore, ProvenanceError, Result};

/// Audit configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Pending records older than this without a terminal event are stale
    pub staleness_threshold: Duration,
}

impl AuditConfig {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self {
            staleness_threshold,
        }
    }

    /// Load from `ANCHOR_STALENESS_SECS`, which has no default.
    pub fn from_env() -> Result<Self> {
        let secs: u64 = std::env::var("ANCHOR_STALENESS_SECS")
            .map_err(|_| {
                ProvenanceError::Configuration("ANCHOR_STALENESS_SECS must be set".to_string())
            })?
            .parse()
            .map_err(|e| ProvenanceError::Configuration(format!("ANCHOR_STALENESS_SECS: {e}")))?;
        Ok(Self::new(Duration::from_secs(secs)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum Outcome {
    Confirmed,
    Failed { reason: String },
}

/// What the log says about one fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct FingerprintHistory {
    submitted_at: Option<DateTime<Utc>>,
    submitted_seq: Option<u64>,
    outcome: Option<Outcome>,
    /// Claiming identities in registration order; the first one owns it
    claims: Vec<DocumentIdentity>,
    first_claim_seq: Option<u64>,
    intentional: BTreeSet<DocumentIdentity>,
}

/// Replay state after the last audited event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCheckpoint {
    last_sequence: u64,
    fingerprints: BTreeMap<Fingerprint, FingerprintHistory>,
    /// Sequence anomalies found so far
    sequence_findings: Vec<Finding>,
}

impl AuditCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Fold events into the replay state.
    pub fn replay<'a>(&mut self, events: impl IntoIterator<Item = &'a AuditEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: &AuditEvent) {
        let expected = self.last_sequence + 1;
        if event.sequence < expected {
            self.sequence_findings.push(
                Finding::new(
                    FindingSeverity::SequenceGap,
                    format!(
                        "sequence {} is not greater than previous {}",
                        event.sequence, self.last_sequence
                    ),
                )
                .fingerprint(event.fingerprint)
                .sequence(event.sequence),
            );
        } else if event.sequence > expected {
            let missing = event.sequence - expected;
            self.sequence_findings.push(
                Finding::new(
                    FindingSeverity::SequenceGap,
                    format!(
                        "{missing} event(s) missing between sequence {} and {}",
                        self.last_sequence, event.sequence
                    ),
                )
                .sequence(event.sequence),
            );
        }
        self.last_sequence = self.last_sequence.max(event.sequence);

        let history = self.fingerprints.entry(event.fingerprint).or_default();
        match &event.kind {
            AuditEventKind::Submitted { submitted_at, .. } => {
                history.submitted_at.get_or_insert(*submitted_at);
                history.submitted_seq.get_or_insert(event.sequence);
            }
            AuditEventKind::Confirmed { .. } => history.outcome = Some(Outcome::Confirmed),
            AuditEventKind::Failed { reason } => {
                history.outcome = Some(Outcome::Failed {
                    reason: reason.clone(),
                })
            }
            AuditEventKind::Registered { document, .. } => {
                if !history.claims.contains(document) {
                    history.claims.push(document.clone());
                }
                history.first_claim_seq.get_or_insert(event.sequence);
            }
            AuditEventKind::DuplicateAcknowledged { document } => {
                history.intentional.insert(document.clone());
            }
            AuditEventKind::Verified { .. } => {}
        }
    }

    /// Findings for the replayed state as of `now`.
    pub fn findings(&self, config: &AuditConfig, now: DateTime<Utc>) -> Vec<Finding> {
        let mut findings = self.sequence_findings.clone();

        for (fingerprint, history) in &self.fingerprints {
            let fp = *fingerprint;

            if history.submitted_seq.is_none() && !history.claims.is_empty() {
                let mut finding = Finding::new(
                    FindingSeverity::Orphaned,
                    "mapping references a fingerprint with no proof record",
                )
                .fingerprint(fp)
                .documents(history.claims.clone());
                if let Some(seq) = history.first_claim_seq {
                    finding = finding.sequence(seq);
                }
                findings.push(finding);
            }

            if let Some(seq) = history.submitted_seq {
                if history.claims.is_empty() {
                    findings.push(
                        Finding::new(
                            FindingSeverity::Orphaned,
                            "proof record has no owning mapping entry",
                        )
                        .fingerprint(fp)
                        .sequence(seq),
                    );
                }
            }

            let unacknowledged = history
                .claims
                .iter()
                .skip(1)
                .any(|claim| !history.intentional.contains(claim));
            if unacknowledged {
                let names: Vec<&str> = history.claims.iter().map(|d| d.as_str()).collect();
                findings.push(
                    Finding::new(
                        FindingSeverity::DuplicateClaim,
                        format!("fingerprint claimed by {}", names.join(", ")),
                    )
                    .fingerprint(fp)
                    .documents(history.claims.clone()),
                );
            }

            match (&history.outcome, history.submitted_at) {
                (None, Some(submitted_at)) => {
                    let age = now.signed_duration_since(submitted_at);
                    if age.to_std().is_ok_and(|age| age > config.staleness_threshold) {
                        findings.push(
                            Finding::new(
                                FindingSeverity::StaleAnchor,
                                format!(
                                    "pending for {}s, threshold {}s",
                                    age.num_seconds(),
                                    config.staleness_threshold.as_secs()
                                ),
                            )
                            .fingerprint(fp)
                            .documents(history.claims.clone()),
                        );
                    }
                }
                (Some(Outcome::Failed { reason }), _) => {
                    let message = format!("anchor failed: {reason}");
                    findings.push(
                        Finding::new(FindingSeverity::FailedAnchor, message)
                            .fingerprint(fp)
                            .documents(history.claims.clone()),
                    );
                }
                _ => {}
            }
        }

        findings
    }
}

/// Audit a complete event log as of `now`.
pub fn audit_events(
    events: &[AuditEvent],
    config: &AuditConfig,
    now: DateTime<Utc>,
) -> Vec<Finding> {
    let mut checkpoint = AuditCheckpoint::new();
    checkpoint.replay(events);
    checkpoint.findings(config, now)
}

/// Read-only auditor over a proof store's event log.
pub struct AuditEngine {
    store: Arc<dyn ProofStore>,
    config: AuditConfig,
}

impl AuditEngine {
    pub fn new(store: Arc<dyn ProofStore>, config: AuditConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Replay the whole log.
    #[instrument(skip(self))]
    pub async fn run_audit(&self) -> Result<Vec<Finding>> {
        let mut checkpoint = AuditCheckpoint::new();
        self.run_incremental(&mut checkpoint).await
    }

    /// Replay events after `checkpoint` and report findings for the whole
    /// history seen so far.
    #[instrument(skip(self, checkpoint), fields(from = checkpoint.last_sequence))]
    pub async fn run_incremental(&self, checkpoint: &mut AuditCheckpoint) -> Result<Vec<Finding>> {
        let events = self.store.events_since(checkpoint.last_sequence).await?;
        checkpoint.replay(&events);
        let findings = checkpoint.findings(&self.config, Utc::now());
        info!(
            replayed = events.len(),
            head = checkpoint.last_sequence,
            findings = findings.len(),
            "Audit complete"
        );
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AnchorHandle;
    use crate::infra::MockProofStore;
    use chrono::Duration as ChronoDuration;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint([byte; 32])
    }

    fn doc(name: &str) -> DocumentIdentity {
        DocumentIdentity::new(name)
    }

    fn submitted(seq: u64, f: Fingerprint, at: DateTime<Utc>) -> AuditEvent {
        AuditEvent::new(
            seq,
            f,
            AuditEventKind::Submitted {
                document: doc("Doc-A"),
                submitted_at: at,
                anchor: AnchorHandle::new("memory", format!("mem-{seq}")),
                supersedes: None,
            },
        )
    }

    fn registered(seq: u64, f: Fingerprint, name: &str) -> AuditEvent {
        AuditEvent::new(
            seq,
            f,
            AuditEventKind::Registered {
                document: doc(name),
                storage_location: format!("docs/{name}.pdf"),
            },
        )
    }

    fn confirmed(seq: u64, f: Fingerprint) -> AuditEvent {
        AuditEvent::new(
            seq,
            f,
            AuditEventKind::Confirmed {
                confirmed_at: Utc::now(),
                tx_id: None,
            },
        )
    }

    fn config() -> AuditConfig {
        AuditConfig::new(Duration::from_secs(3600))
    }

    fn severities(findings: &[Finding]) -> Vec<FindingSeverity> {
        findings.iter().map(|f| f.severity).collect()
    }

    #[test]
    fn test_clean_log_has_no_findings() {
        let now = Utc::now();
        let events = vec![
            submitted(1, fp(1), now),
            registered(2, fp(1), "Doc-A"),
            confirmed(3, fp(1)),
        ];
        assert!(audit_events(&events, &config(), now).is_empty());
    }

    #[test]
    fn test_duplicate_claim_names_both_identities() {
        let now = Utc::now();
        let events = vec![
            submitted(1, fp(1), now),
            registered(2, fp(1), "Doc-A"),
            registered(3, fp(1), "Doc-B"),
            confirmed(4, fp(1)),
        ];
        let findings = audit_events(&events, &config(), now);
        assert_eq!(severities(&findings), vec![FindingSeverity::DuplicateClaim]);
        assert_eq!(findings[0].documents, vec![doc("Doc-A"), doc("Doc-B")]);
    }

    #[test]
    fn test_intentional_duplicate_suppressed() {
        let now = Utc::now();
        let events = vec![
            submitted(1, fp(1), now),
            registered(2, fp(1), "Doc-A"),
            registered(3, fp(1), "Doc-B"),
            AuditEvent::new(
                4,
                fp(1),
                AuditEventKind::DuplicateAcknowledged {
                    document: doc("Doc-B"),
                },
            ),
        ];
        assert!(audit_events(&events, &config(), now).is_empty());
    }

    #[test]
    fn test_orphans() {
        let now = Utc::now();
        let events = vec![submitted(1, fp(1), now), registered(2, fp(2), "Ghost")];
        let findings = audit_events(&events, &config(), now);
        assert_eq!(
            severities(&findings),
            vec![FindingSeverity::Orphaned, FindingSeverity::Orphaned]
        );
        assert_eq!(findings[0].fingerprint, Some(fp(1)));
        assert_eq!(findings[1].documents, vec![doc("Ghost")]);
    }

    #[test]
    fn test_stale_anchor_until_terminal_event() {
        let now = Utc::now();
        let old = now - ChronoDuration::hours(3);
        let mut events = vec![submitted(1, fp(1), old), registered(2, fp(1), "Doc-A")];
        let findings = audit_events(&events, &config(), now);
        assert_eq!(severities(&findings), vec![FindingSeverity::StaleAnchor]);

        events.push(AuditEvent::new(
            3,
            fp(1),
            AuditEventKind::Failed {
                reason: "retries exhausted".into(),
            },
        ));
        let findings = audit_events(&events, &config(), now);
        assert_eq!(severities(&findings), vec![FindingSeverity::FailedAnchor]);
    }

    #[test]
    fn test_fresh_pending_is_not_stale() {
        let now = Utc::now();
        let events = vec![
            submitted(1, fp(1), now - ChronoDuration::minutes(5)),
            registered(2, fp(1), "Doc-A"),
        ];
        assert!(audit_events(&events, &config(), now).is_empty());
    }

    #[test]
    fn test_sequence_gap_and_regression() {
        let now = Utc::now();
        let events = vec![
            submitted(1, fp(1), now),
            registered(2, fp(1), "Doc-A"),
            confirmed(5, fp(1)),
            AuditEvent::new(4, fp(1), AuditEventKind::Verified { outcome: "confirmed".into() }),
        ];
        let findings = audit_events(&events, &config(), now);
        assert_eq!(
            severities(&findings),
            vec![FindingSeverity::SequenceGap, FindingSeverity::SequenceGap]
        );
        assert_eq!(findings[0].sequence, Some(5));
        assert_eq!(findings[1].sequence, Some(4));
    }

    #[test]
    fn test_incremental_matches_full_replay() {
        let now = Utc::now();
        let old = now - ChronoDuration::hours(2);
        let events = vec![
            submitted(1, fp(1), old),
            registered(2, fp(1), "Doc-A"),
            submitted(3, fp(2), now),
            registered(4, fp(2), "Doc-B"),
            registered(5, fp(2), "Doc-C"),
            confirmed(7, fp(2)),
        ];

        let full = audit_events(&events, &config(), now);
        for split in 0..events.len() {
            let mut checkpoint = AuditCheckpoint::new();
            checkpoint.replay(&events[..split]);
            checkpoint.replay(&events[split..]);
            assert_eq!(checkpoint.findings(&config(), now), full);
        }
    }

    #[tokio::test]
    async fn test_engine_resumes_from_checkpoint() {
        let now = Utc::now();
        let first = vec![submitted(1, fp(1), now), registered(2, fp(1), "Doc-A")];
        let second = vec![registered(3, fp(1), "Doc-B")];

        let mut store = MockProofStore::new();
        store
            .expect_events_since()
            .withf(|after| *after == 0)
            .times(1)
            .return_once(move |_| Ok(first));
        store
            .expect_events_since()
            .withf(|after| *after == 2)
            .times(1)
            .return_once(move |_| Ok(second));

        let engine = AuditEngine::new(Arc::new(store), config());
        let mut checkpoint = AuditCheckpoint::new();
        assert!(engine.run_incremental(&mut checkpoint).await.unwrap().is_empty());
        assert_eq!(checkpoint.last_sequence(), 2);

        let findings = engine.run_incremental(&mut checkpoint).await.unwrap();
        assert_eq!(severities(&findings), vec![FindingSeverity::DuplicateClaim]);
    }
}
