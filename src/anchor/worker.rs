//! Confirmation Worker
//!
//! Background service that drives pending proofs to a terminal state.
//! Each pass:
//!
//! 1. Lists pending proof records
//! 2. Fails records that outlived the confirmation deadline
//! 3. Leaves records anchored with another authority untouched
//! 4. Refreshes the rest against the authority, a bounded number at a time
//! 5. Writes confirmations and failures back through the proof store
//!
//! A fingerprint whose refresh fails transiently is backed off; after more
//! than `retry_ceiling` consecutive transient failures it is marked failed.
//!
//! # Configuration
//!
//! - `ANCHOR_POLL_INTERVAL_SECS` - How often to poll pending proofs (default: 60)
//! - `ANCHOR_RETRY_CEILING` - Consecutive transient failures tolerated (required)
//! - `ANCHOR_CONFIRMATION_DEADLINE_SECS` - Fail proofs pending longer than this (optional)
//! - `ANCHOR_MAX_CONCURRENT_POLLS` - Refreshes in flight per pass (default: 8)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::{Fingerprint, ProofRecord, ProofStatus, StatusEvidence};
use crate::infra::{ProofStore, ProvenanceError, Result, RetryConfig};

use super::{verify_receipt, AnchorClient, AnchorStatus};

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

/// Configuration for the confirmation worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll pending proofs
    pub poll_interval: Duration,
    /// Spacing of refreshes after transient failures
    pub backoff: RetryConfig,
    /// Consecutive transient failures tolerated before a proof is failed
    pub retry_ceiling: u32,
    /// Pending proofs older than this are failed
    pub confirmation_deadline: Option<Duration>,
    /// Refreshes in flight at once
    pub max_concurrent_polls: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            backoff: RetryConfig::calendar(),
            retry_ceiling: 10,
            confirmation_deadline: None,
            max_concurrent_polls: 8,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment. `ANCHOR_RETRY_CEILING` has no default.
    pub fn from_env() -> Result<Self> {
        let retry_ceiling = std::env::var("ANCHOR_RETRY_CEILING")
            .map_err(|_| {
                ProvenanceError::Configuration("ANCHOR_RETRY_CEILING must be set".to_string())
            })?
            .parse()
            .map_err(|e| {
                ProvenanceError::Configuration(format!("ANCHOR_RETRY_CEILING: {e}"))
            })?;

        let max_concurrent_polls = std::env::var("ANCHOR_MAX_CONCURRENT_POLLS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(8);

        Ok(Self {
            poll_interval: env_secs("ANCHOR_POLL_INTERVAL_SECS")
                .unwrap_or(Duration::from_secs(60)),
            backoff: RetryConfig::calendar(),
            retry_ceiling,
            confirmation_deadline: env_secs("ANCHOR_CONFIRMATION_DEADLINE_SECS"),
            max_concurrent_polls,
        })
    }
}

/// Message types for worker control
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run a pass immediately
    PollNow,
    /// Shutdown the worker
    Shutdown,
}

/// Outcome counts of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Refreshes issued
    pub polled: usize,
    pub confirmed: usize,
    pub still_pending: usize,
    pub failed: usize,
    /// Skipped because their backoff window is open
    pub deferred: usize,
    /// Skipped because another authority issued their handle
    pub other_authority: usize,
    pub transient_errors: usize,
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    next_attempt: Instant,
}

enum Resolution {
    Pending,
    Confirm(StatusEvidence),
    Fail(String),
    Transient(ProvenanceError),
}

/// Confirmation Worker
///
/// Runs as a background task to resolve pending anchors.
pub struct ConfirmationWorker {
    config: WorkerConfig,
    store: Arc<dyn ProofStore>,
    client: Arc<AnchorClient>,
    backoff: Mutex<HashMap<Fingerprint, Backoff>>,
    control_tx: mpsc::Sender<WorkerMessage>,
    control_rx: mpsc::Receiver<WorkerMessage>,
}

impl ConfirmationWorker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn ProofStore>,
        client: Arc<AnchorClient>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(16);
        Self {
            config,
            store,
            client,
            backoff: Mutex::new(HashMap::new()),
            control_tx,
            control_rx,
        }
    }

    /// Get a sender handle for controlling the worker
    pub fn control_handle(&self) -> mpsc::Sender<WorkerMessage> {
        self.control_tx.clone()
    }

    /// Run the worker until shutdown
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            retry_ceiling = self.config.retry_ceiling,
            max_concurrent = self.config.max_concurrent_polls,
            "Starting confirmation worker"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Error polling pending proofs");
                    }
                }
                msg = self.control_rx.recv() => {
                    match msg {
                        Some(WorkerMessage::PollNow) => {
                            debug!("Poll requested");
                            if let Err(e) = self.poll_once().await {
                                error!(error = %e, "Error polling pending proofs");
                            }
                        }
                        Some(WorkerMessage::Shutdown) | None => {
                            info!("Confirmation worker shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn backoff_table(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, Backoff>> {
        self.backoff
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_deferred(&self, fingerprint: &Fingerprint, now: Instant) -> bool {
        self.backoff_table()
            .get(fingerprint)
            .is_some_and(|b| b.next_attempt > now)
    }

    fn past_deadline(&self, record: &ProofRecord) -> bool {
        let Some(deadline) = self.config.confirmation_deadline else {
            return false;
        };
        let age = Utc::now().signed_duration_since(record.submitted_at);
        age.to_std().is_ok_and(|age| age > deadline)
    }

    /// Run one pass over the pending proofs.
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let pending = self.store.list_by_status(ProofStatus::Pending).await?;
        let mut summary = PollSummary::default();
        if pending.is_empty() {
            return Ok(summary);
        }

        let now = Instant::now();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_polls.max(1)));
        let mut refreshes = JoinSet::new();

        for record in pending {
            if self.past_deadline(&record) {
                let reason = format!(
                    "not confirmed within {}s of submission",
                    self.config.confirmation_deadline.map(|d| d.as_secs()).unwrap_or_default()
                );
                self.resolve(&record.fingerprint, Resolution::Fail(reason), &mut summary)
                    .await;
                continue;
            }
            if !self.client.is_own(&record.anchor) {
                summary.other_authority += 1;
                continue;
            }
            if self.is_deferred(&record.fingerprint, now) {
                summary.deferred += 1;
                continue;
            }

            let client = self.client.clone();
            let permits = permits.clone();
            summary.polled += 1;
            refreshes.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let status = client.refresh(&record.anchor).await;
                (record.fingerprint, status)
            });
        }

        while let Some(joined) = refreshes.join_next().await {
            let (fingerprint, status) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Refresh task panicked");
                    continue;
                }
            };
            let resolution = classify(&fingerprint, status);
            self.resolve(&fingerprint, resolution, &mut summary).await;
        }

        if summary != PollSummary::default() {
            info!(
                polled = summary.polled,
                confirmed = summary.confirmed,
                failed = summary.failed,
                pending = summary.still_pending,
                deferred = summary.deferred,
                other_authority = summary.other_authority,
                "Confirmation pass complete"
            );
        }
        Ok(summary)
    }

    async fn resolve(
        &self,
        fingerprint: &Fingerprint,
        resolution: Resolution,
        summary: &mut PollSummary,
    ) {
        let (status, evidence) = match resolution {
            Resolution::Pending => {
                self.backoff_table().remove(fingerprint);
                summary.still_pending += 1;
                return;
            }
            Resolution::Transient(e) => {
                summary.transient_errors += 1;
                match self.record_transient_failure(fingerprint) {
                    Some(failures) => {
                        warn!(
                            fingerprint = %fingerprint.short(),
                            failures,
                            error = %e,
                            "Refresh failed, backing off"
                        );
                        summary.still_pending += 1;
                        return;
                    }
                    None => (
                        ProofStatus::Failed,
                        StatusEvidence::Failure {
                            reason: format!(
                                "authority unavailable after {} consecutive attempts: {e}",
                                self.config.retry_ceiling + 1
                            ),
                        },
                    ),
                }
            }
            Resolution::Confirm(evidence) => (ProofStatus::Confirmed, evidence),
            Resolution::Fail(reason) => (ProofStatus::Failed, StatusEvidence::Failure { reason }),
        };

        self.backoff_table().remove(fingerprint);
        match self.store.update_status(fingerprint, status, evidence).await {
            Ok(record) => {
                self.client.forget(fingerprint);
                if record.is_confirmed() {
                    summary.confirmed += 1;
                    info!(fingerprint = %fingerprint.short(), "Proof confirmed");
                } else {
                    summary.failed += 1;
                    warn!(
                        fingerprint = %fingerprint.short(),
                        reason = record.failure.as_deref().unwrap_or_default(),
                        "Proof failed"
                    );
                }
            }
            Err(e) => {
                error!(
                    fingerprint = %fingerprint.short(),
                    error = %e,
                    "Failed to record anchor outcome"
                );
            }
        }
    }

    /// Count a transient failure. Returns the failure count while under the
    /// ceiling, `None` once it is exceeded.
    fn record_transient_failure(&self, fingerprint: &Fingerprint) -> Option<u32> {
        let mut table = self.backoff_table();
        let entry = table.entry(*fingerprint).or_insert(Backoff {
            failures: 0,
            next_attempt: Instant::now(),
        });
        entry.failures += 1;
        if entry.failures > self.config.retry_ceiling {
            return None;
        }
        entry.next_attempt = Instant::now() + self.config.backoff.delay_after(entry.failures);
        Some(entry.failures)
    }
}

fn classify(fingerprint: &Fingerprint, status: Result<AnchorStatus>) -> Resolution {
    match status {
        Ok(AnchorStatus::Pending) => Resolution::Pending,
        Ok(AnchorStatus::Failed { reason }) => Resolution::Fail(reason),
        Ok(AnchorStatus::Confirmed {
            confirmed_at,
            receipt,
        }) => match verify_receipt(&receipt, fingerprint) {
            Ok(_) => Resolution::Confirm(StatusEvidence::Confirmation {
                confirmed_at,
                receipt,
            }),
            Err(e) => Resolution::Fail(format!("authority returned an invalid receipt: {e}")),
        },
        Err(e) if e.is_transient() => Resolution::Transient(e),
        Err(e) => Resolution::Fail(e.to_string()),
    }
}

/// Spawn the confirmation worker as a background task
pub fn spawn_confirmation_worker(
    config: WorkerConfig,
    store: Arc<dyn ProofStore>,
    client: Arc<AnchorClient>,
) -> (tokio::task::JoinHandle<()>, mpsc::Sender<WorkerMessage>) {
    let worker = ConfirmationWorker::new(config, store, client);
    let control_handle = worker.control_handle();
    let handle = tokio::spawn(worker.run());
    (handle, control_handle)
}
