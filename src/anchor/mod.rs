//! Anchor client
//!
//! Registers fingerprints with an external timestamping authority and
//! refreshes pending anchors until the authority reports blockchain
//! inclusion. The client never blocks on confirmation; long-latency polling
//! belongs to [`worker::ConfirmationWorker`].

mod calendar;
mod memory;
mod receipt;
pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, instrument, warn};

use crate::domain::{AnchorHandle, AnchorReceipt, Fingerprint};
use crate::infra::{FingerprintLocks, ProvenanceError, Result, Retry, RetryConfig};

pub use calendar::HttpCalendar;
pub use memory::MemoryCalendar;
pub use receipt::{parse_woleet_receipt, verify_receipt};
pub use worker::{
    spawn_confirmation_worker, ConfirmationWorker, PollSummary, WorkerConfig, WorkerMessage,
};

/// Authority-side state of an anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorStatus {
    /// Accepted, not yet included in a block
    Pending,
    /// Included in a block
    Confirmed {
        confirmed_at: DateTime<Utc>,
        receipt: AnchorReceipt,
    },
    /// Rejected or dropped by the authority
    Failed { reason: String },
}

impl AnchorStatus {
    pub fn name(&self) -> &'static str {
        match self {
            AnchorStatus::Pending => "pending",
            AnchorStatus::Confirmed { .. } => "confirmed",
            AnchorStatus::Failed { .. } => "failed",
        }
    }
}

/// Capability of an external timestamping authority.
///
/// Transient trouble is reported as `AnchorAuthorityUnavailable`; any other
/// error is terminal for the call.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    /// Stable identifier recorded in anchor handles
    fn authority_id(&self) -> String;

    /// Register a digest; returns immediately with a handle.
    async fn submit(&self, digest: &Fingerprint) -> Result<AnchorHandle>;

    /// Current status of a handle, with evidence once confirmed
    async fn query(&self, handle: &AnchorHandle) -> Result<AnchorStatus>;
}

/// Anchor client configuration
#[derive(Debug, Clone)]
pub struct AnchorClientConfig {
    /// Backoff for transient submission failures
    pub submit_retry: RetryConfig,
    /// Upper bound of a single refresh call
    pub refresh_timeout: Duration,
}

impl Default for AnchorClientConfig {
    fn default() -> Self {
        Self {
            submit_retry: RetryConfig::default(),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

/// Client of one timestamping authority.
pub struct AnchorClient {
    authority: Arc<dyn TimestampAuthority>,
    config: AnchorClientConfig,
    /// Handles already issued, keyed by fingerprint
    handles: Mutex<HashMap<Fingerprint, AnchorHandle>>,
    locks: FingerprintLocks,
}

impl AnchorClient {
    pub fn new(authority: Arc<dyn TimestampAuthority>, config: AnchorClientConfig) -> Self {
        Self {
            authority,
            config,
            handles: Mutex::new(HashMap::new()),
            locks: FingerprintLocks::new(),
        }
    }

    pub fn authority_id(&self) -> String {
        self.authority.authority_id()
    }

    /// The handle names this client's authority
    pub fn is_own(&self, handle: &AnchorHandle) -> bool {
        handle.authority == self.authority.authority_id()
    }

    /// Remember a handle issued earlier (e.g. loaded from the proof store).
    pub fn remember(&self, fingerprint: Fingerprint, handle: AnchorHandle) {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(fingerprint, handle);
    }

    /// Drop the handle of a proof that reached a terminal state.
    pub fn forget(&self, fingerprint: &Fingerprint) {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(fingerprint);
    }

    /// Handles currently held
    pub fn tracked(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn known_handle(&self, fingerprint: &Fingerprint) -> Option<AnchorHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(fingerprint)
            .cloned()
    }

    /// Register a fingerprint with the authority.
    ///
    /// Idempotent per fingerprint: a known handle is returned without another
    /// outbound call. Transient failures are retried with backoff.
    #[instrument(skip(self), fields(fingerprint = %fingerprint.short()))]
    pub async fn submit(&self, fingerprint: &Fingerprint) -> Result<AnchorHandle> {
        let _in_flight = self.locks.acquire(fingerprint).await;

        if let Some(handle) = self.known_handle(fingerprint) {
            debug!(handle = %handle, "Reusing existing anchor handle");
            return Ok(handle);
        }

        let digest = *fingerprint;
        let authority = self.authority.clone();
        let outcome = Retry::new(self.config.submit_retry.clone())
            .run("anchor submit", || {
                let authority = authority.clone();
                async move { authority.submit(&digest).await }
            })
            .await;

        let attempts = outcome.attempts;
        match outcome.result {
            Ok(handle) => {
                info!(handle = %handle, attempts, "Fingerprint submitted to authority");
                self.remember(digest, handle.clone());
                Ok(handle)
            }
            Err(e) => {
                warn!(error = %e, attempts, "Anchor submission failed");
                Err(e)
            }
        }
    }

    /// Poll the authority once. A call exceeding the refresh timeout is
    /// reported as `AnchorAuthorityUnavailable`.
    ///
    /// Handles issued by another authority are never sent out and stay
    /// `Pending`; only an imported receipt can settle them.
    pub async fn refresh(&self, handle: &AnchorHandle) -> Result<AnchorStatus> {
        if !self.is_own(handle) {
            debug!(handle = %handle, "Handle belongs to another authority");
            return Ok(AnchorStatus::Pending);
        }
        match tokio::time::timeout(self.config.refresh_timeout, self.authority.query(handle)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProvenanceError::AnchorAuthorityUnavailable(format!(
                "refresh of {handle} timed out after {}ms",
                self.config.refresh_timeout.as_millis()
            ))),
        }
    }
}
