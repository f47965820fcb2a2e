//! In-process calendar
//!
//! Accumulates digests like a calendar server and anchors them in batches:
//! `seal` builds a Merkle tree over everything pending and issues a receipt
//! per digest committing to one synthetic transaction. Outages and hangs can
//! be injected to exercise retry and timeout paths without a network.
//!
//! Ids carry a per-instance prefix. Handles issued by an earlier process are
//! reported `Pending`: this calendar cannot speak for them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use crate::crypto::{merkle_path, merkle_root};
use crate::domain::{AnchorHandle, AnchorPoint, AnchorReceipt, Fingerprint, Hash256};
use crate::infra::{ProvenanceError, Result};

use super::{AnchorStatus, TimestampAuthority};

const AUTHORITY_ID: &str = "memory";

#[derive(Default)]
struct CalendarState {
    next_id: u64,
    next_block: u64,
    ids_by_digest: HashMap<Fingerprint, String>,
    entries: HashMap<String, (Fingerprint, AnchorStatus)>,
    /// Ids awaiting the next seal, in submission order
    unsealed: Vec<String>,
}

/// Calendar living in process memory
pub struct MemoryCalendar {
    /// `mem-<instance>-` prefix of every id this calendar issues
    prefix: String,
    state: Mutex<CalendarState>,
    unavailable: AtomicBool,
    hanging: AtomicBool,
    submit_calls: AtomicU64,
    query_calls: AtomicU64,
}

impl Default for MemoryCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCalendar {
    pub fn new() -> Self {
        let instance: u32 = rand::thread_rng().gen();
        Self {
            prefix: format!("mem-{instance:08x}-"),
            state: Mutex::new(CalendarState::default()),
            unavailable: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            submit_calls: AtomicU64::new(0),
            query_calls: AtomicU64::new(0),
        }
    }

    /// The handle was issued by this instance
    pub fn issued(&self, handle: &AnchorHandle) -> bool {
        handle.authority == AUTHORITY_ID && handle.id.starts_with(&self.prefix)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CalendarState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulate an outage: every call fails with `AnchorAuthorityUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Simulate a calendar that accepts queries but never answers.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn submit_calls(&self) -> u64 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Number of digests waiting for the next seal
    pub fn unsealed(&self) -> usize {
        self.state().unsealed.len()
    }

    /// Anchor every pending digest in one transaction.
    ///
    /// Returns the Merkle root committed to, or `None` if nothing was pending.
    pub fn seal(&self, tx_id: &str, confirmed_at: DateTime<Utc>) -> Option<Hash256> {
        let mut state = self.state();
        if state.unsealed.is_empty() {
            return None;
        }

        let ids = std::mem::take(&mut state.unsealed);
        let leaves: Vec<Hash256> = ids
            .iter()
            .filter_map(|id| state.entries.get(id).map(|(fp, _)| fp.0))
            .collect();
        let root = merkle_root(&leaves)?;

        state.next_block += 1;
        let anchor = AnchorPoint {
            network: "memory".to_string(),
            tx_id: tx_id.to_ascii_lowercase(),
            block_height: Some(state.next_block),
            confirmed_at,
            op_return: Some(hex::encode(root)),
        };

        for (index, id) in ids.iter().enumerate() {
            let Some(proof) = merkle_path(&leaves, index) else {
                continue;
            };
            if let Some((fp, status)) = state.entries.get_mut(id) {
                *status = AnchorStatus::Confirmed {
                    confirmed_at,
                    receipt: AnchorReceipt {
                        target_hash: *fp,
                        proof,
                        merkle_root: root,
                        anchors: vec![anchor.clone()],
                        proof_id: Some(id.clone()),
                        link: None,
                    },
                };
            }
        }

        debug!(digests = leaves.len(), root = %hex::encode(root), "Sealed calendar batch");
        Some(root)
    }

    /// Drop a pending digest as the authority would on rejection.
    pub fn reject(&self, fingerprint: &Fingerprint, reason: &str) {
        let mut state = self.state();
        let Some(id) = state.ids_by_digest.get(fingerprint).cloned() else {
            return;
        };
        state.unsealed.retain(|pending| pending != &id);
        if let Some((_, status)) = state.entries.get_mut(&id) {
            if matches!(status, AnchorStatus::Pending) {
                *status = AnchorStatus::Failed {
                    reason: reason.to_string(),
                };
            }
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProvenanceError::AnchorAuthorityUnavailable(
                "memory calendar offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TimestampAuthority for MemoryCalendar {
    fn authority_id(&self) -> String {
        AUTHORITY_ID.to_string()
    }

    async fn submit(&self, digest: &Fingerprint) -> Result<AnchorHandle> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut state = self.state();
        if let Some(id) = state.ids_by_digest.get(digest) {
            return Ok(AnchorHandle::new(AUTHORITY_ID, id.clone()));
        }

        state.next_id += 1;
        let id = format!("{}{}", self.prefix, state.next_id);
        state.ids_by_digest.insert(*digest, id.clone());
        state
            .entries
            .insert(id.clone(), (*digest, AnchorStatus::Pending));
        state.unsealed.push(id.clone());
        Ok(AnchorHandle::new(AUTHORITY_ID, id))
    }

    async fn query(&self, handle: &AnchorHandle) -> Result<AnchorStatus> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if !self.issued(handle) {
            debug!(handle = %handle, "Handle from another calendar instance");
            return Ok(AnchorStatus::Pending);
        }
        self.state()
            .entries
            .get(&handle.id)
            .map(|(_, status)| status.clone())
            .ok_or_else(|| {
                ProvenanceError::AnchorFailed(format!("unknown proof id {}", handle.id))
            })
    }
}
