//! Per-fingerprint writer locks
//!
//! Writers of one fingerprint are serialized; unrelated fingerprints proceed
//! in parallel. Idle lock slots are pruned as the table grows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::Fingerprint;

/// Slot count above which idle entries are dropped on acquire.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
pub struct FingerprintLocks {
    slots: Mutex<HashMap<Fingerprint, Arc<AsyncMutex<()>>>>,
}

impl FingerprintLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `fingerprint`.
    pub async fn acquire(&self, fingerprint: &Fingerprint) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slots.len() > PRUNE_THRESHOLD {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            slots
                .entry(*fingerprint)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
