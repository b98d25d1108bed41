//! Per-address async locks with bounded waits.

use crate::account::AddressKey;
use crate::error::LedgerError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

type Slot = Arc<AsyncMutex<()>>;

pub(crate) struct LockTable {
    slots: Mutex<HashMap<AddressKey, Slot>>,
    timeout: Duration,
}

/// Guards released together when dropped.
pub(crate) struct HeldLocks {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockTable {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Lock every key in ascending key order so overlapping requests cannot deadlock.
    /// Gives up with `StoreUnavailable` once the deadline passes.
    pub(crate) async fn acquire(&self, keys: &[AddressKey]) -> Result<HeldLocks, LedgerError> {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();

        let slots: Vec<Slot> = {
            let mut map = self
                .slots
                .lock()
                .map_err(|e| LedgerError::StoreUnavailable(format!("lock table: {e}")))?;
            // Drop slots nobody else references so the table tracks only live contention.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            ordered
                .iter()
                .map(|k| map.entry(k.clone()).or_default().clone())
                .collect()
        };

        let deadline = Instant::now() + self.timeout;
        let mut guards = Vec::with_capacity(slots.len());
        for (slot, key) in slots.into_iter().zip(&ordered) {
            match tokio::time::timeout_at(deadline, slot.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    return Err(LedgerError::StoreUnavailable(format!(
                        "timed out waiting for account lock on {key}"
                    )))
                }
            }
        }
        Ok(HeldLocks { _guards: guards })
    }
}
