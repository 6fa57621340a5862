//! Dedup guard: per-recipient suppression of repeated notifications.
//!
//! A notification carrying a dedup key is admitted only if the recipient has
//! no notification under the same key newer than the rolling window. The
//! existence check and the subsequent insert must not interleave with another
//! writer for the same pair, so admission hands out an [`AdmitPermit`] that
//! holds the pair's slot until the caller has inserted and drops it.
//!
//! Slots are async mutexes keyed by (recipient, dedup key) and live only
//! while someone holds or waits on them.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::EngineError;
use crate::store::NotificationStore;

/// Default dedup window (1 minute).
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

type SlotKey = (i64, String);

/// Serializes check-and-insert per (recipient, dedup key) within this process.
#[derive(Debug)]
pub struct DedupGuard {
    window: Duration,
    slots: DashMap<SlotKey, Arc<Mutex<()>>>,
}

/// Exclusive right to insert a notification for one (recipient, key) pair.
///
/// Dropping the permit releases the slot.
#[derive(Debug)]
pub struct AdmitPermit<'a> {
    owner: &'a DedupGuard,
    key: SlotKey,
    held: Option<OwnedMutexGuard<()>>,
}

impl DedupGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether a notification for the pair may be created.
    ///
    /// Returns a permit when no notification under `dedup_key` was created for
    /// the recipient within the window, `None` when it must be suppressed.
    /// A failed existence lookup is returned as `Lookup` and nothing should be
    /// created.
    pub async fn admit<S>(
        &self,
        store: &S,
        recipient_id: i64,
        dedup_key: &str,
    ) -> Result<Option<AdmitPermit<'_>>, EngineError>
    where
        S: NotificationStore + ?Sized,
    {
        let key: SlotKey = (recipient_id, dedup_key.to_string());
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // Built before waiting so a cancelled waiter still releases its slot.
        let mut permit = AdmitPermit {
            owner: self,
            key,
            held: None,
        };
        permit.held = Some(slot.lock_owned().await);

        match store.find_recent(recipient_id, dedup_key, self.window).await {
            Ok(None) => Ok(Some(permit)),
            Ok(Some(existing)) => {
                tracing::debug!(
                    recipient_id,
                    dedup_key,
                    existing_id = existing.id,
                    window_secs = self.window.as_secs(),
                    "Notification suppressed, already sent within dedup window"
                );
                Ok(None)
            }
            Err(e) => Err(EngineError::Lookup(format!(
                "Dedup lookup failed for recipient {} key '{}': {}",
                recipient_id, dedup_key, e
            ))),
        }
    }

    /// Number of slots currently held or awaited.
    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }

    fn release(&self, key: &SlotKey) {
        // Only the map still references an idle slot.
        self.slots
            .remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl Drop for AdmitPermit<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.owner.release(&self.key);
    }
}
