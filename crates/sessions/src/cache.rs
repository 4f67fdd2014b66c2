//! Shared-cache interface and the in-process backend.
//!
//! The session store talks to an opaque, TTL-bounded cache through
//! [`SharedCache`]: versioned payloads with compare-and-swap, an epoch
//! counter writable independently of the payload version, and best-effort
//! change notifications. [`MemoryCache`] is the in-process backend used by
//! the daemon and by tests; a networked backend plugs in behind the same
//! trait.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use vb_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interface types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A cached payload with its version token and epoch counter.
///
/// The epoch lives beside the payload, not inside it, so any worker can
/// bump it without holding the payload's version.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Vec<u8>,
    pub version: u64,
    pub cancel_epoch: u64,
}

/// Best-effort notifications delivered to subscribers of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Updated { version: u64 },
    EpochBumped { epoch: u64 },
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created { version: u64 },
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Stored { version: u64 },
    /// The stored version no longer matches the expected one.
    Conflict,
    /// The key is gone (expired or removed).
    Missing,
}

/// Opaque shared cache the session store coordinates through.
#[async_trait::async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Create a key that must not already exist.
    async fn insert_new(&self, key: &str, payload: Vec<u8>, ttl: Duration)
        -> Result<InsertOutcome>;

    /// Replace the payload iff the stored version equals `expected_version`.
    /// The epoch counter is left untouched.
    async fn compare_and_swap(
        &self,
        key: &str,
        payload: Vec<u8>,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<CasOutcome>;

    /// Refresh the TTL without touching version or payload.
    /// Returns false when the key is missing.
    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Increment the epoch counter independently of the payload version.
    /// Returns the new epoch, or `None` when the key is missing.
    async fn bump_epoch(&self, key: &str) -> Result<Option<u64>>;

    async fn remove(&self, key: &str) -> Result<bool>;

    /// Subscribe to best-effort change notifications for a key.
    fn subscribe(&self, key: &str) -> broadcast::Receiver<CacheEvent>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-process backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Slot {
    payload: Vec<u8>,
    version: u64,
    cancel_epoch: u64,
    expires_at: Instant,
}

/// In-process [`SharedCache`] backend.
pub struct MemoryCache {
    slots: Mutex<HashMap<String, Slot>>,
    subscribers: Mutex<HashMap<String, broadcast::Sender<CacheEvent>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn notify(&self, key: &str, event: CacheEvent) {
        let mut subs = self.subscribers.lock();
        if let Some(tx) = subs.get(key) {
            if tx.send(event).is_err() {
                // Last receiver gone; drop the channel.
                subs.remove(key);
            }
        }
    }

    /// Drop expired slots. Called from the gateway's periodic sweep.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| slot.expires_at > now);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Ok(Some(CacheEntry {
                payload: slot.payload.clone(),
                version: slot.version,
                cancel_epoch: slot.cancel_epoch,
            })),
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn insert_new(
        &self,
        key: &str,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Result<InsertOutcome> {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        match slots.get(key) {
            Some(slot) if slot.expires_at > now => Ok(InsertOutcome::AlreadyExists),
            _ => {
                slots.insert(
                    key.to_owned(),
                    Slot {
                        payload,
                        version: 1,
                        cancel_epoch: 0,
                        expires_at: now + ttl,
                    },
                );
                Ok(InsertOutcome::Created { version: 1 })
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        payload: Vec<u8>,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<CasOutcome> {
        let outcome = {
            let mut slots = self.slots.lock();
            let now = Instant::now();
            match slots.get_mut(key) {
                Some(slot) if slot.expires_at > now => {
                    if slot.version != expected_version {
                        CasOutcome::Conflict
                    } else {
                        slot.payload = payload;
                        slot.version += 1;
                        slot.expires_at = now + ttl;
                        CasOutcome::Stored {
                            version: slot.version,
                        }
                    }
                }
                _ => CasOutcome::Missing,
            }
        };

        if let CasOutcome::Stored { version } = outcome {
            self.notify(key, CacheEvent::Updated { version });
        }
        Ok(outcome)
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        match slots.get_mut(key) {
            Some(slot) if slot.expires_at > now => {
                slot.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn bump_epoch(&self, key: &str) -> Result<Option<u64>> {
        let epoch = {
            let mut slots = self.slots.lock();
            let now = Instant::now();
            match slots.get_mut(key) {
                Some(slot) if slot.expires_at > now => {
                    slot.cancel_epoch += 1;
                    Some(slot.cancel_epoch)
                }
                _ => None,
            }
        };

        if let Some(epoch) = epoch {
            self.notify(key, CacheEvent::EpochBumped { epoch });
        }
        Ok(epoch)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let removed = self.slots.lock().remove(key).is_some();
        if removed {
            self.notify(key, CacheEvent::Removed);
        }
        Ok(removed)
    }

    fn subscribe(&self, key: &str) -> broadcast::Receiver<CacheEvent> {
        let mut subs = self.subscribers.lock();
        subs.entry(key.to_owned())
            .or_insert_with(|| broadcast::channel(16).0)
            .subscribe()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
