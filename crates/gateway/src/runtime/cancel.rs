//! Per-session cancellation plumbing.
//!
//! Each session owns a [`CancelHub`]: a root token covering the session's
//! whole task cluster, the session's cancel epoch, and the current turn's
//! child token. Barge-in bumps the epoch and cancels the turn token;
//! every upstream call derives from the turn token, so cancellation
//! reaches all descendants without back-references between tasks.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub struct CancelHub {
    root: CancellationToken,
    epoch: AtomicU64,
    current_turn: Mutex<Option<CancellationToken>>,
}

impl CancelHub {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            epoch: AtomicU64::new(0),
            current_turn: Mutex::new(None),
        }
    }

    /// The session-wide token; cancelled exactly once, on session end.
    pub fn root(&self) -> CancellationToken {
        self.root.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Open a turn: mints a child of the root and tracks it as current.
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.root.child_token();
        *self.current_turn.lock() = Some(token.clone());
        token
    }

    /// Close the current turn without cancelling it.
    pub fn end_turn(&self) {
        *self.current_turn.lock() = None;
    }

    /// Local barge-in: bump the epoch and cancel the in-flight turn.
    /// Returns the new epoch.
    pub fn barge_in(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(turn) = self.current_turn.lock().take() {
            turn.cancel();
        }
        epoch
    }

    /// Remote barge-in observed through the session store. Only epochs
    /// ahead of ours cancel anything; our own bump echoes back with an
    /// epoch we have already seen.
    pub fn observe_epoch(&self, epoch: u64) {
        let seen = self.epoch.load(Ordering::Acquire);
        if epoch > seen {
            self.epoch.store(epoch, Ordering::Release);
            if let Some(turn) = self.current_turn.lock().take() {
                turn.cancel();
            }
        }
    }

    /// Align the local epoch with the store's (session start, reloads).
    pub fn sync_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::Release);
    }

    /// End the session: cancels the root and everything derived from it.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

impl Default for CancelHub {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barge_in_cancels_only_the_current_turn() {
        let hub = CancelHub::new();
        let turn1 = hub.begin_turn();
        assert!(!turn1.is_cancelled());

        assert_eq!(hub.barge_in(), 1);
        assert!(turn1.is_cancelled());
        assert!(!hub.root().is_cancelled());

        // The next turn starts fresh.
        let turn2 = hub.begin_turn();
        assert!(!turn2.is_cancelled());
    }

    #[test]
    fn barge_in_without_turn_still_bumps_epoch() {
        let hub = CancelHub::new();
        assert_eq!(hub.barge_in(), 1);
        assert_eq!(hub.barge_in(), 2);
        assert_eq!(hub.epoch(), 2);
    }

    #[test]
    fn cancel_all_reaches_turn_descendants() {
        let hub = CancelHub::new();
        let turn = hub.begin_turn();
        let descendant = turn.child_token();

        hub.cancel_all();
        assert!(turn.is_cancelled());
        assert!(descendant.is_cancelled());
    }

    #[test]
    fn stale_remote_epoch_is_ignored() {
        let hub = CancelHub::new();
        hub.barge_in();
        hub.barge_in();
        let turn = hub.begin_turn();

        // Echo of our own earlier bump.
        hub.observe_epoch(1);
        assert!(!turn.is_cancelled());
        assert_eq!(hub.epoch(), 2);

        // A genuinely newer epoch cancels.
        hub.observe_epoch(5);
        assert!(turn.is_cancelled());
        assert_eq!(hub.epoch(), 5);
    }

    #[test]
    fn end_turn_forgets_the_token() {
        let hub = CancelHub::new();
        let turn = hub.begin_turn();
        hub.end_turn();
        hub.barge_in();
        assert!(!turn.is_cancelled(), "completed turn must not be cancelled");
    }
}
