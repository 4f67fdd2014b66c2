//! Versioned session store over the shared cache.
//!
//! One record per session under `session:{session_id}`. Writes are
//! optimistic: mutations run on a copy and commit with compare-and-swap
//! against the version token, retrying up to three times on conflict.
//! Only the worker whose `owner_id` is inscribed in the record may write
//! non-epoch fields; any worker may bump the cancel epoch (cross-worker
//! barge-in).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use vb_domain::error::{Error, Result};

use crate::cache::{CacheEvent, CasOutcome, InsertOutcome, SharedCache};
use crate::record::SessionRecord;

/// Conflict retries before a mutation gives up.
const MUTATE_RETRIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Shared, TTL-bounded mapping session-id -> session record.
pub struct SessionStore {
    cache: Arc<dyn SharedCache>,
    owner_id: String,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn SharedCache>, owner_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cache,
            owner_id: owner_id.into(),
            ttl,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    fn encode(record: &SessionRecord) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(record)?)
    }

    fn decode(payload: &[u8], cancel_epoch: u64) -> Result<SessionRecord> {
        let mut record: SessionRecord = serde_json::from_slice(payload)?;
        // The cache's epoch counter is authoritative; the serialized field
        // only reflects what the owner last saw.
        record.cancel_epoch = cancel_epoch;
        Ok(record)
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Create the record; `AlreadyExists` when the id is taken.
    pub async fn create(&self, record: &SessionRecord) -> Result<CreateOutcome> {
        let outcome = self
            .cache
            .insert_new(&Self::key(&record.session_id), Self::encode(record)?, self.ttl)
            .await?;
        Ok(match outcome {
            InsertOutcome::Created { .. } => CreateOutcome::Created,
            InsertOutcome::AlreadyExists => CreateOutcome::AlreadyExists,
        })
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        match self.cache.get(&Self::key(session_id)).await? {
            Some(entry) => Ok(Some(Self::decode(&entry.payload, entry.cancel_epoch)?)),
            None => Ok(None),
        }
    }

    /// Run `f` on a copy of the record and commit optimistically.
    ///
    /// Retries up to three times on version conflict; rejects the write
    /// when this worker does not own the record.
    pub async fn mutate(
        &self,
        session_id: &str,
        f: impl Fn(&mut SessionRecord) -> Result<()>,
    ) -> Result<SessionRecord> {
        let key = Self::key(session_id);

        for attempt in 0..=MUTATE_RETRIES {
            let entry = self
                .cache
                .get(&key)
                .await?
                .ok_or_else(|| Error::Internal(format!("session {session_id} not in store")))?;

            let mut record = Self::decode(&entry.payload, entry.cancel_epoch)?;
            if record.owner_id != self.owner_id {
                return Err(Error::Internal(format!(
                    "worker {} rejected write to session {session_id} owned by {}",
                    self.owner_id, record.owner_id
                )));
            }

            f(&mut record)?;
            record.last_activity_at = chrono::Utc::now();

            match self
                .cache
                .compare_and_swap(&key, Self::encode(&record)?, entry.version, self.ttl)
                .await?
            {
                CasOutcome::Stored { .. } => return Ok(record),
                CasOutcome::Conflict => {
                    tracing::debug!(session_id, attempt, "session mutate conflict, retrying");
                    continue;
                }
                CasOutcome::Missing => {
                    return Err(Error::Internal(format!(
                        "session {session_id} evicted mid-mutation"
                    )))
                }
            }
        }

        Err(Error::Internal(format!(
            "session {session_id} mutate exhausted {MUTATE_RETRIES} conflict retries"
        )))
    }

    /// Refresh activity without bumping the version.
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        self.cache.touch(&Self::key(session_id), self.ttl).await?;
        Ok(())
    }

    /// Bump the cancel epoch. Permitted from any worker.
    pub async fn bump_cancel_epoch(&self, session_id: &str) -> Result<u64> {
        self.cache
            .bump_epoch(&Self::key(session_id))
            .await?
            .ok_or_else(|| Error::Internal(format!("session {session_id} not in store")))
    }

    pub async fn remove(&self, session_id: &str) -> Result<bool> {
        self.cache.remove(&Self::key(session_id)).await
    }

    /// Best-effort notifications of epoch bumps and record updates.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe(&Self::key(session_id))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::record::{SessionState, TerminalReason, TransportKind, TurnRecord};

    const TTL: Duration = Duration::from_secs(60);

    fn stores() -> (Arc<MemoryCache>, SessionStore, SessionStore) {
        let cache = Arc::new(MemoryCache::new());
        let owner = SessionStore::new(cache.clone(), "worker-a", TTL);
        let other = SessionStore::new(cache.clone(), "worker-b", TTL);
        (cache, owner, other)
    }

    async fn seed(store: &SessionStore) -> SessionRecord {
        let record = SessionRecord::new("s1", TransportKind::Browser, "worker-a");
        assert_eq!(store.create(&record).await.unwrap(), CreateOutcome::Created);
        record
    }

    #[tokio::test]
    async fn create_load_round_trip() {
        let (_cache, owner, _other) = stores();
        seed(&owner).await;

        let loaded = owner.load("s1").await.unwrap().expect("record");
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.state, SessionState::Greeting);
        assert_eq!(loaded.owner_id, "worker-a");
    }

    #[tokio::test]
    async fn duplicate_create_reports_already_exists() {
        let (_cache, owner, _other) = stores();
        let record = seed(&owner).await;
        assert_eq!(
            owner.create(&record).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let (_cache, owner, _other) = stores();
        assert!(owner.load("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mutate_applies_and_persists() {
        let (_cache, owner, _other) = stores();
        seed(&owner).await;

        let updated = owner
            .mutate("s1", |r| r.transition(SessionState::Listening))
            .await
            .unwrap();
        assert_eq!(updated.state, SessionState::Listening);

        let loaded = owner.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.state, SessionState::Listening);
    }

    #[tokio::test]
    async fn non_owner_write_is_rejected() {
        let (_cache, owner, other) = stores();
        seed(&owner).await;

        let err = other
            .mutate("s1", |r| r.transition(SessionState::Listening))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(err.to_string().contains("owned by"));

        // The record is untouched.
        let loaded = owner.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.state, SessionState::Greeting);
    }

    #[tokio::test]
    async fn any_worker_may_bump_cancel_epoch() {
        let (_cache, owner, other) = stores();
        seed(&owner).await;

        assert_eq!(other.bump_cancel_epoch("s1").await.unwrap(), 1);
        assert_eq!(owner.bump_cancel_epoch("s1").await.unwrap(), 2);

        let loaded = owner.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.cancel_epoch, 2);
    }

    #[tokio::test]
    async fn epoch_bump_does_not_break_owner_cas() {
        let (_cache, owner, other) = stores();
        seed(&owner).await;

        // Remote barge-in lands between the owner's load and commit: the
        // owner's next mutate must still succeed on its first version.
        other.bump_cancel_epoch("s1").await.unwrap();
        let updated = owner
            .mutate("s1", |r| r.transition(SessionState::Listening))
            .await
            .unwrap();
        assert_eq!(updated.state, SessionState::Listening);
    }

    #[tokio::test]
    async fn mutate_missing_session_is_internal() {
        let (_cache, owner, _other) = stores();
        let err = owner.mutate("ghost", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn history_append_through_mutate() {
        let (_cache, owner, _other) = stores();
        seed(&owner).await;

        owner
            .mutate("s1", |r| {
                let mut turn = TurnRecord::open(r.turn_index, "hello", r.cancel_epoch);
                turn.push_chunk("hi there");
                turn.finish(TerminalReason::Completed);
                r.append_turn(turn, 8)
            })
            .await
            .unwrap();

        let loaded = owner.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.turn_index, 1);
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.history[0].response_text(), "hi there");
    }

    #[tokio::test]
    async fn subscribe_sees_remote_barge_in() {
        let (_cache, owner, other) = stores();
        seed(&owner).await;

        let mut rx = owner.subscribe("s1");
        other.bump_cancel_epoch("s1").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), CacheEvent::EpochBumped { epoch: 1 });
    }
}
