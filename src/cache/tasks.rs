//! Background maintenance tasks for the Session Aggregation Cache (§4.D):
//! batch save (30s), participant sync (5m), expired-pending cleanup (10m).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use super::{sorted_by_contribution, PendingSave, SessionAggregationCache, TOP_CAP};
use crate::persistence::with_backoff;

const BATCH_SAVE_INTERVAL: Duration = Duration::from_secs(30);
const PARTICIPANT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const MAX_SAVE_ATTEMPTS: u8 = 3;
const EXPIRED_PENDING_AGE: chrono::Duration = chrono::Duration::hours(1);

/// Owns the three recurring maintenance loops. Construct once per cache and
/// call `spawn` after the cache (and its races) are ready to receive
/// traffic.
pub struct CacheBackgroundTasks;

impl CacheBackgroundTasks {
    pub fn spawn(cache: Arc<SessionAggregationCache>) {
        tokio::spawn(Self::batch_save_loop(Arc::clone(&cache)));
        tokio::spawn(Self::participant_sync_loop(Arc::clone(&cache)));
        tokio::spawn(Self::cleanup_loop(cache));
    }

    async fn batch_save_loop(cache: Arc<SessionAggregationCache>) {
        let mut ticker = tokio::time::interval(BATCH_SAVE_INTERVAL);
        loop {
            ticker.tick().await;

            let batch: Vec<PendingSave> = {
                let mut pending = cache.pending_saves.write();
                pending.drain(..).collect()
            };
            if batch.is_empty() {
                continue;
            }

            let sessions = batch.iter().map(|p| p.session.clone()).collect();
            match cache.persistence.insert_sessions_bulk(sessions).await {
                Ok(()) => debug!(count = batch.len(), "flushed session batch"),
                Err(err) => {
                    warn!(error = %err, count = batch.len(), "batch save failed, requeueing eligible sessions");
                    let mut pending = cache.pending_saves.write();
                    for mut entry in batch {
                        entry.attempts += 1;
                        if entry.attempts < MAX_SAVE_ATTEMPTS {
                            pending.push_back(entry);
                        } else {
                            error!(session_id = %entry.session.session_id, "dropping session after exhausting save attempts");
                        }
                    }
                }
            }
        }
    }

    async fn participant_sync_loop(cache: Arc<SessionAggregationCache>) {
        let mut ticker = tokio::time::interval(PARTICIPANT_SYNC_INTERVAL);
        loop {
            ticker.tick().await;

            let Some(race_id) = cache.current_race_id() else { continue };
            let rows = {
                let races = cache.races.read();
                match races.get(&race_id) {
                    Some(table) => sorted_by_contribution(table).into_iter().take(TOP_CAP).collect::<Vec<_>>(),
                    None => continue,
                }
            };
            if rows.is_empty() {
                continue;
            }

            let race_id_for_retry = race_id.clone();
            let persistence = Arc::clone(&cache.persistence);
            let result = with_backoff(|| {
                let persistence = Arc::clone(&persistence);
                let race_id = race_id_for_retry.clone();
                let rows = rows.clone();
                async move { persistence.bulk_upsert_participants(&race_id, rows).await }
            })
            .await;

            match result {
                Ok(()) => debug!(race_id = %race_id, count = rows.len(), "synced participant projection"),
                Err(err) => error!(race_id = %race_id, error = %err, "participant sync failed after retries, skipping cycle"),
            }
        }
    }

    async fn cleanup_loop(cache: Arc<SessionAggregationCache>) {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - EXPIRED_PENDING_AGE;
            let mut pending = cache.pending_saves.write();
            let before = pending.len();
            pending.retain(|p| p.enqueued_at >= cutoff);
            let dropped = before - pending.len();
            if dropped > 0 {
                debug!(dropped, "discarded expired pending saves");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawSession;
    use crate::domain::{GameSession, RaceParticipant};
    use crate::error::CrashCoreError;
    use crate::persistence::{InMemoryStore, PersistenceAdapter, RacePatch, UserPatch};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails every `insert_sessions_bulk` call but succeeds on participant
    /// upserts, recording call counts for both.
    struct InstrumentedStore {
        inner: InMemoryStore,
        insert_attempts: AtomicU32,
        upsert_calls: SyncMutex<Vec<(String, usize)>>,
    }

    impl InstrumentedStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                insert_attempts: AtomicU32::new(0),
                upsert_calls: SyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PersistenceAdapter for InstrumentedStore {
        async fn upsert_user(&self, user_id: &str, patch: UserPatch) -> Result<crate::domain::User, CrashCoreError> {
            self.inner.upsert_user(user_id, patch).await
        }
        async fn find_user(&self, user_id: &str) -> Result<Option<crate::domain::User>, CrashCoreError> {
            self.inner.find_user(user_id).await
        }
        async fn insert_sessions_bulk(&self, sessions: Vec<GameSession>) -> Result<(), CrashCoreError> {
            self.insert_attempts.fetch_add(1, Ordering::SeqCst);
            let _ = sessions;
            Err(CrashCoreError::transient("store offline"))
        }
        async fn bulk_upsert_participants(
            &self,
            race_id: &str,
            rows: Vec<RaceParticipant>,
        ) -> Result<(), CrashCoreError> {
            self.upsert_calls.lock().push((race_id.to_string(), rows.len()));
            self.inner.bulk_upsert_participants(race_id, rows).await
        }
        async fn insert_race(&self, race: crate::domain::Race) -> Result<(), CrashCoreError> {
            self.inner.insert_race(race).await
        }
        async fn update_race(&self, race_id: &str, patch: RacePatch) -> Result<crate::domain::Race, CrashCoreError> {
            self.inner.update_race(race_id, patch).await
        }
        async fn find_active_race(&self) -> Result<Option<crate::domain::Race>, CrashCoreError> {
            self.inner.find_active_race().await
        }
        async fn find_race_history(&self, limit: usize) -> Result<Vec<crate::domain::Race>, CrashCoreError> {
            self.inner.find_race_history(limit).await
        }
        async fn insert_prizes(&self, prizes: Vec<crate::domain::RacePrize>) -> Result<(), CrashCoreError> {
            self.inner.insert_prizes(prizes).await
        }
        async fn find_user_pending_prizes(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<crate::domain::RacePrize>, CrashCoreError> {
            self.inner.find_user_pending_prizes(user_id, limit).await
        }
        async fn find_user_prize_history(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<crate::domain::RacePrize>, CrashCoreError> {
            self.inner.find_user_prize_history(user_id, limit).await
        }
        async fn find_prizes_by_race(&self, race_id: &str) -> Result<Vec<crate::domain::RacePrize>, CrashCoreError> {
            self.inner.find_prizes_by_race(race_id).await
        }
        async fn claim_prize(&self, prize_id: &str, user_id: &str) -> Result<crate::domain::RacePrize, CrashCoreError> {
            self.inner.claim_prize(prize_id, user_id).await
        }
        async fn find_recent_sessions_for_race(
            &self,
            race_id: &str,
            limit: usize,
        ) -> Result<Vec<GameSession>, CrashCoreError> {
            self.inner.find_recent_sessions_for_race(race_id, limit).await
        }
        async fn find_participants_for_race(&self, race_id: &str) -> Result<Vec<RaceParticipant>, CrashCoreError> {
            self.inner.find_participants_for_race(race_id).await
        }
    }

    fn raw(user_id: &str, bet: i64, win: i64) -> RawSession {
        let cash_out = if win > 0 { 2.0 } else { 0.0 };
        RawSession {
            user_id: user_id.to_string(),
            bet_amount: bet,
            crash_multiplier: 2.5,
            cash_out_multiplier: cash_out,
            win_amount: win,
            game_start_time: Utc::now(),
            game_end_time: Utc::now(),
            is_free_mode: false,
        }
    }

    // A session is retried up to MAX_SAVE_ATTEMPTS times against a failing
    // store, then dropped rather than requeued forever (§4.D batch save).
    #[tokio::test(start_paused = true)]
    async fn batch_save_drops_session_after_exhausting_attempts() {
        let store = Arc::new(InstrumentedStore::new());
        let cache = SessionAggregationCache::new(store.clone());
        cache.set_current_race("race_1");
        let session = GameSession::from_raw("s1".into(), "race_1".into(), raw("user_00000001", 100, 200)).unwrap();
        cache.add_session(session).unwrap();

        tokio::spawn(CacheBackgroundTasks::batch_save_loop(Arc::clone(&cache)));
        // `tokio::time::interval`'s first tick fires immediately on first poll.
        tokio::task::yield_now().await;

        for _ in 0..(MAX_SAVE_ATTEMPTS - 1) {
            tokio::time::advance(BATCH_SAVE_INTERVAL).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(store.insert_attempts.load(Ordering::SeqCst), MAX_SAVE_ATTEMPTS as u32);
        assert!(cache.pending_saves.read().is_empty());
    }

    // Expired pending saves (older than 1h) are discarded by the cleanup
    // loop rather than retried forever.
    #[tokio::test(start_paused = true)]
    async fn cleanup_loop_discards_entries_older_than_one_hour() {
        let cache = SessionAggregationCache::new(Arc::new(InMemoryStore::new()));
        cache.pending_saves.write().push_back(PendingSave {
            session: GameSession::from_raw("s1".into(), "race_1".into(), raw("user_00000001", 100, 200)).unwrap(),
            attempts: 0,
            enqueued_at: Utc::now() - chrono::Duration::hours(2),
        });
        cache.pending_saves.write().push_back(PendingSave {
            session: GameSession::from_raw("s2".into(), "race_1".into(), raw("user_00000002", 100, 200)).unwrap(),
            attempts: 0,
            enqueued_at: Utc::now(),
        });

        tokio::spawn(CacheBackgroundTasks::cleanup_loop(Arc::clone(&cache)));
        tokio::task::yield_now().await;

        let remaining = cache.pending_saves.read();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session.session_id, "s2");
    }

    // Participant sync upserts the current race's sorted Top-1000 snapshot.
    #[tokio::test(start_paused = true)]
    async fn participant_sync_upserts_current_race_snapshot() {
        let store = Arc::new(InstrumentedStore::new());
        let cache = SessionAggregationCache::new(store.clone());
        cache.set_current_race("race_1");
        let session = GameSession::from_raw("s1".into(), "race_1".into(), raw("user_00000001", 100, 200)).unwrap();
        cache.add_session(session).unwrap();

        tokio::spawn(CacheBackgroundTasks::participant_sync_loop(Arc::clone(&cache)));
        tokio::task::yield_now().await;

        let calls = store.upsert_calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "race_1");
        assert_eq!(calls[0].1, 1);
    }
}
