//! Session Aggregation Cache (4.D) — an in-memory, race-scoped store that
//! ingests every finished game session, maintains the rolling Top-1000
//! leaderboard, computes live prize-pool values, and flushes durable
//! projections.

mod split;
mod tasks;

pub use split::{distribute_prizes, PrizeShare};
pub use tasks::CacheBackgroundTasks;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::{GameSession, RaceParticipant};
use crate::error::CrashCoreError;
use crate::persistence::PersistenceAdapter;

/// A session after it has been stamped with `raceId` and ingest-time
/// derived fields, queued for the next durable batch save.
#[derive(Debug, Clone)]
pub struct PendingSave {
    pub session: GameSession,
    pub attempts: u8,
    pub enqueued_at: DateTime<Utc>,
}

/// Per-race in-memory tables (§4.D).
#[derive(Default)]
struct RaceTable {
    global_sessions: Vec<GameSession>,
    user_sessions: HashMap<String, Vec<GameSession>>,
    participants: HashMap<String, RaceParticipant>,
}

const TOP_CAP: usize = 1000;
const MIN_POOL_GUARANTEE: f64 = 50_000.0;
const EVICTION_DELAY_SECS: u64 = 10 * 60;

/// Top-N leaderboard entry with its assigned rank.
#[derive(Debug, Clone)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub participant: RaceParticipant,
}

/// Result of `getRaceLeaderboardWithUser`.
#[derive(Debug, Clone)]
pub struct LeaderboardWithUser {
    pub top: Vec<LeaderboardEntry>,
    pub user_participant: RaceParticipant,
    pub user_true_rank: u32,
    /// Equal to `user_true_rank` unless it exceeds 1000, in which case this
    /// is a stable pseudo-random value in `[1001, 10000]` (§4.D).
    pub user_display_rank: u32,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalStats {
    pub session_count: usize,
    pub total_bet_amount: i64,
    pub total_win_amount: i64,
    pub total_wins: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PrizePoolState {
    pub contributed_amount: f64,
    pub total_pool: f64,
    pub should_distribute_prizes: bool,
}

#[derive(Debug, Clone)]
pub struct FinalizedRace {
    pub leaderboard: Vec<LeaderboardEntry>,
    pub prize_pool: PrizePoolState,
    pub finalized_at: DateTime<Utc>,
}

pub struct SessionAggregationCache {
    current_race_id: RwLock<Option<String>>,
    races: RwLock<HashMap<String, RaceTable>>,
    pending_saves: RwLock<VecDeque<PendingSave>>,
    persistence: Arc<dyn PersistenceAdapter>,
}

impl SessionAggregationCache {
    pub fn new(persistence: Arc<dyn PersistenceAdapter>) -> Arc<Self> {
        Arc::new(Self {
            current_race_id: RwLock::new(None),
            races: RwLock::new(HashMap::new()),
            pending_saves: RwLock::new(VecDeque::new()),
            persistence,
        })
    }

    pub fn current_race_id(&self) -> Option<String> {
        self.current_race_id.read().clone()
    }

    /// Publishes a new current race (§4.E step 4). Creates an empty table
    /// if the race has no in-memory table yet (fresh race); a restored race
    /// is expected to already have one from `restore_from_database`.
    pub fn set_current_race(&self, race_id: &str) {
        self.races.write().entry(race_id.to_string()).or_default();
        *self.current_race_id.write() = Some(race_id.to_string());
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// §4.D `addSession`. Returns `Ok(None)` (caller logs) if there is no
    /// current race, matching "reject; caller logs" rather than erroring.
    pub fn add_session(&self, mut session: GameSession) -> Option<GameSession> {
        let race_id = self.current_race_id.read().clone()?;
        session.race_id = Some(race_id.clone());

        let net_profit = session.derived_net_profit();
        let contribution = session.contribution_to_pool();

        let mut races = self.races.write();
        let table = races.entry(race_id.clone()).or_default();

        table.global_sessions.push(session.clone());
        table
            .user_sessions
            .entry(session.user_id.clone())
            .or_default()
            .push(session.clone());

        let participant = table
            .participants
            .entry(session.user_id.clone())
            .or_insert_with(|| RaceParticipant::new(race_id.clone(), session.user_id.clone()));
        participant.total_bet_amount += session.bet_amount;
        participant.total_win_amount += session.win_amount;
        participant.net_profit += net_profit;
        participant.contribution_to_pool += contribution;
        participant.session_count += 1;
        participant.last_update_time = Utc::now();

        enforce_top_cap(table);

        drop(races);

        self.pending_saves.write().push_back(PendingSave {
            session: session.clone(),
            attempts: 0,
            enqueued_at: Utc::now(),
        });

        Some(session)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_race_leaderboard(&self, race_id: &str, limit: usize) -> Vec<LeaderboardEntry> {
        let races = self.races.read();
        let Some(table) = races.get(race_id) else { return Vec::new() };
        sorted_by_contribution(table).into_iter().take(limit).enumerate().map(|(i, p)| {
            LeaderboardEntry { rank: (i + 1) as u32, participant: p }
        }).collect()
    }

    pub fn get_race_leaderboard_with_user(
        &self,
        race_id: &str,
        user_id: &str,
        top_limit: usize,
    ) -> Option<LeaderboardWithUser> {
        let races = self.races.read();
        let table = races.get(race_id)?;
        let sorted = sorted_by_contribution(table);

        let top = sorted
            .iter()
            .take(top_limit)
            .enumerate()
            .map(|(i, p)| LeaderboardEntry { rank: (i + 1) as u32, participant: p.clone() })
            .collect();

        let (user_participant, true_rank) = match table.participants.get(user_id) {
            Some(p) => {
                let rank = sorted.iter().position(|row| row.user_id == *user_id).unwrap_or(sorted.len()) + 1;
                (p.clone(), rank as u32)
            }
            None => {
                // Zero stats; placed after all positive-profit users using
                // the zero-profit tie-break (by userId).
                let positive = sorted.iter().filter(|p| p.contribution_to_pool > 0.0).count();
                let zero_before_or_eq = sorted
                    .iter()
                    .filter(|p| p.contribution_to_pool == 0.0 && p.user_id.as_str() <= user_id)
                    .count();
                let rank = (positive + zero_before_or_eq + 1) as u32;
                (RaceParticipant::new(race_id, user_id), rank)
            }
        };

        let display_rank = if true_rank > TOP_CAP as u32 {
            stable_pseudo_rank(race_id, user_id)
        } else {
            true_rank
        };

        Some(LeaderboardWithUser {
            top,
            user_participant,
            user_true_rank: true_rank,
            user_display_rank: display_rank,
        })
    }

    /// Most recent first; falls back to the current race when `race_id` is
    /// omitted.
    pub fn get_user_sessions(
        &self,
        user_id: &str,
        race_id: Option<&str>,
        limit: usize,
    ) -> Vec<GameSession> {
        let races = self.races.read();
        let race_id = race_id.map(str::to_string).or_else(|| self.current_race_id.read().clone());
        let Some(race_id) = race_id else { return Vec::new() };
        let Some(table) = races.get(&race_id) else { return Vec::new() };
        let mut sessions = table.user_sessions.get(user_id).cloned().unwrap_or_default();
        sessions.sort_by(|a, b| b.game_end_time.cmp(&a.game_end_time));
        sessions.truncate(limit);
        sessions
    }

    /// Across the current race, sorted by `timestamp` DESC.
    pub fn get_recent_crashes(&self, limit: usize) -> Vec<GameSession> {
        let races = self.races.read();
        let Some(race_id) = self.current_race_id.read().clone() else { return Vec::new() };
        let Some(table) = races.get(&race_id) else { return Vec::new() };
        let mut sessions = table.global_sessions.clone();
        sessions.sort_by(|a, b| b.game_end_time.cmp(&a.game_end_time));
        sessions.truncate(limit);
        sessions
    }

    /// Rolling statistics derived from in-memory data: the union of the
    /// current race's session lists (§9 open question 2 — no undeclared
    /// cross-race field is introduced).
    pub fn get_global_stats(&self) -> GlobalStats {
        let races = self.races.read();
        let Some(race_id) = self.current_race_id.read().clone() else { return GlobalStats::default() };
        let Some(table) = races.get(&race_id) else { return GlobalStats::default() };

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let mut stats = GlobalStats::default();
        for session in &table.global_sessions {
            if session.game_end_time < cutoff {
                continue;
            }
            stats.session_count += 1;
            stats.total_bet_amount += session.bet_amount;
            stats.total_win_amount += session.win_amount;
            if session.is_win {
                stats.total_wins += 1;
            }
        }
        stats
    }

    /// §4.D prize pool: `contributedAmount` summed across participants,
    /// clamped to the 50,000 minimum guarantee.
    pub fn get_prize_pool(&self, race_id: &str) -> PrizePoolState {
        let races = self.races.read();
        let Some(table) = races.get(race_id) else { return PrizePoolState::default() };
        let contributed: f64 = table.participants.values().map(|p| p.contribution_to_pool).sum();
        PrizePoolState {
            contributed_amount: contributed,
            total_pool: contributed.max(MIN_POOL_GUARANTEE),
            should_distribute_prizes: contributed > 0.0,
        }
    }

    // ------------------------------------------------------------------
    // Finalization / restore
    // ------------------------------------------------------------------

    /// §4.D `finalizeRace`: one forced flush, then returns the final
    /// leaderboard + pool. In-memory data is retained for a further 10
    /// minutes, then evicted by the caller-spawned eviction task.
    pub async fn finalize_race(self: &Arc<Self>, race_id: &str) -> Result<FinalizedRace, CrashCoreError> {
        self.force_flush(race_id).await?;

        let leaderboard = self.get_race_leaderboard(race_id, TOP_CAP);
        let prize_pool = self.get_prize_pool(race_id);
        let finalized_at = Utc::now();

        self.schedule_eviction(race_id);

        Ok(FinalizedRace { leaderboard, prize_pool, finalized_at })
    }

    /// Forces an immediate drain of this race's queued sessions to durable
    /// storage, bypassing the 30s batch cadence.
    async fn force_flush(&self, race_id: &str) -> Result<(), CrashCoreError> {
        let to_flush: Vec<GameSession> = {
            let mut pending = self.pending_saves.write();
            let (matching, rest): (VecDeque<PendingSave>, VecDeque<PendingSave>) =
                pending.drain(..).partition(|p| p.session.race_id.as_deref() == Some(race_id));
            *pending = rest;
            matching.into_iter().map(|p| p.session).collect()
        };
        if to_flush.is_empty() {
            return Ok(());
        }
        self.persistence.insert_sessions_bulk(to_flush).await
    }

    fn schedule_eviction(self: &Arc<Self>, race_id: &str) {
        let this = Arc::clone(self);
        let race_id = race_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(EVICTION_DELAY_SECS)).await;
            this.races.write().remove(&race_id);
            debug!(race_id = %race_id, "evicted finalized race from memory");
        });
    }

    /// §4.D `restoreFromDatabase`: sets the current race and repopulates
    /// `participants` from the persistent projection; optionally warms
    /// `globalSessions`/`userSessions` from the most recent rows.
    pub async fn restore_from_database(&self, race_id: &str) -> Result<(), CrashCoreError> {
        let participants = self.persistence.find_participants_for_race(race_id).await?;
        let mut recent = self.persistence.find_recent_sessions_for_race(race_id, TOP_CAP).await?;
        // stored reverse-chronological; reinsert chronologically
        recent.reverse();

        let mut table = RaceTable::default();
        for participant in participants {
            table.participants.insert(participant.user_id.clone(), participant);
        }
        for session in recent {
            table.global_sessions.push(session.clone());
            table.user_sessions.entry(session.user_id.clone()).or_default().push(session);
        }

        self.races.write().insert(race_id.to_string(), table);
        *self.current_race_id.write() = Some(race_id.to_string());
        Ok(())
    }
}

fn enforce_top_cap(table: &mut RaceTable) {
    if table.participants.len() <= TOP_CAP {
        return;
    }
    let mut rows: Vec<RaceParticipant> = table.participants.values().cloned().collect();
    rows.sort_by(participant_ordering);
    let keep: std::collections::HashSet<String> =
        rows.into_iter().take(TOP_CAP).map(|p| p.user_id).collect();
    table.participants.retain(|user_id, _| keep.contains(user_id));
}

/// Primary key `contributionToPool` DESC, tie-break `userId` ASC. Used for
/// both the Top-1000 cap and public leaderboard/prize ranking (§4.D, §9).
fn participant_ordering(a: &RaceParticipant, b: &RaceParticipant) -> std::cmp::Ordering {
    b.contribution_to_pool
        .partial_cmp(&a.contribution_to_pool)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.user_id.cmp(&b.user_id))
}

fn sorted_by_contribution(table: &RaceTable) -> Vec<RaceParticipant> {
    let mut rows: Vec<RaceParticipant> = table.participants.values().cloned().collect();
    rows.sort_by(participant_ordering);
    rows
}

/// Stable (not purely random) fallback rank for users who fall outside the
/// Top-1000, in `[1001, 10000]`, derived from `(raceId, userId)` so repeat
/// queries are idempotent (§4.D).
fn stable_pseudo_rank(race_id: &str, user_id: &str) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(race_id.as_bytes());
    hasher.update(b":");
    hasher.update(user_id.as_bytes());
    let hash = hasher.finalize();
    let bytes: [u8; 8] = hash.as_bytes()[0..8].try_into().expect("8 bytes");
    let value = u64::from_be_bytes(bytes);
    1001 + (value % 9000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawSession;
    use crate::persistence::InMemoryStore;

    fn cache() -> Arc<SessionAggregationCache> {
        SessionAggregationCache::new(Arc::new(InMemoryStore::new()))
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

    #[test]
    fn add_session_without_race_returns_none() {
        let cache = cache();
        let session = GameSession::from_raw("s1".into(), "r1".into(), raw("user_00000001", 100, 200)).unwrap();
        assert!(cache.add_session(session).is_none());
    }

    #[test]
    fn ingest_updates_participant_and_pool() {
        let cache = cache();
        cache.set_current_race("race_1");
        let session = GameSession::from_raw("s1".into(), "race_1".into(), raw("user_00000001", 100, 200)).unwrap();
        cache.add_session(session).unwrap();

        let board = cache.get_race_leaderboard("race_1", 10);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[0].participant.contribution_to_pool, 2.0);
        assert!(board[0].participant.net_profit >= 0);
    }

    // Universal invariant 2: cap holds after every addSession.
    #[test]
    fn top_cap_enforced_after_every_ingest() {
        let cache = cache();
        cache.set_current_race("race_1");
        for i in 0..1050u32 {
            let user_id = format!("user_{i:08}");
            let session =
                GameSession::from_raw(format!("s{i}"), "race_1".into(), raw(&user_id, 100, 100 + i as i64))
                    .unwrap();
            cache.add_session(session).unwrap();
            let count = cache.races.read().get("race_1").unwrap().participants.len();
            assert!(count <= TOP_CAP, "cap exceeded at i={i}: {count}");
        }
    }

    #[test]
    fn leaderboard_with_user_handles_absent_user() {
        let cache = cache();
        cache.set_current_race("race_1");
        for i in 0..5u32 {
            let user_id = format!("user_{i:08}");
            let session =
                GameSession::from_raw(format!("s{i}"), "race_1".into(), raw(&user_id, 100, 300)).unwrap();
            cache.add_session(session).unwrap();
        }
        let result = cache.get_race_leaderboard_with_user("race_1", "absent_user0", 3).unwrap();
        assert_eq!(result.user_true_rank, 6); // after all 5 positive-profit users
        assert_eq!(result.user_display_rank, 6);
    }

    #[tokio::test]
    async fn restore_from_database_repopulates_participants() {
        let store = Arc::new(InMemoryStore::new());
        let participant = RaceParticipant {
            race_id: "race_1".into(),
            user_id: "user_00000001".into(),
            total_bet_amount: 500,
            total_win_amount: 1000,
            net_profit: 500,
            contribution_to_pool: 10.0,
            session_count: 3,
            rank: None,
            last_update_time: Utc::now(),
        };
        store.bulk_upsert_participants("race_1", vec![participant.clone()]).await.unwrap();

        let cache = SessionAggregationCache::new(store);
        cache.restore_from_database("race_1").await.unwrap();

        assert_eq!(cache.current_race_id(), Some("race_1".to_string()));
        let board = cache.get_race_leaderboard("race_1", 10);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].participant.contribution_to_pool, 10.0);
    }
}
