//! Persistence Adapter (4.F) — typed surface over whatever durable store a
//! consuming service wires in. This crate ships one reference
//! implementation, `InMemoryStore`, used by tests and suitable for local
//! development without a real database.

mod memory;
mod retry;

pub use memory::InMemoryStore;
pub use retry::with_backoff;

use async_trait::async_trait;

use crate::domain::{GameSession, Race, RaceParticipant, RacePrize, User};
use crate::error::CrashCoreError;

/// Server-selection timeout a real `PersistenceAdapter` should apply to its
/// underlying driver (§5). `InMemoryStore` has no network hop and ignores it.
pub const SERVER_SELECTION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Connect timeout a real `PersistenceAdapter` should apply (§5).
pub const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Patch applied to a `User` record by `upsertUser`. `None` fields are left
/// untouched (same "absent preserves current value" rule as §4.B).
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub balance_delta: Option<i64>,
    pub total_flights_delta: Option<u64>,
    pub flights_won_delta: Option<u64>,
    pub is_deleted: Option<bool>,
}

/// Patch applied to a `Race` record by `updateRace`.
#[derive(Debug, Clone, Default)]
pub struct RacePatch {
    pub status: Option<crate::domain::RaceStatus>,
    pub actual_end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub final_prize_pool: Option<i64>,
    pub final_contribution: Option<f64>,
    pub total_participants: Option<u32>,
    pub finalized_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn upsert_user(&self, user_id: &str, patch: UserPatch) -> Result<User, CrashCoreError>;
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, CrashCoreError>;

    /// Unordered bulk insert; continues past duplicate-key errors rather
    /// than aborting the whole batch.
    async fn insert_sessions_bulk(&self, sessions: Vec<GameSession>) -> Result<(), CrashCoreError>;

    /// Unordered bulk upsert keyed by `(raceId, userId)`.
    async fn bulk_upsert_participants(
        &self,
        race_id: &str,
        rows: Vec<RaceParticipant>,
    ) -> Result<(), CrashCoreError>;

    async fn insert_race(&self, race: Race) -> Result<(), CrashCoreError>;
    async fn update_race(&self, race_id: &str, patch: RacePatch) -> Result<Race, CrashCoreError>;
    async fn find_active_race(&self) -> Result<Option<Race>, CrashCoreError>;
    async fn find_race_history(&self, limit: usize) -> Result<Vec<Race>, CrashCoreError>;

    async fn insert_prizes(&self, prizes: Vec<RacePrize>) -> Result<(), CrashCoreError>;
    async fn find_user_pending_prizes(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RacePrize>, CrashCoreError>;
    async fn find_user_prize_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RacePrize>, CrashCoreError>;
    async fn find_prizes_by_race(&self, race_id: &str) -> Result<Vec<RacePrize>, CrashCoreError>;

    /// CAS from `pending` to `claimed` with `claimedAt=now`. Returns
    /// `CrashCoreError::Conflict` (`AlreadyClaimed`) if the prize is not
    /// `pending`, or `NotFound` if it doesn't belong to `user_id`.
    async fn claim_prize(&self, prize_id: &str, user_id: &str) -> Result<RacePrize, CrashCoreError>;

    /// Most recent `GameSession` rows for a race, reverse-chronological,
    /// for warm restore (§4.D `restoreFromDatabase`).
    async fn find_recent_sessions_for_race(
        &self,
        race_id: &str,
        limit: usize,
    ) -> Result<Vec<GameSession>, CrashCoreError>;

    /// Persisted `RaceParticipant` projection for a race, used to repopulate
    /// `participants` on restore.
    async fn find_participants_for_race(
        &self,
        race_id: &str,
    ) -> Result<Vec<RaceParticipant>, CrashCoreError>;
}
