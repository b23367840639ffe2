//! Reference `PersistenceAdapter` backed by in-process maps. Used by the
//! test suite and suitable for local development without a real database.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{PersistenceAdapter, RacePatch, UserPatch};
use crate::domain::{GameSession, PrizeStatus, Race, RaceParticipant, RacePrize, RaceStatus, User};
use crate::error::CrashCoreError;

#[derive(Default)]
struct Storage {
    users: HashMap<String, User>,
    sessions: Vec<GameSession>,
    participants: HashMap<(String, String), RaceParticipant>,
    races: HashMap<String, Race>,
    prizes: HashMap<String, RacePrize>,
}

pub struct InMemoryStore {
    storage: Mutex<Storage>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { storage: Mutex::new(Storage::default()) }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryStore {
    async fn upsert_user(&self, user_id: &str, patch: UserPatch) -> Result<User, CrashCoreError> {
        let mut storage = self.storage.lock();
        let user = storage.users.entry(user_id.to_string()).or_insert_with(|| User::new(user_id));
        if let Some(delta) = patch.balance_delta {
            user.apply_balance_delta(delta);
        }
        if let Some(delta) = patch.total_flights_delta {
            user.total_flights += delta;
        }
        if let Some(delta) = patch.flights_won_delta {
            user.flights_won += delta;
        }
        if let Some(deleted) = patch.is_deleted {
            user.is_deleted = deleted;
        }
        Ok(user.clone())
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>, CrashCoreError> {
        Ok(self.storage.lock().users.get(user_id).cloned())
    }

    async fn insert_sessions_bulk(&self, sessions: Vec<GameSession>) -> Result<(), CrashCoreError> {
        let mut storage = self.storage.lock();
        let existing: std::collections::HashSet<String> =
            storage.sessions.iter().map(|s| s.session_id.clone()).collect();
        for session in sessions {
            if !existing.contains(&session.session_id) {
                storage.sessions.push(session);
            }
        }
        Ok(())
    }

    async fn bulk_upsert_participants(
        &self,
        race_id: &str,
        rows: Vec<RaceParticipant>,
    ) -> Result<(), CrashCoreError> {
        let mut storage = self.storage.lock();
        for row in rows {
            storage
                .participants
                .insert((race_id.to_string(), row.user_id.clone()), row);
        }
        Ok(())
    }

    async fn insert_race(&self, race: Race) -> Result<(), CrashCoreError> {
        self.storage.lock().races.insert(race.race_id.clone(), race);
        Ok(())
    }

    async fn update_race(&self, race_id: &str, patch: RacePatch) -> Result<Race, CrashCoreError> {
        let mut storage = self.storage.lock();
        let race = storage
            .races
            .get_mut(race_id)
            .ok_or_else(|| CrashCoreError::not_found("Race", race_id))?;
        if let Some(status) = patch.status {
            race.status = status;
        }
        if let Some(t) = patch.actual_end_time {
            race.actual_end_time = Some(t);
        }
        if let Some(v) = patch.final_prize_pool {
            race.final_prize_pool = v;
        }
        if let Some(v) = patch.final_contribution {
            race.final_contribution = v;
        }
        if let Some(v) = patch.total_participants {
            race.total_participants = v;
        }
        if let Some(t) = patch.finalized_at {
            race.finalized_at = Some(t);
        }
        Ok(race.clone())
    }

    async fn find_active_race(&self) -> Result<Option<Race>, CrashCoreError> {
        Ok(self
            .storage
            .lock()
            .races
            .values()
            .find(|r| r.status == RaceStatus::Active)
            .cloned())
    }

    async fn find_race_history(&self, limit: usize) -> Result<Vec<Race>, CrashCoreError> {
        let storage = self.storage.lock();
        let mut races: Vec<Race> = storage
            .races
            .values()
            .filter(|r| r.status == RaceStatus::Completed)
            .cloned()
            .collect();
        races.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        races.truncate(limit);
        Ok(races)
    }

    async fn insert_prizes(&self, prizes: Vec<RacePrize>) -> Result<(), CrashCoreError> {
        let mut storage = self.storage.lock();
        for prize in prizes {
            storage.prizes.insert(prize.prize_id.clone(), prize);
        }
        Ok(())
    }

    async fn find_user_pending_prizes(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RacePrize>, CrashCoreError> {
        let storage = self.storage.lock();
        let mut prizes: Vec<RacePrize> = storage
            .prizes
            .values()
            .filter(|p| p.user_id == user_id && p.status == PrizeStatus::Pending)
            .cloned()
            .collect();
        prizes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        prizes.truncate(limit);
        Ok(prizes)
    }

    async fn find_user_prize_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RacePrize>, CrashCoreError> {
        let storage = self.storage.lock();
        let mut prizes: Vec<RacePrize> =
            storage.prizes.values().filter(|p| p.user_id == user_id).cloned().collect();
        prizes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        prizes.truncate(limit);
        Ok(prizes)
    }

    async fn find_prizes_by_race(&self, race_id: &str) -> Result<Vec<RacePrize>, CrashCoreError> {
        let storage = self.storage.lock();
        Ok(storage.prizes.values().filter(|p| p.race_id == race_id).cloned().collect())
    }

    async fn claim_prize(&self, prize_id: &str, user_id: &str) -> Result<RacePrize, CrashCoreError> {
        let mut storage = self.storage.lock();
        let prize = storage
            .prizes
            .get_mut(prize_id)
            .ok_or_else(|| CrashCoreError::not_found("RacePrize", prize_id))?;
        if prize.user_id != user_id {
            return Err(CrashCoreError::forbidden("prize does not belong to user"));
        }
        if prize.status != PrizeStatus::Pending {
            return Err(CrashCoreError::conflict("prize already claimed"));
        }
        prize.status = PrizeStatus::Claimed;
        prize.claimed_at = Some(chrono::Utc::now());
        Ok(prize.clone())
    }

    async fn find_recent_sessions_for_race(
        &self,
        race_id: &str,
        limit: usize,
    ) -> Result<Vec<GameSession>, CrashCoreError> {
        let storage = self.storage.lock();
        let mut sessions: Vec<GameSession> = storage
            .sessions
            .iter()
            .filter(|s| s.race_id.as_deref() == Some(race_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.game_end_time.cmp(&a.game_end_time));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn find_participants_for_race(
        &self,
        race_id: &str,
    ) -> Result<Vec<RaceParticipant>, CrashCoreError> {
        let storage = self.storage.lock();
        Ok(storage
            .participants
            .values()
            .filter(|p| p.race_id == race_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_prize_is_cas() {
        let store = InMemoryStore::new();
        store
            .insert_prizes(vec![RacePrize {
                prize_id: "p1".into(),
                race_id: "r1".into(),
                user_id: "u1".into(),
                rank: 1,
                prize_amount: 1000,
                percentage: 0.5,
                status: PrizeStatus::Pending,
                created_at: chrono::Utc::now(),
                claimed_at: None,
                contribution_to_pool: 10.0,
                session_count: 2,
            }])
            .await
            .unwrap();

        let claimed = store.claim_prize("p1", "u1").await.unwrap();
        assert_eq!(claimed.status, PrizeStatus::Claimed);

        let second = store.claim_prize("p1", "u1").await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn claim_prize_rejects_wrong_user() {
        let store = InMemoryStore::new();
        store
            .insert_prizes(vec![RacePrize {
                prize_id: "p1".into(),
                race_id: "r1".into(),
                user_id: "u1".into(),
                rank: 1,
                prize_amount: 1000,
                percentage: 0.5,
                status: PrizeStatus::Pending,
                created_at: chrono::Utc::now(),
                claimed_at: None,
                contribution_to_pool: 10.0,
                session_count: 2,
            }])
            .await
            .unwrap();

        let result = store.claim_prize("p1", "someone-else").await;
        assert!(matches!(result, Err(CrashCoreError::Forbidden { .. })));
    }

    #[tokio::test]
    async fn balance_never_goes_negative() {
        let store = InMemoryStore::new();
        store
            .upsert_user("user_00000001", UserPatch { balance_delta: Some(10), ..Default::default() })
            .await
            .unwrap();
        let user = store
            .upsert_user("user_00000001", UserPatch { balance_delta: Some(-100), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(user.balance, 0);
    }
}
