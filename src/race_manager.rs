//! Race Lifecycle Manager (4.E) — races start/stop, restore-on-boot,
//! settlement into pending prize records, and claim-time crediting.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::cache::{distribute_prizes, SessionAggregationCache};
use crate::domain::{PrizeStatus, Race, RacePrize, RaceStatus, RACE_DURATION_HOURS};
use crate::error::CrashCoreError;
use crate::events::{RaceEvent, RaceEventBus};
use crate::ids::{new_prize_id, new_race_id};
use crate::persistence::{PersistenceAdapter, RacePatch};

/// External collaborator: applies a prize grant to a user's balance. User
/// balance mutation itself is out of scope for this crate (§1) — this
/// trait is the seam a consuming service implements against its own user
/// store.
#[async_trait]
pub trait UserCreditSink: Send + Sync {
    async fn credit(&self, user_id: &str, amount: i64, prize_id: &str) -> Result<(), CrashCoreError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RaceManagerConfig {
    pub race_duration: chrono::Duration,
    pub auto_start_delay: StdDuration,
}

impl Default for RaceManagerConfig {
    fn default() -> Self {
        Self {
            race_duration: chrono::Duration::hours(RACE_DURATION_HOURS),
            auto_start_delay: StdDuration::from_secs(5),
        }
    }
}

pub struct RaceLifecycleManager {
    persistence: Arc<dyn PersistenceAdapter>,
    cache: Arc<SessionAggregationCache>,
    credit_sink: Arc<dyn UserCreditSink>,
    events: RaceEventBus,
    config: RaceManagerConfig,
    /// The race this manager considers "current", mirroring ownership of
    /// race identity (§3 ownership: E owns `Race` and declares identity).
    current_race_id: Mutex<Option<String>>,
}

impl RaceLifecycleManager {
    pub fn new(
        persistence: Arc<dyn PersistenceAdapter>,
        cache: Arc<SessionAggregationCache>,
        credit_sink: Arc<dyn UserCreditSink>,
        config: RaceManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            persistence,
            cache,
            credit_sink,
            events: RaceEventBus::new(),
            config,
            current_race_id: Mutex::new(None),
        })
    }

    pub fn events(&self) -> RaceEventBus {
        self.events.clone()
    }

    pub fn current_race_id(&self) -> Option<String> {
        self.current_race_id.lock().clone()
    }

    /// §4.E boot sequence. Spawns the scheduled end-race timer (or starts a
    /// fresh race) and returns once the decision has been made; the actual
    /// `endRaceById` fires later on its own spawned task.
    pub async fn run_boot_sequence(self: &Arc<Self>) {
        tokio::time::sleep(self.config.auto_start_delay).await;

        match self.persistence.find_active_race().await {
            Ok(Some(race)) if race.end_time > Utc::now() => {
                info!(race_id = %race.race_id, "restoring active race across restart");
                if let Err(err) = self.cache.restore_from_database(&race.race_id).await {
                    error!(race_id = %race.race_id, error = %err, "failed to restore race, starting a new one instead");
                    self.start_new_race().await;
                    return;
                }
                *self.current_race_id.lock() = Some(race.race_id.clone());
                self.schedule_end_race_at(race.race_id, race.end_time);
            }
            Ok(Some(race)) => {
                info!(race_id = %race.race_id, "active race already expired, ending it before starting a new one");
                self.settle_race(&race.race_id).await;
                self.start_new_race().await;
            }
            Ok(None) => {
                self.start_new_race().await;
            }
            Err(err) => {
                error!(error = %err, "failed to query active race on boot, starting a new one");
                self.start_new_race().await;
            }
        }

        self.spawn_watchdog();
    }

    /// Backup interval timer (`raceDuration`) — the authoritative
    /// transitions are `endRaceById` firing on `endTime`; this only catches
    /// the case where that timer was lost (e.g. the spawned task panicked).
    fn spawn_watchdog(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let interval = this
                .config
                .race_duration
                .to_std()
                .unwrap_or(StdDuration::from_secs(4 * 60 * 60));
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match this.persistence.find_active_race().await {
                    Ok(Some(race)) if race.is_expired(Utc::now()) => {
                        warn!(race_id = %race.race_id, "watchdog recovering an expired race with no scheduled end");
                        this.settle_race(&race.race_id).await;
                        this.start_new_race().await;
                    }
                    Ok(None) => {
                        warn!("watchdog found no active race, starting one");
                        this.start_new_race().await;
                    }
                    _ => {}
                }
            }
        });
    }

    /// §4.E `startNewRace`.
    pub async fn start_new_race(self: &Arc<Self>) {
        if let Some(current) = self.current_race_id.lock().clone() {
            if matches!(self.persistence.find_active_race().await, Ok(Some(r)) if r.race_id == current) {
                self.settle_race(&current).await;
            }
        }

        let now = Utc::now();
        let race_id = new_race_id(now);
        let race = Race::new_active(race_id.clone(), now);

        if let Err(err) = self.persistence.insert_race(race.clone()).await {
            error!(race_id = %race_id, error = %err, "failed to persist new race");
            return;
        }

        self.cache.set_current_race(&race_id);
        *self.current_race_id.lock() = Some(race_id.clone());
        self.events.publish(RaceEvent::RaceStarted { race_id: race_id.clone() });
        info!(race_id = %race_id, end_time = %race.end_time, "started new race");

        self.schedule_end_race_at(race_id, race.end_time);
    }

    fn schedule_end_race_at(self: &Arc<Self>, race_id: String, end_time: chrono::DateTime<chrono::Utc>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let remaining = (end_time - Utc::now()).to_std().unwrap_or(StdDuration::from_secs(0));
            tokio::time::sleep(remaining).await;
            this.end_race_by_id(&race_id).await;
        });
    }

    /// §4.E `endRaceById`: settle, then immediately start the next race.
    pub async fn end_race_by_id(self: &Arc<Self>, race_id: &str) {
        self.settle_race(race_id).await;
        self.start_new_race().await;
    }

    /// Backs `POST /race/prizes/:prizeId/claim`. The `pending -> claimed`
    /// CAS in the persistence layer only ever succeeds once, so the credit
    /// attempt gated behind it is idempotent on `(prizeId, userId)` by
    /// construction (§9 open question 3) — no separate dedup guard needed.
    /// A failed credit is logged but does not roll back the claim.
    pub async fn claim_prize(&self, prize_id: &str, user_id: &str) -> Result<RacePrize, CrashCoreError> {
        let prize = self.persistence.claim_prize(prize_id, user_id).await?;
        if let Err(err) = self.credit_sink.credit(&prize.user_id, prize.prize_amount, &prize.prize_id).await {
            warn!(user_id = %prize.user_id, prize_id = %prize.prize_id, error = %err, "failed to credit claimed prize, continuing");
        }
        Ok(prize)
    }

    /// Finalize, distribute, persist `pending` prize records, and mark the
    /// `Race` record completed. Crediting winners' balances happens later,
    /// at claim time (`claim_prize`), not here. Does **not** start the next
    /// race — callers that need the full `endRaceById` behavior call
    /// `end_race_by_id` instead; `start_new_race`'s own "end current race
    /// first" step calls this directly to avoid re-entering its own start
    /// logic.
    async fn settle_race(self: &Arc<Self>, race_id: &str) {
        let finalized = match self.cache.finalize_race(race_id).await {
            Ok(f) => f,
            Err(err) => {
                error!(race_id = %race_id, error = %err, "failed to finalize race");
                return;
            }
        };

        let leaderboard: Vec<_> = finalized.leaderboard.iter().map(|e| e.participant.clone()).collect();
        let shares = if finalized.prize_pool.should_distribute_prizes {
            distribute_prizes(&leaderboard, finalized.prize_pool.total_pool)
        } else {
            Vec::new()
        };

        let mut prizes = Vec::with_capacity(shares.len());
        for share in &shares {
            let participant = leaderboard.iter().find(|p| p.user_id == share.user_id);
            prizes.push(RacePrize {
                prize_id: new_prize_id(),
                race_id: race_id.to_string(),
                user_id: share.user_id.clone(),
                rank: share.rank,
                prize_amount: share.amount,
                percentage: share.percentage,
                status: PrizeStatus::Pending,
                created_at: Utc::now(),
                claimed_at: None,
                contribution_to_pool: participant.map(|p| p.contribution_to_pool).unwrap_or(0.0),
                session_count: participant.map(|p| p.session_count).unwrap_or(0),
            });
        }

        if !prizes.is_empty() {
            if let Err(err) = self.persistence.insert_prizes(prizes.clone()).await {
                warn!(race_id = %race_id, error = %err, "bulk prize insert failed, falling back to one-by-one");
                for prize in &prizes {
                    if let Err(err) = self.persistence.insert_prizes(vec![prize.clone()]).await {
                        error!(prize_id = %prize.prize_id, error = %err, "failed to persist prize");
                    }
                }
            }
        }

        let patch = RacePatch {
            status: Some(RaceStatus::Completed),
            actual_end_time: Some(Utc::now()),
            final_prize_pool: Some(finalized.prize_pool.total_pool as i64),
            final_contribution: Some(finalized.prize_pool.contributed_amount),
            total_participants: Some(finalized.leaderboard.len() as u32),
            finalized_at: Some(finalized.finalized_at),
        };
        if let Err(err) = self.persistence.update_race(race_id, patch).await {
            error!(race_id = %race_id, error = %err, "failed to update race record after settlement");
        }

        self.events.publish(RaceEvent::RaceFinalized {
            race_id: race_id.to_string(),
            total_participants: finalized.leaderboard.len(),
            final_prize_pool: finalized.prize_pool.total_pool as i64,
        });
        info!(race_id = %race_id, participants = finalized.leaderboard.len(), "race settled");
    }
}
