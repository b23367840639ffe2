//! Entity types for the data model in §3: `User`, `GameSession`,
//! `RaceParticipant`, `Race`, `RacePrize`. Plain, `serde`-derived structs.

mod prize;
mod race;
mod session;
mod user;

pub use prize::{PrizeStatus, RacePrize};
pub use race::{Race, RaceStatus, RACE_DURATION_HOURS};
pub use session::{GameSession, RawSession};
pub use user::User;

use serde::{Deserialize, Serialize};

/// Per-race-user Top-1000 projection (§3 `RaceParticipant`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceParticipant {
    pub race_id: String,
    pub user_id: String,
    pub total_bet_amount: i64,
    pub total_win_amount: i64,
    /// Non-negative clamp at ingest: only positive per-session profit accrues.
    pub net_profit: i64,
    pub contribution_to_pool: f64,
    pub session_count: u32,
    pub rank: Option<u32>,
    pub last_update_time: chrono::DateTime<chrono::Utc>,
}

impl RaceParticipant {
    pub fn new(race_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            race_id: race_id.into(),
            user_id: user_id.into(),
            total_bet_amount: 0,
            total_win_amount: 0,
            net_profit: 0,
            contribution_to_pool: 0.0,
            session_count: 0,
            rank: None,
            last_update_time: chrono::Utc::now(),
        }
    }
}
