use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RaceStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

/// §3 `Race`. At most one `active` race at any time — enforced by the Race
/// Lifecycle Manager (4.E), not by this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Race {
    pub race_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub actual_end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub status: RaceStatus,
    pub final_prize_pool: i64,
    pub final_contribution: f64,
    pub total_participants: u32,
    pub finalized_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub const RACE_DURATION_HOURS: i64 = 4;

impl Race {
    pub fn new_active(race_id: impl Into<String>, start_time: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            race_id: race_id.into(),
            start_time,
            end_time: start_time + chrono::Duration::hours(RACE_DURATION_HOURS),
            actual_end_time: None,
            status: RaceStatus::Active,
            final_prize_pool: 0,
            final_contribution: 0.0,
            total_participants: 0,
            finalized_at: None,
        }
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.end_time
    }
}
