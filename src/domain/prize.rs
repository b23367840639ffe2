use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PrizeStatus {
    Pending,
    Claimed,
}

/// §3 `RacePrize`. Never expires; `pending → claimed` is irreversible,
/// enforced by `PersistenceAdapter::claim_prize`'s CAS semantics rather than
/// by this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RacePrize {
    pub prize_id: String,
    pub race_id: String,
    pub user_id: String,
    pub rank: u32,
    pub prize_amount: i64,
    pub percentage: f64,
    pub status: PrizeStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// User performance snapshot at finalization time, for prize history UIs.
    pub contribution_to_pool: f64,
    pub session_count: u32,
}
