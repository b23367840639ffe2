//! Opaque id generation. §9: ids are opaque strings; `raceId` must additionally
//! be lexicographically time-monotonic so restart/restore ordering holds.

use chrono::{DateTime, Utc};
use rand::Rng;

/// `race_YYYYMMDDHHMMSS`, generated from the current clock. Monotone as long
/// as the clock is monotone (universal invariant 7 in §8 relies on this).
pub fn new_race_id(now: DateTime<Utc>) -> String {
    format!("race_{}", now.format("%Y%m%d%H%M%S"))
}

/// Opaque per-round id. Freshness, not structure, is the only requirement
/// (§4.C: "a fresh opaque id per round").
pub fn new_game_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: u64 = rng.gen();
    format!("game_{:016x}", suffix)
}

/// Opaque per-session id, unique per `GameSession` (§3).
pub fn new_session_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: u64 = rng.gen();
    format!("sess_{:016x}", suffix)
}

/// Opaque per-prize id, unique per `RacePrize` (§3).
pub fn new_prize_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: u64 = rng.gen();
    format!("prize_{:016x}", suffix)
}
