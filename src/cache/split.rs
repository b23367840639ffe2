//! Prize split (§4.D): 50/25/11 to ranks 1-3, 14% divided equally across
//! ranks 4-10, floored to integer amounts.

use crate::domain::RaceParticipant;

#[derive(Debug, Clone, PartialEq)]
pub struct PrizeShare {
    pub rank: u32,
    pub user_id: String,
    pub amount: i64,
    pub percentage: f64,
}

const RANK_1_SHARE: f64 = 0.50;
const RANK_2_SHARE: f64 = 0.25;
const RANK_3_SHARE: f64 = 0.11;
const RANKS_4_TO_10_SHARE: f64 = 0.14;
const RANKS_4_TO_10_COUNT: u32 = 7;

/// `leaderboard` must already be ordered by `contributionToPool` DESC,
/// `userId` ASC (the same ordering used for the Top-1000 cap). Returns one
/// entry per occupied rank in `1..=10`; fewer than 10 participants means
/// the trailing ranks are simply absent.
pub fn distribute_prizes(leaderboard: &[RaceParticipant], total_pool: f64) -> Vec<PrizeShare> {
    let mut shares = Vec::new();

    for (index, participant) in leaderboard.iter().take(10).enumerate() {
        let rank = (index + 1) as u32;
        let percentage = match rank {
            1 => RANK_1_SHARE,
            2 => RANK_2_SHARE,
            3 => RANK_3_SHARE,
            4..=10 => RANKS_4_TO_10_SHARE / RANKS_4_TO_10_COUNT as f64,
            _ => unreachable!("take(10) bounds rank to 1..=10"),
        };
        let amount = (total_pool * percentage).floor() as i64;
        shares.push(PrizeShare {
            rank,
            user_id: participant.user_id.clone(),
            amount,
            percentage,
        });
    }

    shares
}
