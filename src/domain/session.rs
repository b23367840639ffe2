use serde::{Deserialize, Serialize};

use crate::error::CrashCoreError;

/// A resolved bet (§3 `GameSession`). `isWin ⇔ cashOutMultiplier > 0 ⇔
/// profit > 0` is an invariant of construction, not re-checked on read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameSession {
    pub session_id: String,
    pub race_id: Option<String>,
    pub user_id: String,
    pub bet_amount: i64,
    pub crash_multiplier: f64,
    pub cash_out_multiplier: f64,
    pub is_win: bool,
    pub win_amount: i64,
    pub profit: i64,
    pub game_start_time: chrono::DateTime<chrono::Utc>,
    pub game_end_time: chrono::DateTime<chrono::Utc>,
    pub game_duration_ms: i64,
    pub is_free_mode: bool,
}

/// Raw inputs from the bet-settlement pathway, before this crate stamps
/// derived fields (§4.D step 2).
#[derive(Debug, Clone)]
pub struct RawSession {
    pub user_id: String,
    pub bet_amount: i64,
    pub crash_multiplier: f64,
    pub cash_out_multiplier: f64,
    pub win_amount: i64,
    pub game_start_time: chrono::DateTime<chrono::Utc>,
    pub game_end_time: chrono::DateTime<chrono::Utc>,
    pub is_free_mode: bool,
}

impl GameSession {
    pub fn from_raw(
        session_id: String,
        race_id: String,
        raw: RawSession,
    ) -> Result<Self, CrashCoreError> {
        if raw.bet_amount < 1 {
            return Err(CrashCoreError::validation("betAmount", "must be >= 1"));
        }
        if raw.crash_multiplier < 1.0 {
            return Err(CrashCoreError::validation("crashMultiplier", "must be >= 1.0"));
        }
        if raw.cash_out_multiplier < 0.0 {
            return Err(CrashCoreError::validation("cashOutMultiplier", "must be >= 0"));
        }
        if raw.win_amount < 0 {
            return Err(CrashCoreError::validation("winAmount", "must be >= 0"));
        }

        let is_win = raw.cash_out_multiplier > 0.0;
        let profit = raw.win_amount - raw.bet_amount;
        if is_win != (profit > 0) {
            return Err(CrashCoreError::validation(
                "cashOutMultiplier",
                "isWin, cashOutMultiplier, and profit must agree",
            ));
        }

        let duration_ms = (raw.game_end_time - raw.game_start_time).num_milliseconds().max(0);

        Ok(Self {
            session_id,
            race_id: Some(race_id),
            user_id: raw.user_id,
            bet_amount: raw.bet_amount,
            crash_multiplier: raw.crash_multiplier,
            cash_out_multiplier: raw.cash_out_multiplier,
            is_win,
            win_amount: raw.win_amount,
            profit,
            game_start_time: raw.game_start_time,
            game_end_time: raw.game_end_time,
            game_duration_ms: duration_ms,
            is_free_mode: raw.is_free_mode,
        })
    }

    /// §4.D step 2: `netProfit = max(0, winAmount - betAmount)`.
    pub fn derived_net_profit(&self) -> i64 {
        (self.win_amount - self.bet_amount).max(0)
    }

    /// §4.D step 4: 1% of gross win.
    pub fn contribution_to_pool(&self) -> f64 {
        (self.win_amount.max(0) as f64) * 0.01
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn raw(bet: i64, cash_out: f64, win: i64) -> RawSession {
        RawSession {
            user_id: "user_00000001".into(),
            bet_amount: bet,
            crash_multiplier: 2.0,
            cash_out_multiplier: cash_out,
            win_amount: win,
            game_start_time: Utc::now(),
            game_end_time: Utc::now(),
            is_free_mode: false,
        }
    }

    #[test]
    fn win_invariant_holds() {
        let s = GameSession::from_raw("s1".into(), "r1".into(), raw(100, 2.0, 200)).unwrap();
        assert!(s.is_win);
        assert!(s.profit > 0);
    }

    #[test]
    fn loss_invariant_holds() {
        let s = GameSession::from_raw("s1".into(), "r1".into(), raw(100, 0.0, 0)).unwrap();
        assert!(!s.is_win);
        assert_eq!(s.profit, -100);
    }

    #[test]
    fn rejects_inconsistent_win_flag() {
        // cash_out > 0 but win_amount <= bet_amount => profit not > 0
        assert!(GameSession::from_raw("s1".into(), "r1".into(), raw(100, 2.0, 100)).is_err());
    }

    #[test]
    fn contribution_is_one_percent_of_gross_win() {
        let s = GameSession::from_raw("s1".into(), "r1".into(), raw(100, 2.0, 250)).unwrap();
        assert_eq!(s.contribution_to_pool(), 2.5);
    }
}
