use serde::{Deserialize, Serialize};

use crate::error::CrashCoreError;

/// External entity, read/write via `PersistenceAdapter`. This core only
/// reads/writes the fields it actually touches; preference blobs such as
/// `autoCashOut` (§9 open question 4) are opaque to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: String,
    pub balance: i64,
    pub total_flights: u64,
    pub flights_won: u64,
    pub is_deleted: bool,
}

impl User {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: 0,
            total_flights: 0,
            flights_won: 0,
            is_deleted: false,
        }
    }

    pub fn validate_user_id(user_id: &str) -> Result<(), CrashCoreError> {
        let len_ok = (8..=50).contains(&user_id.len());
        let chars_ok = user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if len_ok && chars_ok {
            Ok(())
        } else {
            Err(CrashCoreError::validation(
                "userId",
                "must be 8-50 chars of [A-Za-z0-9_-]",
            ))
        }
    }

    /// Balance never goes negative; decrements saturate at 0.
    pub fn apply_balance_delta(&mut self, delta: i64) {
        let next = self.balance.saturating_add(delta);
        self.balance = next.max(0);
    }

    pub fn record_flight(&mut self, won: bool) {
        self.total_flights += 1;
        if won {
            self.flights_won += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_user_id_shape() {
        assert!(User::validate_user_id("abcdefgh").is_ok());
        assert!(User::validate_user_id("short").is_err());
        assert!(User::validate_user_id("has a space_ok").is_err());
    }

    #[test]
    fn balance_decrement_saturates_at_zero() {
        let mut u = User::new("user_0000");
        u.balance = 10;
        u.apply_balance_delta(-100);
        assert_eq!(u.balance, 0);
    }

    #[test]
    fn flights_won_never_exceeds_total() {
        let mut u = User::new("user_0000");
        u.record_flight(true);
        u.record_flight(false);
        assert!(u.flights_won <= u.total_flights);
    }
}
