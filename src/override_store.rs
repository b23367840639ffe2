//! Next-Round Override Store (4.B) — at-most-one pending per-user
//! `(betAmount, multiplier)` override, consumed exactly once.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::CrashCoreError;

const DEFAULT_BET_AMOUNT: i64 = 10;
const DEFAULT_MULTIPLIER: f64 = 0.0;

const MIN_BET_AMOUNT: i64 = 1;
const MAX_BET_AMOUNT: i64 = 999_999_999;
const MIN_MULTIPLIER: f64 = 0.0;
const MAX_MULTIPLIER: f64 = 1000.0;

/// A pending override record for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserNextRoundOverride {
    pub user_id: String,
    pub next_bet_amount: i64,
    /// `0` disables the override, otherwise it's a strict override value.
    pub next_crash_multiplier: f64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// §4.B store. Guarded by a single coarse `Mutex`: because the mutation is
/// synchronous and purely in-memory (§5), a coarse lock already gives the
/// required per-`userId` serialization without a lock-per-key map to manage.
pub struct OverrideStore {
    records: Mutex<HashMap<String, UserNextRoundOverride>>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self { records: Mutex::new(HashMap::new()) }
    }

    /// Upsert. Absent fields preserve current values; a brand-new record
    /// defaults to `(10, 0)`.
    pub fn set(
        &self,
        user_id: &str,
        bet_amount: Option<i64>,
        multiplier: Option<f64>,
    ) -> Result<UserNextRoundOverride, CrashCoreError> {
        if let Some(amount) = bet_amount {
            if !(MIN_BET_AMOUNT..=MAX_BET_AMOUNT).contains(&amount) {
                return Err(CrashCoreError::validation(
                    "betAmount",
                    format!("must be in [{MIN_BET_AMOUNT}, {MAX_BET_AMOUNT}]"),
                ));
            }
        }
        if let Some(mult) = multiplier {
            if !(MIN_MULTIPLIER..=MAX_MULTIPLIER).contains(&mult) {
                return Err(CrashCoreError::validation(
                    "multiplier",
                    format!("must be in [{MIN_MULTIPLIER}, {MAX_MULTIPLIER}]"),
                ));
            }
        }

        let mut records = self.records.lock();
        let now = chrono::Utc::now();
        let entry = records
            .entry(user_id.to_string())
            .or_insert_with(|| UserNextRoundOverride {
                user_id: user_id.to_string(),
                next_bet_amount: DEFAULT_BET_AMOUNT,
                next_crash_multiplier: DEFAULT_MULTIPLIER,
                updated_at: now,
            });

        if let Some(amount) = bet_amount {
            entry.next_bet_amount = amount;
        }
        if let Some(mult) = multiplier {
            entry.next_crash_multiplier = mult;
        }
        entry.updated_at = now;
        Ok(entry.clone())
    }

    /// Atomic consume-if-match: returns the multiplier and deletes the
    /// record only if it exists, is enabled (`nextCrashMultiplier > 0`), and
    /// `nextBetAmount == betAmount`. Otherwise the record, if any, is left
    /// untouched. Idempotent: a second call with the same key returns
    /// `None` (S5 in §8 numbering: property 5).
    pub fn consume_if_match(&self, user_id: &str, bet_amount: i64) -> Option<f64> {
        let mut records = self.records.lock();
        let matches = records
            .get(user_id)
            .map(|r| r.next_crash_multiplier > 0.0 && r.next_bet_amount == bet_amount)
            .unwrap_or(false);

        if matches {
            records.remove(user_id).map(|r| r.next_crash_multiplier)
        } else {
            None
        }
    }

    pub fn get(&self, user_id: &str) -> Option<UserNextRoundOverride> {
        self.records.lock().get(user_id).cloned()
    }
}

impl Default for OverrideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_defaults_new_record() {
        let store = OverrideStore::new();
        let rec = store.set("u1", None, None).unwrap();
        assert_eq!(rec.next_bet_amount, DEFAULT_BET_AMOUNT);
        assert_eq!(rec.next_crash_multiplier, DEFAULT_MULTIPLIER);
    }

    #[test]
    fn set_preserves_absent_fields() {
        let store = OverrideStore::new();
        store.set("u1", Some(50), Some(2.5)).unwrap();
        let rec = store.set("u1", Some(75), None).unwrap();
        assert_eq!(rec.next_bet_amount, 75);
        assert_eq!(rec.next_crash_multiplier, 2.5);
    }

    #[test]
    fn rejects_out_of_range() {
        let store = OverrideStore::new();
        assert!(store.set("u1", Some(0), None).is_err());
        assert!(store.set("u1", None, Some(1001.0)).is_err());
    }

    // S3: override consumption + idempotency.
    #[test]
    fn s3_override_consumption_is_single_use() {
        let store = OverrideStore::new();
        store.set("U1", Some(100), Some(7.5)).unwrap();

        let first = store.consume_if_match("U1", 100);
        assert_eq!(first, Some(7.5));

        let second = store.consume_if_match("U1", 100);
        assert_eq!(second, None);
        assert!(store.get("U1").is_none());
    }

    #[test]
    fn consume_requires_bet_amount_match() {
        let store = OverrideStore::new();
        store.set("U1", Some(100), Some(7.5)).unwrap();
        assert_eq!(store.consume_if_match("U1", 50), None);
        // record untouched on a mismatch
        assert_eq!(store.consume_if_match("U1", 100), Some(7.5));
    }

    #[test]
    fn disabled_override_never_consumes() {
        let store = OverrideStore::new();
        store.set("U1", Some(100), Some(0.0)).unwrap();
        assert_eq!(store.consume_if_match("U1", 100), None);
    }
}
