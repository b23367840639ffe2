//! Server-side core for a crash-style wagering round: multiplier draws,
//! next-round overrides, round phase cycling, race-scoped session
//! aggregation, and race lifecycle/prize settlement. HTTP routing,
//! authentication, and the user balance store itself live outside this
//! crate — see `race_manager::UserCreditSink` and `persistence::PersistenceAdapter`
//! for the seams a consuming service implements against.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod ids;
pub mod multiplier;
pub mod orchestrator;
pub mod override_store;
pub mod persistence;
pub mod race_manager;

pub use error::{CrashCoreError, CrashResult};

/// Initializes a `tracing` subscriber once per test binary, so background
/// loop tests show their `debug!`/`warn!`/`error!` output on failure instead
/// of swallowing it silently.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
