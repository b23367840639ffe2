//! Round Orchestrator (4.C) — a perpetual two-phase clock that paces
//! betting/gaming rounds and draws (or accepts a fixed) crash multiplier.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config;
use crate::error::CrashCoreError;
use crate::events::{RoundEvent, RoundEventBus};
use crate::ids::new_game_id;
use crate::multiplier::MultiplierGenerator;

const MIN_COUNTDOWN_MS: i64 = 5_000;
const MAX_COUNTDOWN_MS: i64 = 1_800_000;
const MAX_FIXED_MULTIPLIER: f64 = 1000.0;
const REJECTED_FIXED_BAND: (f64, f64) = (0.0, 1.01);
const SAVE_DEBOUNCE: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Betting,
    Gaming,
}

/// Runtime-mutable config, persisted to disk asynchronously ~5s after the
/// last change (§4.C, §9).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountdownConfig {
    pub betting_countdown_ms: i64,
    pub game_countdown_ms: i64,
    /// `> 0` fixes the crash multiplier for every round; `<= 0` draws from
    /// the multiplier generator each round.
    pub fixed_crash_multiplier: f64,
    pub auto_start: bool,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            betting_countdown_ms: 10_000,
            game_countdown_ms: 20_000,
            fixed_crash_multiplier: 0.0,
            auto_start: true,
        }
    }
}

impl CountdownConfig {
    pub fn validate(&self) -> Result<(), CrashCoreError> {
        if !(MIN_COUNTDOWN_MS..=MAX_COUNTDOWN_MS).contains(&self.betting_countdown_ms) {
            return Err(CrashCoreError::validation(
                "bettingCountdown",
                format!("must be in [{MIN_COUNTDOWN_MS}, {MAX_COUNTDOWN_MS}]"),
            ));
        }
        if !(MIN_COUNTDOWN_MS..=MAX_COUNTDOWN_MS).contains(&self.game_countdown_ms) {
            return Err(CrashCoreError::validation(
                "gameCountdown",
                format!("must be in [{MIN_COUNTDOWN_MS}, {MAX_COUNTDOWN_MS}]"),
            ));
        }
        if !(0.0..=MAX_FIXED_MULTIPLIER).contains(&self.fixed_crash_multiplier) {
            return Err(CrashCoreError::validation(
                "fixedCrashMultiplier",
                format!("must be in [0, {MAX_FIXED_MULTIPLIER}]"),
            ));
        }
        if self.fixed_crash_multiplier > REJECTED_FIXED_BAND.0
            && self.fixed_crash_multiplier < REJECTED_FIXED_BAND.1
        {
            return Err(CrashCoreError::validation(
                "fixedCrashMultiplier",
                "the band (0, 1.01) is reserved and rejected",
            ));
        }
        Ok(())
    }
}

/// Partial update for `PUT /game/countdown/config` (§6) — `None` fields
/// preserve current values.
#[derive(Debug, Clone, Default)]
pub struct CountdownConfigPatch {
    pub betting_countdown_ms: Option<i64>,
    pub game_countdown_ms: Option<i64>,
    pub fixed_crash_multiplier: Option<f64>,
    pub auto_start: Option<bool>,
}

/// Observable snapshot of the orchestrator's state (§4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservableState {
    pub phase: Phase,
    pub is_counting_down: bool,
    pub countdown_start_time: Option<DateTime<Utc>>,
    pub countdown_end_time: Option<DateTime<Utc>>,
    pub game_id: Option<String>,
    pub round: u64,
    pub current_game_crash_multiplier: Option<f64>,
}

impl Default for ObservableState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            is_counting_down: false,
            countdown_start_time: None,
            countdown_end_time: None,
            game_id: None,
            round: 0,
            current_game_crash_multiplier: None,
        }
    }
}

impl ObservableState {
    /// `max(0, countdownEndTime - now)` — remaining time is computed on
    /// demand, no periodic tick required for correctness (§4.C).
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        match self.countdown_end_time {
            Some(end) => (end - now).num_milliseconds().max(0),
            None => 0,
        }
    }
}

enum WaitOutcome {
    Elapsed,
    Cancelled,
}

/// The two-phase cyclic clock. Constructed once per process and shared via
/// `Arc` (§9: "owned collaborators, not process-global globals").
pub struct RoundOrchestrator {
    config: RwLock<CountdownConfig>,
    state: RwLock<ObservableState>,
    multiplier_gen: MultiplierGenerator,
    events: RoundEventBus,
    running: AtomicBool,
    cancel: Notify,
    save_generation: AtomicU64,
    config_path: Option<PathBuf>,
}

impl RoundOrchestrator {
    pub fn new(
        config: CountdownConfig,
        multiplier_gen: MultiplierGenerator,
        config_path: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            state: RwLock::new(ObservableState::default()),
            multiplier_gen,
            events: RoundEventBus::new(),
            running: AtomicBool::new(false),
            cancel: Notify::new(),
            save_generation: AtomicU64::new(0),
            config_path,
        })
    }

    pub fn events(&self) -> RoundEventBus {
        self.events.clone()
    }

    pub fn snapshot(&self) -> ObservableState {
        self.state.read().clone()
    }

    pub fn current_config(&self) -> CountdownConfig {
        *self.config.read()
    }

    pub fn remaining_ms(&self) -> i64 {
        self.state.read().remaining_ms(Utc::now())
    }

    /// Apply a config patch. Affects only the **next** phase to start; an
    /// in-flight phase keeps its original deadline (§5).
    pub fn update_config(self: &Arc<Self>, patch: CountdownConfigPatch) -> Result<CountdownConfig, CrashCoreError> {
        let mut config = self.config.write();
        let mut next = *config;
        if let Some(v) = patch.betting_countdown_ms {
            next.betting_countdown_ms = v;
        }
        if let Some(v) = patch.game_countdown_ms {
            next.game_countdown_ms = v;
        }
        if let Some(v) = patch.fixed_crash_multiplier {
            next.fixed_crash_multiplier = v;
        }
        if let Some(v) = patch.auto_start {
            next.auto_start = v;
        }
        next.validate()?;
        *config = next;
        drop(config);

        self.schedule_debounced_save();
        self.events.publish(RoundEvent::ConfigUpdated { config: next });
        Ok(next)
    }

    /// Debounced disk save: bumps a generation counter and spawns a task
    /// that sleeps 5s, then writes only if no later call bumped the
    /// generation again meanwhile (§4.C, §9).
    fn schedule_debounced_save(self: &Arc<Self>) {
        let Some(_path) = self.config_path.as_ref() else { return };
        let generation = self.save_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(SAVE_DEBOUNCE).await;
            if this.save_generation.load(Ordering::SeqCst) != generation {
                return; // superseded by a later change
            }
            this.flush_config();
        });
    }

    /// Synchronous final write, called on shutdown so no change is lost
    /// (§9).
    pub fn flush_config(&self) {
        if let Some(path) = &self.config_path {
            let config = *self.config.read();
            if let Err(err) = config::save_countdown_config(path, &config) {
                warn!(error = %err, "failed to flush countdown config on shutdown");
            }
        }
    }

    /// Starts the perpetual loop as a background task. A second call while
    /// already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_loop().await });
    }

    /// Cancels any pending phase timer and transitions to `idle`. Does not
    /// roll back the current `gameId` (§5).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.notify_waiters();
        let mut state = self.state.write();
        state.phase = Phase::Idle;
        state.is_counting_down = false;
        state.countdown_start_time = None;
        state.countdown_end_time = None;
        drop(state);
        self.events.publish(RoundEvent::CountdownStopped);
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            self.enter_betting_phase();
            let betting_ms = self.config.read().betting_countdown_ms;
            if matches!(self.wait_or_cancel(betting_ms).await, WaitOutcome::Cancelled) {
                break;
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.end_betting_phase();

            self.enter_gaming_phase();
            let game_ms = self.config.read().game_countdown_ms;
            if matches!(self.wait_or_cancel(game_ms).await, WaitOutcome::Cancelled) {
                break;
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.end_gaming_phase();

            if !self.config.read().auto_start {
                self.running.store(false, Ordering::SeqCst);
                let mut state = self.state.write();
                state.phase = Phase::Idle;
                state.is_counting_down = false;
                state.countdown_start_time = None;
                state.countdown_end_time = None;
                break;
            }
        }
    }

    async fn wait_or_cancel(&self, duration_ms: i64) -> WaitOutcome {
        let sleep = tokio::time::sleep(StdDuration::from_millis(duration_ms.max(0) as u64));
        tokio::select! {
            _ = sleep => WaitOutcome::Elapsed,
            _ = self.cancel.notified() => WaitOutcome::Cancelled,
        }
    }

    fn enter_betting_phase(&self) {
        let now = Utc::now();
        let betting_ms = self.config.read().betting_countdown_ms;
        let end = now + chrono::Duration::milliseconds(betting_ms);
        let game_id = new_game_id();

        let mut state = self.state.write();
        state.round += 1;
        state.phase = Phase::Betting;
        state.is_counting_down = true;
        state.countdown_start_time = Some(now);
        state.countdown_end_time = Some(end);
        state.game_id = Some(game_id.clone());
        state.current_game_crash_multiplier = None;
        let round = state.round;
        drop(state);

        info!(round, game_id = %game_id, "betting phase started");
        self.events.publish(RoundEvent::BettingCountdownStarted { round, game_id, countdown_end: end });
    }

    fn end_betting_phase(&self) {
        let state = self.state.read();
        let (round, game_id) = (state.round, state.game_id.clone().unwrap_or_default());
        drop(state);
        debug!(round, game_id = %game_id, "betting phase ended");
        self.events.publish(RoundEvent::BettingPhaseEnded { round, game_id });
    }

    fn enter_gaming_phase(&self) {
        let fixed = self.config.read().fixed_crash_multiplier;
        let crash_multiplier = if fixed > 0.0 { fixed } else { self.multiplier_gen.draw() };

        let now = Utc::now();
        let game_ms = self.config.read().game_countdown_ms;
        let end = now + chrono::Duration::milliseconds(game_ms);

        let mut state = self.state.write();
        state.phase = Phase::Gaming;
        state.is_counting_down = true;
        state.countdown_start_time = Some(now);
        state.countdown_end_time = Some(end);
        state.current_game_crash_multiplier = Some(crash_multiplier);
        let (round, game_id) = (state.round, state.game_id.clone().unwrap_or_default());
        drop(state);

        info!(round, game_id = %game_id, crash_multiplier, "gaming phase started");
        self.events.publish(RoundEvent::GameCountdownStarted {
            round,
            game_id,
            crash_multiplier,
            countdown_end: end,
        });
    }

    fn end_gaming_phase(&self) {
        let state = self.state.read();
        let (round, game_id, crash_multiplier) =
            (state.round, state.game_id.clone().unwrap_or_default(), state.current_game_crash_multiplier.unwrap_or(1.0));
        drop(state);
        debug!(round, game_id = %game_id, crash_multiplier, "gaming phase ended");
        self.events.publish(RoundEvent::GamePhaseEnded { round, game_id, crash_multiplier });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplier::MultiplierGenerator;

    fn orchestrator(betting_ms: i64, game_ms: i64) -> Arc<RoundOrchestrator> {
        let config = CountdownConfig {
            betting_countdown_ms: betting_ms,
            game_countdown_ms: game_ms,
            fixed_crash_multiplier: 0.0,
            auto_start: true,
        };
        RoundOrchestrator::new(config, MultiplierGenerator::fallback(), None)
    }

    #[test]
    fn validates_countdown_ranges() {
        let mut cfg = CountdownConfig::default();
        cfg.betting_countdown_ms = 1_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_fixed_multiplier_dead_band() {
        let mut cfg = CountdownConfig::default();
        cfg.fixed_crash_multiplier = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_valid_fixed_multiplier() {
        let mut cfg = CountdownConfig::default();
        cfg.fixed_crash_multiplier = 2.0;
        assert!(cfg.validate().is_ok());
    }

    // S4: round cycling through betting -> gaming -> betting.
    #[tokio::test(start_paused = true)]
    async fn s4_round_cycling() {
        crate::init_test_tracing();
        let orch = orchestrator(10_000, 20_000);
        orch.start();
        tokio::task::yield_now().await;

        assert_eq!(orch.snapshot().phase, Phase::Betting);
        assert_eq!(orch.snapshot().round, 1);

        tokio::time::advance(StdDuration::from_millis(10_000)).await;
        tokio::task::yield_now().await;
        assert_eq!(orch.snapshot().phase, Phase::Gaming);
        let first_game_id = orch.snapshot().game_id.clone();

        tokio::time::advance(StdDuration::from_millis(20_000)).await;
        tokio::task::yield_now().await;
        assert_eq!(orch.snapshot().phase, Phase::Betting);
        assert_eq!(orch.snapshot().round, 2);
        assert_ne!(orch.snapshot().game_id, first_game_id);

        orch.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_and_goes_idle() {
        let orch = orchestrator(10_000, 20_000);
        orch.start();
        tokio::task::yield_now().await;
        orch.stop();
        assert_eq!(orch.snapshot().phase, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_start_false_stops_after_one_cycle() {
        let config = CountdownConfig {
            betting_countdown_ms: 5_000,
            game_countdown_ms: 5_000,
            fixed_crash_multiplier: 0.0,
            auto_start: false,
        };
        let orch = RoundOrchestrator::new(config, MultiplierGenerator::fallback(), None);
        orch.start();
        tokio::task::yield_now().await;
        tokio::time::advance(StdDuration::from_millis(5_000)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(StdDuration::from_millis(5_000)).await;
        tokio::task::yield_now().await;
        assert_eq!(orch.snapshot().phase, Phase::Idle);
    }

    #[test]
    fn config_update_rejects_invalid_patch() {
        let orch = orchestrator(10_000, 20_000);
        let result = orch.update_config(CountdownConfigPatch {
            fixed_crash_multiplier: Some(1500.0),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
