//! In-process publish/subscribe for phase and race transitions.
//!
//! Subscribers never mutate shared state from inside a handler — they
//! receive a clone of the event and enqueue their own work (§9: "Event
//! emitter → channels").

use tokio::sync::broadcast;

use crate::orchestrator::CountdownConfig;

/// Events emitted by the Round Orchestrator (4.C).
#[derive(Debug, Clone)]
pub enum RoundEvent {
    BettingCountdownStarted { round: u64, game_id: String, countdown_end: chrono::DateTime<chrono::Utc> },
    BettingPhaseEnded { round: u64, game_id: String },
    GameCountdownStarted { round: u64, game_id: String, crash_multiplier: f64, countdown_end: chrono::DateTime<chrono::Utc> },
    GamePhaseEnded { round: u64, game_id: String, crash_multiplier: f64 },
    CountdownStopped,
    ConfigUpdated { config: CountdownConfig },
}

/// Events emitted by the Race Lifecycle Manager (4.E).
#[derive(Debug, Clone)]
pub enum RaceEvent {
    RaceStarted { race_id: String },
    RaceFinalized { race_id: String, total_participants: usize, final_prize_pool: i64 },
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcaster for `RoundEvent`s. Cloning is cheap (it's a `Sender` clone);
/// every clone shares the same ring buffer.
#[derive(Clone)]
pub struct RoundEventBus {
    tx: broadcast::Sender<RoundEvent>,
}

impl RoundEventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget: no subscribers is not an error.
    pub fn publish(&self, event: RoundEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for RoundEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct RaceEventBus {
    tx: broadcast::Sender<RaceEvent>,
}

impl RaceEventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaceEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RaceEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for RaceEventBus {
    fn default() -> Self {
        Self::new()
    }
}
