//! Broadcast pacing: decouples the host's ~50Hz tick rate from the rate at
//! which snapshots actually go out to network clients. The orchestrator
//! calls `tick()` once per host update and it returns `true` only when
//! enough wall-clock time has passed since the last broadcast, at which
//! point the configured `broadcast_rate_hz` (derived from the pacing
//! interval, never hardcoded) is what callers report in the payload.

use std::time::{Duration, Instant};

pub struct Pacer {
    interval: Duration,
    last_fire: Option<Instant>,
}

impl Pacer {
    pub fn new(pacing_ms: u64) -> Self {
        Self { interval: Duration::from_millis(pacing_ms.max(1)), last_fire: None }
    }

    /// Returns `true` if a broadcast should fire now, given the current
    /// instant. Stateless with respect to any async runtime so it can be
    /// driven from the synchronous `on_update` tick.
    pub fn should_fire(&mut self, now: Instant) -> bool {
        match self.last_fire {
            None => {
                self.last_fire = Some(now);
                true
            }
            Some(last) if now.duration_since(last) >= self.interval => {
                self.last_fire = Some(now);
                true
            }
            Some(_) => false,
        }
    }

    pub fn rate_hz(&self) -> f64 {
        1000.0 / self.interval.as_millis().max(1) as f64
    }
}
