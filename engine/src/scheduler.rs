//! Deterministic phase clock for a match.
//!
//! All timing derives from the tick counter, never from wall clocks, so two
//! replays of the same match agree on every transition. Elapsed time for the
//! active/shrink boundaries is measured from active entry, matching the
//! six-minute hard cap.

use petri_types::constants::{ACTIVE_SECS, COUNTDOWN_SECS, FOG_SHRINK_FRACTION, SHRINK_SECS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Countdown,
    Active,
    Shrink,
    Settlement,
}

/// Pure tick→phase arithmetic, parameterized on the tick rate so tests can
/// run compressed clocks (`TICK_RATE` override).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseClock {
    tick_rate: u32,
}

impl PhaseClock {
    pub fn new(tick_rate: u32) -> Self {
        debug_assert!(tick_rate > 0);
        Self { tick_rate }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Seconds per tick.
    pub fn dt(&self) -> f64 {
        1.0 / f64::from(self.tick_rate)
    }

    /// Match-relative milliseconds at a tick (integer, monotone).
    pub fn now_ms(&self, tick: u64) -> u64 {
        tick.saturating_mul(1_000) / u64::from(self.tick_rate)
    }

    pub fn countdown_end(&self) -> u64 {
        COUNTDOWN_SECS * u64::from(self.tick_rate)
    }

    pub fn active_end(&self) -> u64 {
        self.countdown_end() + ACTIVE_SECS * u64::from(self.tick_rate)
    }

    pub fn shrink_end(&self) -> u64 {
        self.active_end() + SHRINK_SECS * u64::from(self.tick_rate)
    }

    pub fn phase_at(&self, tick: u64) -> Phase {
        if tick < self.countdown_end() {
            Phase::Countdown
        } else if tick < self.active_end() {
            Phase::Active
        } else if tick < self.shrink_end() {
            Phase::Shrink
        } else {
            Phase::Settlement
        }
    }

    /// Shrink completion in `[0, 1]`.
    pub fn shrink_progress(&self, tick: u64) -> f64 {
        if tick <= self.active_end() {
            return 0.0;
        }
        let shrink_ticks = (self.shrink_end() - self.active_end()) as f64;
        let elapsed = (tick - self.active_end()) as f64;
        (elapsed / shrink_ticks).min(1.0)
    }

    /// Fog radius at a tick: full map until shrink, then closing linearly to
    /// `1 - FOG_SHRINK_FRACTION` of the map.
    pub fn fog_radius(&self, map_radius: f64, tick: u64) -> f64 {
        map_radius * (1.0 - FOG_SHRINK_FRACTION * self.shrink_progress(tick))
    }
}
