//! # Monotonic Clock and Phase Timers
//!
//! Timestamps on the measurement path are raw ticks read from a process-wide
//! monotonic anchor. Reading the clock never allocates or locks; the tick to
//! millisecond conversion factor is computed once and cached.
//!
//! On Linux `Instant::now()` resolves through the vDSO, so after the anchor is
//! initialized a read does not enter the kernel.

use std::sync::OnceLock;
use std::time::Instant;

/// Raw monotonic reading, in clock ticks since the process anchor
pub type Ticks = u64;

struct Calibration {
    anchor: Instant,
    ms_per_tick: f64,
}

static CALIBRATION: OnceLock<Calibration> = OnceLock::new();

fn calibration() -> &'static Calibration {
    CALIBRATION.get_or_init(|| Calibration {
        anchor: Instant::now(),
        // Ticks are nanoseconds on every supported platform.
        ms_per_tick: 1.0 / 1_000_000.0,
    })
}

/// Process-wide monotonic clock
pub struct Clock;

impl Clock {
    /// Force one-time calibration so the first measured read is not skewed
    pub fn calibrate() {
        let _ = calibration();
    }

    /// Current tick count. Safe to call from any thread.
    #[inline]
    pub fn now() -> Ticks {
        calibration().anchor.elapsed().as_nanos() as Ticks
    }

    /// Milliseconds between `since` and now. Never negative.
    #[inline]
    pub fn elapsed_ms(since: Ticks) -> f64 {
        Self::ticks_to_ms(Self::now().saturating_sub(since))
    }

    /// Convert a tick delta to milliseconds using the cached factor
    #[inline]
    pub fn ticks_to_ms(ticks: Ticks) -> f64 {
        ticks as f64 * calibration().ms_per_tick
    }
}

/// Snapshot of the clock taken at phase entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimer {
    started: Ticks,
}

impl PhaseTimer {
    pub fn start() -> Self {
        Self {
            started: Clock::now(),
        }
    }

    /// Timer anchored at an existing reading
    pub fn from_ticks(started: Ticks) -> Self {
        Self { started }
    }

    pub fn started_at(&self) -> Ticks {
        self.started
    }

    pub fn elapsed_ms(&self) -> f64 {
        Clock::elapsed_ms(self.started)
    }
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::start()
    }
}
