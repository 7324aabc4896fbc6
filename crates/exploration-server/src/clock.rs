//! Tick source handed to the protocol core.

use std::time::{Duration, Instant};

/// Microsecond ticks are used by this integration.
pub const US_TICKS_PER_SECOND: u32 = 1_000_000;

/// A monotonic tick counter in the core's native unit.
pub trait TickSource {
    /// Current tick. Wraps around at `u32::MAX`.
    fn ticks(&self) -> u32;

    fn ticks_per_second(&self) -> u32;

    /// Convert a tick count into wall-clock time.
    fn ticks_to_duration(&self, ticks: u32) -> Duration {
        let per_second = u64::from(self.ticks_per_second().max(1));
        let nanos = u64::from(ticks) * 1_000_000_000 / per_second;
        Duration::from_nanos(nanos)
    }
}

/// Microsecond ticks since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicClock {
    fn ticks(&self) -> u32 {
        // Truncation is the wrap-around.
        self.origin.elapsed().as_micros() as u32
    }

    fn ticks_per_second(&self) -> u32 {
        US_TICKS_PER_SECOND
    }
}
