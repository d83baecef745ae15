//! Logical game clock.
//!
//! Every effect timer is expressed against one logical clock measured in
//! milliseconds. The clock only moves forward; the engine advances it to the
//! fire time of each timer before running that timer's callback, so hooks
//! always observe the time at which they were due rather than the time at
//! which the driver happened to wake up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Milliseconds per second.
const MILLIS_PER_SECOND: u64 = 1000;

/// A point on the logical game clock, in milliseconds since clock start.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GameTime(u64);

impl GameTime {
    /// Clock start.
    pub const ZERO: Self = Self(0);

    /// Create a time from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Create a time from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * MILLIS_PER_SECOND)
    }

    /// Get the time in milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time `millis` later than this one.
    #[must_use]
    pub const fn after(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Milliseconds elapsed from `earlier` to `self` (zero if `earlier` is later).
    #[must_use]
    pub const fn since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for GameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 / MILLIS_PER_SECOND;
        let millis = self.0 % MILLIS_PER_SECOND;
        write!(f, "{secs}.{millis:03}s")
    }
}

/// Shared monotonic clock.
#[derive(Debug, Default)]
pub struct GameClock {
    now: AtomicU64,
}

impl GameClock {
    /// Create a clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time.
    #[must_use]
    pub fn now(&self) -> GameTime {
        GameTime(self.now.load(Ordering::Acquire))
    }

    /// Move the clock forward to `time`. Never moves backwards.
    pub fn advance_to(&self, time: GameTime) -> GameTime {
        let previous = self.now.fetch_max(time.as_millis(), Ordering::AcqRel);
        GameTime(previous.max(time.as_millis()))
    }

    /// Move the clock forward by `millis`.
    pub fn advance_by(&self, millis: u64) -> GameTime {
        self.advance_to(self.now().after(millis))
    }
}
