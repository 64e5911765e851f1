//! Monotonic time source
//!
//! All lifecycle timestamps come from one [`Clock`]. The production
//! implementation is a zero-sized wrapper over [`std::time::Instant`], which
//! is monotonic and immune to wall-clock adjustments on every tier-1
//! platform. The trait seam exists so tests can substitute a manual clock.
//!
//! [`MonotonicClock::probe`] runs once at startup and fails fast with
//! [`MedirError::ClockUnavailable`] rather than letting a broken or frozen
//! time source silently corrupt every measurement afterwards.

use std::time::Instant;

use crate::error::{MedirError, Result};

/// A monotonic, high-resolution time source
pub trait Clock: Send + Sync {
    /// Current reading; successive calls never go backwards
    fn now(&self) -> Instant;
}

/// Production clock backed by `std::time::Instant`
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Create a clock without probing; use [`Self::probe`] at startup
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Verify the monotonic source is usable
    ///
    /// Takes a burst of readings and requires that they never decrease and
    /// that the source advances at all within the burst. A source that is
    /// frozen (every reading identical across thousands of calls) would turn
    /// every latency into zero, so it is rejected up front.
    ///
    /// # Errors
    ///
    /// Returns `MedirError::ClockUnavailable` if readings decrease or the
    /// source never advances.
    pub fn probe() -> Result<Self> {
        const PROBE_READS: usize = 4096;

        let start = Instant::now();
        let mut prev = start;
        let mut advanced = false;
        for _ in 0..PROBE_READS {
            let now = Instant::now();
            if now < prev {
                return Err(MedirError::ClockUnavailable {
                    detail: "readings decreased across successive calls".to_string(),
                });
            }
            if now > prev {
                advanced = true;
            }
            prev = now;
        }
        if !advanced {
            return Err(MedirError::ClockUnavailable {
                detail: "source did not advance across probe burst".to_string(),
            });
        }
        Ok(Self)
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}
