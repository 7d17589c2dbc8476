//! Fixed-interval frame limiter
//!
//! No display dependency. Used for plain fps caps and as the fallback when
//! scanline pacing has no display to lock to.

use tracing::warn;

use super::latent::IMPLAUSIBLE_WAIT_LOG_EVERY;
use crate::clock::{Clock, ClockSample, WaitTimer};

/// Ceiling used until [`SimpleFrameLimiter::with_max_wait_ms`] overrides it
const DEFAULT_MAX_WAIT_MS: u64 = 1_000;

/// Waits until `last + 1 / target_fps`
#[derive(Debug)]
pub struct SimpleFrameLimiter {
    clock: &'static Clock,
    timer: WaitTimer,
    last_time_point: Option<ClockSample>,
    max_wait_ns: u64,
    implausible_waits: u64,
}

impl SimpleFrameLimiter {
    /// Create a limiter; the first call never waits.
    pub fn new(clock: &'static Clock) -> Self {
        Self {
            clock,
            timer: WaitTimer::new(),
            last_time_point: None,
            max_wait_ns: DEFAULT_MAX_WAIT_MS * 1_000_000,
            implausible_waits: 0,
        }
    }

    /// Longest frame interval that will be waited out
    pub fn with_max_wait_ms(mut self, max_wait_ms: u64) -> Self {
        self.max_wait_ns = max_wait_ms.saturating_mul(1_000_000);
        self
    }

    /// Block until one frame interval has passed since the previous call.
    ///
    /// Returns whether a wait deadline was applied. A non-positive or
    /// non-finite `target_fps` only stamps the current time, as does one
    /// whose interval exceeds the wait ceiling.
    pub fn limit(&mut self, target_fps: f64) -> bool {
        let waited = match self.last_time_point {
            Some(last) if target_fps.is_finite() && target_fps > 0.0 => {
                let interval_ns = 1e9 / target_fps;
                if interval_ns > self.max_wait_ns as f64 {
                    self.implausible_waits += 1;
                    let n = self.implausible_waits;
                    if n == 1 || n % IMPLAUSIBLE_WAIT_LOG_EVERY == 0 {
                        warn!(
                            "Skipping fps cap: {:.0}ns interval at {} fps exceeds limit of {}ns (occurrence {})",
                            interval_ns, target_fps, self.max_wait_ns, n
                        );
                    }
                    false
                } else {
                    let target = last + self.clock.duration_from_nanos(interval_ns as u64);
                    self.clock.wait_until(target, &mut self.timer);
                    true
                }
            }
            _ => false,
        };
        self.last_time_point = Some(self.clock.now());
        waited
    }

    /// Forget the previous frame so the next call does not wait
    pub fn reset(&mut self) {
        self.last_time_point = None;
    }

    /// Time of the previous call
    pub fn last_time_point(&self) -> Option<ClockSample> {
        self.last_time_point
    }

    /// Calls skipped because the interval exceeded the wait ceiling
    pub fn implausible_waits(&self) -> u64 {
        self.implausible_waits
    }
}
