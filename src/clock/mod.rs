//! High-Resolution Clock and Hybrid Wait
//!
//! Monotonic time source plus a two-phase wait primitive used by every
//! pacing component in this crate.
//!
//! # Wait Strategy
//!
//! Kernel timers alone wake with jitter on the order of the timer
//! granularity (1-15ms depending on platform and negotiation). Pure
//! busy-waiting is precise but burns a core for the whole interval.
//! [`Clock::wait_until`] combines both:
//!
//! ```text
//!  now                          target - 3*granularity    target
//!   │◄──── kernel timer park ──────────►│◄── yield loop ──►│
//! ```
//!
//! If the kernel timer cannot be created the wait silently degrades to the
//! yield loop for its whole duration.
//!
//! # Platforms
//!
//! | Platform | Counter | Kernel timer | Resolution negotiation |
//! |----------|---------|--------------|------------------------|
//! | Windows | `QueryPerformanceCounter` | high-resolution waitable timer | `timeBeginPeriod(1)` |
//! | Linux | `CLOCK_MONOTONIC` | absolute `timerfd` | `PR_SET_TIMERSLACK` |
//! | Other | `std::time::Instant` | `thread::sleep` | none |

use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use tracing::{debug, info, trace};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use linux as platform;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
use win32 as platform;

#[cfg(not(any(target_os = "linux", windows)))]
mod fallback;
#[cfg(not(any(target_os = "linux", windows)))]
use fallback as platform;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Number of granularity units left for the busy-wait phase
const SPIN_MARGIN_UNITS: u64 = 3;

/// A monotonic instant in platform ticks.
///
/// Convert to nanoseconds with [`ClockSample::to_nanos`] and the owning
/// clock's [`Clock::ticks_per_second`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClockSample(pub u64);

impl ClockSample {
    /// Raw tick value
    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Converts this instant to nanoseconds since the counter epoch.
    #[inline]
    pub const fn to_nanos(self, ticks_per_second: u64) -> u64 {
        ticks_to_nanos(self.0, ticks_per_second)
    }

    /// Builds an instant from nanoseconds since the counter epoch.
    #[inline]
    pub const fn from_nanos(nanos: u64, ticks_per_second: u64) -> Self {
        Self(nanos_to_ticks(nanos, ticks_per_second))
    }

    /// Duration since an earlier sample, or zero if `earlier` is later.
    #[inline]
    pub const fn saturating_duration_since(self, earlier: Self) -> TickDuration {
        TickDuration(self.0.saturating_sub(earlier.0))
    }

    /// Checked addition of a duration
    #[inline]
    pub const fn checked_add(self, duration: TickDuration) -> Option<Self> {
        match self.0.checked_add(duration.0) {
            Some(t) => Some(Self(t)),
            None => None,
        }
    }

    /// Saturating subtraction of a duration
    #[inline]
    pub const fn saturating_sub(self, duration: TickDuration) -> Self {
        Self(self.0.saturating_sub(duration.0))
    }
}

impl Add<TickDuration> for ClockSample {
    type Output = Self;

    #[inline]
    fn add(self, rhs: TickDuration) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for ClockSample {
    type Output = TickDuration;

    #[inline]
    fn sub(self, rhs: Self) -> TickDuration {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Debug for ClockSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClockSample({})", self.0)
    }
}

/// A span of platform ticks
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TickDuration(pub u64);

impl TickDuration {
    /// Zero-length duration
    pub const ZERO: Self = Self(0);

    /// Raw tick value
    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Converts to nanoseconds
    #[inline]
    pub const fn to_nanos(self, ticks_per_second: u64) -> u64 {
        ticks_to_nanos(self.0, ticks_per_second)
    }

    /// Builds a duration from nanoseconds
    #[inline]
    pub const fn from_nanos(nanos: u64, ticks_per_second: u64) -> Self {
        Self(nanos_to_ticks(nanos, ticks_per_second))
    }
}

impl fmt::Debug for TickDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TickDuration({})", self.0)
    }
}

/// `ticks * 1e9 / tps` with a u128 intermediate.
#[inline]
pub const fn ticks_to_nanos(ticks: u64, ticks_per_second: u64) -> u64 {
    if ticks_per_second == NANOS_PER_SEC {
        return ticks;
    }
    let wide = ticks as u128 * NANOS_PER_SEC as u128 / ticks_per_second as u128;
    wide as u64
}

/// `nanos * tps / 1e9` with a u128 intermediate.
#[inline]
pub const fn nanos_to_ticks(nanos: u64, ticks_per_second: u64) -> u64 {
    if ticks_per_second == NANOS_PER_SEC {
        return nanos;
    }
    let wide = nanos as u128 * ticks_per_second as u128 / NANOS_PER_SEC as u128;
    wide as u64
}

/// Process-wide monotonic clock.
///
/// Cheap to query from any thread. Timer resolution negotiation is
/// process-global, so most callers use [`Clock::global`].
#[derive(Debug)]
pub struct Clock {
    ticks_per_second: u64,
    /// Current wake granularity of the kernel timer, in nanoseconds
    granularity_ns: AtomicU64,
    /// Result of the one-time resolution negotiation
    negotiated: OnceLock<bool>,
}

impl Clock {
    /// Create a clock reading the platform counter.
    ///
    /// The counter frequency is queried once and cached.
    pub fn new() -> Self {
        Self {
            ticks_per_second: platform::ticks_per_second(),
            granularity_ns: AtomicU64::new(platform::DEFAULT_GRANULARITY_NS),
            negotiated: OnceLock::new(),
        }
    }

    /// Shared process-wide instance
    pub fn global() -> &'static Clock {
        static GLOBAL: OnceLock<Clock> = OnceLock::new();
        GLOBAL.get_or_init(Clock::new)
    }

    /// Read the monotonic counter. Never fails.
    #[inline]
    pub fn now(&self) -> ClockSample {
        ClockSample(platform::now_ticks())
    }

    /// Counter frequency
    #[inline]
    pub fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }

    /// Current kernel-timer wake granularity in nanoseconds
    pub fn granularity_ns(&self) -> u64 {
        self.granularity_ns.load(Ordering::Relaxed)
    }

    /// Whether high resolution mode was successfully negotiated
    pub fn is_high_resolution(&self) -> bool {
        self.negotiated.get().copied().unwrap_or(false)
    }

    /// Negotiate the finest available system timer granularity.
    ///
    /// Idempotent: only the first call talks to the OS, later calls return
    /// the cached outcome. Failure is not fatal; waits keep working with
    /// the coarser default granularity.
    pub fn setup_high_resolution_mode(&self) -> bool {
        *self.negotiated.get_or_init(|| match platform::negotiate_resolution() {
            Some(granularity_ns) => {
                self.granularity_ns.store(granularity_ns, Ordering::Relaxed);
                info!(
                    "High resolution timer mode enabled (granularity {:.3}ms)",
                    granularity_ns as f64 / 1_000_000.0
                );
                true
            }
            None => {
                debug!(
                    "High resolution timer mode unavailable, keeping {:.3}ms granularity",
                    platform::DEFAULT_GRANULARITY_NS as f64 / 1_000_000.0
                );
                false
            }
        })
    }

    /// Convert a sample to nanoseconds
    #[inline]
    pub fn to_nanos(&self, sample: ClockSample) -> u64 {
        sample.to_nanos(self.ticks_per_second)
    }

    /// Convert a nanosecond span to ticks of this clock
    #[inline]
    pub fn duration_from_nanos(&self, nanos: u64) -> TickDuration {
        TickDuration::from_nanos(nanos, self.ticks_per_second)
    }

    /// Block the calling thread until `now() >= target`.
    ///
    /// Returns immediately if `target` is already in the past. Long waits
    /// park on `timer` until roughly three granularity units before the
    /// deadline and finish in a yield loop. No cancellation: once started,
    /// the wait runs to completion.
    pub fn wait_until(&self, target: ClockSample, timer: &mut WaitTimer) {
        let now = self.now();
        if now >= target {
            return;
        }

        let remaining_ns = (target - now).to_nanos(self.ticks_per_second);
        let margin_ns = self.granularity_ns().saturating_mul(SPIN_MARGIN_UNITS);

        if remaining_ns > margin_ns {
            let wake = target.saturating_sub(self.duration_from_nanos(margin_ns));
            if !timer.sleep_until(wake) {
                trace!("Kernel timer unavailable, busy-waiting {}ns", remaining_ns);
            }
        }

        while self.now() < target {
            std::thread::yield_now();
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazily created kernel wake timer.
///
/// One per waiting thread. Creation is attempted on the first long wait;
/// if it fails the handle remembers that and later waits go straight to
/// the busy phase.
#[derive(Default)]
pub struct WaitTimer {
    state: TimerState,
}

#[derive(Default)]
enum TimerState {
    #[default]
    Uncreated,
    Ready(platform::KernelTimer),
    Unavailable,
}

impl WaitTimer {
    /// Create an empty handle; the OS timer is opened on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the OS timer has been opened
    pub fn is_ready(&self) -> bool {
        matches!(self.state, TimerState::Ready(_))
    }

    /// Whether creation was attempted and failed
    pub fn is_unavailable(&self) -> bool {
        matches!(self.state, TimerState::Unavailable)
    }

    /// Park until `deadline`. Returns `false` if no kernel timer could be used.
    fn sleep_until(&mut self, deadline: ClockSample) -> bool {
        if matches!(self.state, TimerState::Uncreated) {
            self.state = match platform::KernelTimer::create() {
                Ok(timer) => TimerState::Ready(timer),
                Err(e) => {
                    debug!("Kernel wait timer creation failed: {}", e);
                    TimerState::Unavailable
                }
            };
        }

        match &mut self.state {
            TimerState::Ready(timer) => timer.sleep_until(deadline.ticks()),
            _ => false,
        }
    }
}

impl fmt::Debug for WaitTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            TimerState::Uncreated => "uncreated",
            TimerState::Ready(_) => "ready",
            TimerState::Unavailable => "unavailable",
        };
        f.debug_struct("WaitTimer").field("state", &state).finish()
    }
}
