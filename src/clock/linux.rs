//! Linux clock backend: `CLOCK_MONOTONIC`, absolute `timerfd`, timer slack.

use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId as TimerClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use nix::time::{clock_getres, clock_gettime, ClockId};

use super::NANOS_PER_SEC;

/// Wake granularity assumed before negotiation (default 50us slack plus
/// scheduler latency on a loaded desktop)
pub(crate) const DEFAULT_GRANULARITY_NS: u64 = 1_000_000;

/// Floor for the negotiated granularity. hrtimers report 1ns resolution
/// but wakeups still land tens of microseconds late.
const NEGOTIATED_FLOOR_NS: u64 = 50_000;

pub(crate) fn ticks_per_second() -> u64 {
    NANOS_PER_SEC
}

pub(crate) fn now_ticks() -> u64 {
    // CLOCK_MONOTONIC cannot fail on Linux
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|ts| timespec_to_nanos(&ts))
        .unwrap_or_default()
}

pub(crate) fn negotiate_resolution() -> Option<u64> {
    nix::sys::prctl::set_timerslack(1).ok()?;
    let resolution = clock_getres(ClockId::CLOCK_MONOTONIC).ok()?;
    Some(timespec_to_nanos(&resolution).max(NEGOTIATED_FLOOR_NS))
}

fn timespec_to_nanos(ts: &TimeSpec) -> u64 {
    (ts.tv_sec() as u64)
        .saturating_mul(NANOS_PER_SEC)
        .saturating_add(ts.tv_nsec() as u64)
}

/// One-shot absolute timer on `CLOCK_MONOTONIC`
pub(crate) struct KernelTimer {
    fd: TimerFd,
}

impl KernelTimer {
    pub(crate) fn create() -> std::io::Result<Self> {
        let fd = TimerFd::new(TimerClockId::CLOCK_MONOTONIC, TimerFlags::TFD_CLOEXEC)?;
        Ok(Self { fd })
    }

    /// Block until the monotonic clock reaches `deadline_ticks` (nanoseconds).
    pub(crate) fn sleep_until(&mut self, deadline_ticks: u64) -> bool {
        let deadline = TimeSpec::new(
            (deadline_ticks / NANOS_PER_SEC) as _,
            (deadline_ticks % NANOS_PER_SEC) as _,
        );
        if self
            .fd
            .set(Expiration::OneShot(deadline), TimerSetTimeFlags::TFD_TIMER_ABSTIME)
            .is_err()
        {
            return false;
        }
        self.fd.wait().is_ok()
    }
}
