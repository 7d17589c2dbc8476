//! Portable clock backend built on `std::time::Instant`.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use super::NANOS_PER_SEC;

pub(crate) const DEFAULT_GRANULARITY_NS: u64 = 2_000_000;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

pub(crate) fn ticks_per_second() -> u64 {
    NANOS_PER_SEC
}

pub(crate) fn now_ticks() -> u64 {
    epoch().elapsed().as_nanos() as u64
}

pub(crate) fn negotiate_resolution() -> Option<u64> {
    None
}

/// `thread::sleep` stand-in for a kernel timer
pub(crate) struct KernelTimer;

impl KernelTimer {
    pub(crate) fn create() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub(crate) fn sleep_until(&mut self, deadline_ticks: u64) -> bool {
        let now = now_ticks();
        if deadline_ticks > now {
            std::thread::sleep(Duration::from_nanos(deadline_ticks - now));
        }
        true
    }
}
