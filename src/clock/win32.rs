//! Windows clock backend: QPC, high-resolution waitable timers,
//! `timeBeginPeriod`.
#![allow(unsafe_code)]

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Media::{timeBeginPeriod, TIMERR_NOERROR};
use windows::Win32::System::Performance::{QueryPerformanceCounter, QueryPerformanceFrequency};
use windows::Win32::System::Threading::{
    CreateWaitableTimerExW, SetWaitableTimerEx, WaitForSingleObject,
    CREATE_WAITABLE_TIMER_HIGH_RESOLUTION, INFINITE, TIMER_ALL_ACCESS,
};

/// Default system tick (64 Hz)
pub(crate) const DEFAULT_GRANULARITY_NS: u64 = 15_625_000;

/// `timeBeginPeriod(1)` resolution
const PERIOD_GRANULARITY_NS: u64 = 1_000_000;

/// High-resolution waitable timers typically wake within half a millisecond
const HIGH_RES_TIMER_GRANULARITY_NS: u64 = 500_000;

pub(crate) fn ticks_per_second() -> u64 {
    let mut frequency = 0i64;
    // SAFETY: valid out pointer; QPF never fails on XP and later
    match unsafe { QueryPerformanceFrequency(&mut frequency) } {
        Ok(()) if frequency > 0 => frequency as u64,
        _ => 10_000_000,
    }
}

pub(crate) fn now_ticks() -> u64 {
    let mut counter = 0i64;
    // SAFETY: valid out pointer
    let _ = unsafe { QueryPerformanceCounter(&mut counter) };
    counter.max(0) as u64
}

pub(crate) fn negotiate_resolution() -> Option<u64> {
    // SAFETY: plain FFI call without pointers
    if unsafe { timeBeginPeriod(1) } != TIMERR_NOERROR {
        return None;
    }
    match KernelTimer::create() {
        Ok(_) => Some(HIGH_RES_TIMER_GRANULARITY_NS),
        Err(_) => Some(PERIOD_GRANULARITY_NS),
    }
}

/// High-resolution waitable timer handle
pub(crate) struct KernelTimer {
    handle: HANDLE,
}

// The handle is only used by the thread that owns the WaitTimer.
unsafe impl Send for KernelTimer {}

impl KernelTimer {
    pub(crate) fn create() -> std::io::Result<Self> {
        // SAFETY: null attributes and name are permitted
        let handle = unsafe {
            CreateWaitableTimerExW(
                None,
                PCWSTR::null(),
                CREATE_WAITABLE_TIMER_HIGH_RESOLUTION,
                TIMER_ALL_ACCESS.0,
            )
        }
        .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Self { handle })
    }

    /// Block until the performance counter reaches `deadline_ticks`.
    pub(crate) fn sleep_until(&mut self, deadline_ticks: u64) -> bool {
        let now = now_ticks();
        if deadline_ticks <= now {
            return true;
        }
        let remaining_ticks = deadline_ticks - now;
        let tps = ticks_per_second();
        // Relative due times are negative, in 100ns units
        let hundred_ns = (remaining_ticks as u128 * 10_000_000 / tps as u128) as i64;
        let due_time = -hundred_ns.max(1);

        // SAFETY: handle is a live waitable timer owned by self
        let armed = unsafe { SetWaitableTimerEx(self.handle, &due_time, 0, None, None, None, 0) };
        if armed.is_err() {
            return false;
        }
        // SAFETY: handle is a live waitable timer owned by self
        unsafe { WaitForSingleObject(self.handle, INFINITE) == WAIT_OBJECT_0 }
    }
}

impl Drop for KernelTimer {
    fn drop(&mut self) {
        // SAFETY: handle was created by CreateWaitableTimerExW and not yet closed
        let _ = unsafe { CloseHandle(self.handle) };
    }
}
