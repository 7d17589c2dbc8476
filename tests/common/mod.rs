//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use vblank_pacer::display::{DisplayTiming, PacingContext, RefreshRate, SimulatedDisplay, WindowHandle};
use vblank_pacer::Clock;

pub const WINDOW: WindowHandle = WindowHandle(0x5150);
pub const REFRESH_NS: u64 = 16_666_667;

pub fn timing_1080p60() -> DisplayTiming {
    DisplayTiming {
        total_scanlines: 1125,
        active_scanlines: 1080,
        refresh: RefreshRate::new(60, 1),
    }
}

pub fn broken_timing() -> DisplayTiming {
    DisplayTiming {
        total_scanlines: 0,
        active_scanlines: 0,
        refresh: RefreshRate::new(0, 1),
    }
}

/// One 1080p60 output named SIM1 showing [`WINDOW`]
pub fn fixture() -> (Arc<SimulatedDisplay>, Arc<PacingContext>) {
    let display = Arc::new(SimulatedDisplay::single_1080p60(Clock::global(), WINDOW));
    let context = Arc::new(PacingContext::for_window(WINDOW));
    (display, context)
}

/// Poll `cond` for up to five seconds
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Distance between two positions on a circle of `modulus` lines
pub fn circular_distance(a: f64, b: f64, modulus: f64) -> f64 {
    let d = (a - b).rem_euclid(modulus);
    d.min(modulus - d)
}

pub fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    values[values.len() / 2]
}
