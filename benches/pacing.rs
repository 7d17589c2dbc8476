//! Pacing Benchmarks
//!
//! Measures the per-frame cost of the pacing hot paths: wait planning on
//! the present thread and phase updates on the sampler thread.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vblank_pacer::clock::{ClockSample, TickDuration};
use vblank_pacer::config::PacingConfig;
use vblank_pacer::display::{PacingContext, SimulatedDisplay, TimingSnapshot, WindowHandle};
use vblank_pacer::sync::{reconcile, LatentSyncLimiter, PhaseTracker, ScanSample};
use vblank_pacer::Clock;

const WINDOW: WindowHandle = WindowHandle(0xBE);

fn snapshot(total: u32, refresh_ns: u64) -> TimingSnapshot {
    TimingSnapshot {
        total_scanlines: total,
        active_scanlines: total * 24 / 25,
        refresh_interval_ns: refresh_ns,
    }
}

/// Wait planning for common display modes
fn bench_compute_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_plan");
    let clock = Clock::global();

    let modes = [
        (1125, 16_666_667u64, "1080p60"),
        (1481, 6_944_444, "1440p144"),
        (2250, 4_166_667, "4K240"),
    ];

    for (total, refresh_ns, name) in modes {
        let display = Arc::new(SimulatedDisplay::single_1080p60(clock, WINDOW));
        let context = Arc::new(PacingContext::for_window(WINDOW));
        context.model.publish(snapshot(total, refresh_ns));
        context.set_phase_offset(37.25);
        let limiter = LatentSyncLimiter::new(clock, context, display, &PacingConfig::default());

        group.bench_with_input(BenchmarkId::from_parameter(name), &limiter, |b, limiter| {
            b.iter(|| black_box(limiter.compute_plan(black_box(clock.now()))));
        });
    }

    group.finish();
}

/// Phase tracker update with trusted and untrusted samples
fn bench_phase_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("phase_update");
    let tps = Clock::global().ticks_per_second();
    let model = snapshot(1125, 16_666_667);

    for (query_ns, name) in [(20_000u64, "trusted"), (400_000, "untrusted")] {
        group.bench_function(name, |b| {
            let mut tracker = PhaseTracker::default();
            // Establish the fastest query first
            tracker.update(
                &ScanSample {
                    sample_mid_time: ClockSample(0),
                    scanline: 0,
                    query_duration: TickDuration::from_nanos(20_000, tps),
                },
                model,
                tps,
            );
            let mut t = 0u64;
            b.iter(|| {
                t += 1_000_000;
                let sample = ScanSample {
                    sample_mid_time: ClockSample(t),
                    scanline: (t % 1125) as u32,
                    query_duration: TickDuration::from_nanos(query_ns, tps),
                };
                black_box(tracker.update(black_box(&sample), model, tps))
            });
        });
    }

    group.finish();
}

/// Scanline wrap reconciliation
fn bench_reconcile(c: &mut Criterion) {
    c.bench_function("reconcile", |b| {
        b.iter(|| black_box(reconcile(black_box(4475.0), black_box(5.0), 1125.0)));
    });
}

criterion_group!(benches, bench_compute_plan, bench_phase_update, bench_reconcile);
criterion_main!(benches);
