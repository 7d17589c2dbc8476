//! Presentation Pacing
//!
//! Everything between "the host is about to present" and "the host may
//! present now".
//!
//! # Architecture
//!
//! ```text
//!  sampler thread                         present thread
//!  ━━━━━━━━━━━━━━                         ━━━━━━━━━━━━━━
//!  SamplerWorker                          FramePacer::limit()
//!    ├─ ScanlineSampler::sample()           ├─ LatentSyncLimiter   (scanline mode)
//!    └─ PhaseTracker::update()              │    ├─ refresh model / rebind
//!          │                                │    ├─ compute_plan()
//!          ▼                                │    └─ Clock::wait_until()
//!   PacingContext (atomics) ◄───────────────┘
//!                                           └─ SimpleFrameLimiter  (fps mode, fallback)
//! ```
//!
//! # Scanline Arithmetic
//!
//! Scanline positions are circular with period `total_scanlines`. The
//! helpers below do all modular reconciliation so the limiter and the
//! tracker agree on how a wrap is resolved.

mod latent;
mod pacer;
mod phase;
mod sampler;
mod simple;
mod worker;

pub use latent::{LatentSyncLimiter, LimiterStats, OverheadEstimator, SkipReason, WaitPlan};
pub use pacer::{FramePacer, PacingDiagnostics, PacingMode};
pub use phase::{PhaseTracker, PhaseUpdate};
pub use sampler::{ScanSample, ScanlineSampler};
pub use simple::SimpleFrameLimiter;
pub use worker::{SamplerStats, SamplerWorker};

/// Reduce `value` into `[0, modulus)`.
///
/// `modulus` must be positive.
#[inline]
pub fn wrap_scanline(value: f64, modulus: f64) -> f64 {
    let wrapped = value.rem_euclid(modulus);
    // rem_euclid rounds tiny negatives up to exactly `modulus`
    if wrapped >= modulus {
        0.0
    } else {
        wrapped
    }
}

/// Of `delta`, `delta - modulus` and `delta + modulus`, the one closest to zero.
#[inline]
pub fn nearest_representative(delta: f64, modulus: f64) -> f64 {
    [delta, delta - modulus, delta + modulus]
        .into_iter()
        .min_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(delta)
}

/// Move `anchor` to the nearest value congruent to `raw` modulo `modulus`.
///
/// With a 1125-line display, an anchor at 1100 and a raw target of 5
/// (wrapped past zero) this yields 1130, not 5.
#[inline]
pub fn reconcile(anchor: f64, raw: f64, modulus: f64) -> f64 {
    anchor + nearest_representative(wrap_scanline(raw - anchor, modulus), modulus)
}
