//! Closed-loop tuning of a throughput target from observed event rates.
//!
//! This crate keeps a single scalar target (events per second) aligned with
//! what a producer can actually sustain. Application code reports each unit
//! of work with [`rate_tuning::RateTuner::record_event`]; a periodic
//! evaluation task measures the achieved rate over the elapsed window and
//! nudges the target up or down by a fixed step, within an inclusive clamp
//! range.
//!
//! # Algorithm Overview
//!
//! Each evaluation cycle:
//! 1. Compute `measured = floor(events / elapsed_seconds)` for the window
//!    since the last cycle.
//! 2. Compare against `target - margin`. The margin is a hysteresis band
//!    that keeps noise near the target from flapping the decision.
//! 3. Below the threshold, step the target down; at or above it, step up.
//!    A candidate outside `[lower_bound, upper_bound]` is rejected outright
//!    rather than clamped, so the target only ever moves by whole steps.
//! 4. Windows that ran far longer than the evaluation interval (the process
//!    was suspended, not slow) are discarded instead of being misread as a
//!    rate collapse.
//!
//! # Features
//! - Lock-free event recording, one relaxed atomic increment per call
//! - Hysteresis margin and bounded single-step moves to avoid oscillation
//! - Stale-window guard for suspended or descheduled processes
//! - Optional pause/resume integration with a host runtime
//!
//! # Basic Usage
//! ```no_run
//! use rate_tuner::rate_tuning::{RateTuner, RateTunerSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rate_tuner::Error> {
//!     let settings = RateTunerSettings::builder()
//!         .initial_target(24)
//!         .evaluation_interval_ms(2000)
//!         .build();
//!
//!     let tuner = RateTuner::new(settings, |target| {
//!         println!("new target rate: {target}/s");
//!     })?;
//!
//!     // On the hot path, once per unit of work:
//!     tuner.record_event();
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//! See [`rate_tuning::RateTunerSettings`] for tuning parameters.
//!
//! # Metrics
//! Cycle results are recorded through the `metrics` crate; see
//! [`rate_tuning::internal_event`].
pub mod rate_tuning;
#[cfg(test)]
pub mod test_utils;

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
