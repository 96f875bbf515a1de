//! The sampling-and-adjustment core, free of any scheduling concerns.

use std::time::Instant;

use super::RateTunerSettings;
use super::internal_event::{CycleData, TunerCycleComplete, TunerWindowDiscarded};

/// Outcome of a single evaluation cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum CycleOutcome {
    /// The target moved by one step; carries the new value.
    Adjusted { target: u32 },
    /// The candidate fell outside the clamp range; target unchanged.
    BoundReached { target: u32 },
    /// The window exceeded the staleness limit and was thrown away.
    Discarded,
    /// Zero-length window; no reliable sample this cycle.
    NoSample,
}

/// Measures the achieved rate over each window and decides which way the
/// target moves. Driven by the shell in [`super::tuner`]; every public-ish
/// entry point here takes `now` explicitly so cycles are reproducible.
pub(super) struct Controller {
    target: u32,
    window_start: Instant,
    step: u32,
    margin: u32,
    lower_bound: u32,
    upper_bound: u32,
    interval_ms: u64,
    ignore_overlong_windows: bool,
    overlong_multiplier: u32,
    debug: bool,
    debug_tag: String,
    cycle_event: TunerCycleComplete,
    discard_event: TunerWindowDiscarded,
}

impl Controller {
    pub(super) fn new(settings: &RateTunerSettings, now: Instant) -> Self {
        Self {
            target: settings.initial_target,
            window_start: now,
            step: settings.step,
            margin: settings.effective_margin(),
            lower_bound: settings.lower_bound,
            upper_bound: settings.upper_bound,
            interval_ms: settings.evaluation_interval_ms,
            ignore_overlong_windows: settings.ignore_overlong_windows,
            overlong_multiplier: settings.overlong_multiplier,
            debug: settings.debug,
            debug_tag: settings.debug_tag.clone(),
            cycle_event: TunerCycleComplete::register(),
            discard_event: TunerWindowDiscarded::register(),
        }
    }

    pub(super) const fn target(&self) -> u32 {
        self.target
    }

    /// Begin a fresh measurement window at `now`.
    pub(super) fn restart_window(&mut self, now: Instant) {
        self.window_start = now;
    }

    /// Run one evaluation cycle over the window ending at `now`, with
    /// `events` counted since the window began. The window is reset on
    /// every path out of here.
    pub(super) fn evaluate(&mut self, now: Instant, events: u64) -> CycleOutcome {
        let elapsed = now.saturating_duration_since(self.window_start);

        if self.ignore_overlong_windows {
            // Compare milliseconds against milliseconds; the multiplier
            // scales the interval, it is not a flag.
            let limit_ms = u128::from(self.interval_ms) * u128::from(self.overlong_multiplier);
            if elapsed.as_millis() > limit_ms {
                self.window_start = now;
                self.discard_event.emit(elapsed);
                if self.debug {
                    debug!(
                        message = "Discarding overlong measurement window.",
                        tag = %self.debug_tag,
                        elapsed_ms = elapsed.as_millis() as u64,
                        limit_ms = limit_ms as u64,
                        events,
                    );
                }
                return CycleOutcome::Discarded;
            }
        }

        if elapsed.is_zero() {
            // Nothing to divide by; skip the adjustment but keep the
            // window moving.
            self.window_start = now;
            return CycleOutcome::NoSample;
        }

        let measured = (events as f64 / elapsed.as_secs_f64()).floor() as u64;
        let threshold = i64::from(self.target) - i64::from(self.margin);
        // A negative threshold is met by any measurement.
        let below_threshold = u64::try_from(threshold).is_ok_and(|t| measured < t);

        let outcome = if below_threshold {
            let candidate = i64::from(self.target) - i64::from(self.step);
            if candidate >= i64::from(self.lower_bound) {
                self.target = candidate as u32;
                CycleOutcome::Adjusted { target: self.target }
            } else {
                CycleOutcome::BoundReached { target: self.target }
            }
        } else {
            // Meeting the threshold exactly still probes upward; only the
            // ceiling stops the climb.
            let candidate = i64::from(self.target) + i64::from(self.step);
            if candidate <= i64::from(self.upper_bound) {
                self.target = candidate as u32;
                CycleOutcome::Adjusted { target: self.target }
            } else {
                CycleOutcome::BoundReached { target: self.target }
            }
        };

        self.window_start = now;

        self.cycle_event.emit(CycleData {
            target_rate: self.target,
            measured_rate: measured,
            threshold,
            elapsed,
            events,
            adjusted: matches!(outcome, CycleOutcome::Adjusted { .. }),
        });
        if self.debug {
            debug!(
                message = "Evaluation cycle complete.",
                tag = %self.debug_tag,
                measured_rate = measured,
                threshold,
                target_rate = self.target,
                elapsed_ms = elapsed.as_millis() as u64,
                events,
            );
        }

        outcome
    }
}
