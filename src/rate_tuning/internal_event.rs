//! Metric and trace emission for tuning decisions.

use std::time::Duration;

use metrics::{Counter, Histogram, counter, histogram};

/// Fields captured for one completed sampling cycle.
#[derive(Clone, Copy, Debug)]
pub struct CycleData {
    pub target_rate: u32,
    pub measured_rate: u64,
    pub threshold: i64,
    pub elapsed: Duration,
    pub events: u64,
    pub adjusted: bool,
}

/// Emitted once per evaluation cycle that produced a usable sample.
pub struct TunerCycleComplete {
    // Histograms, as each value over a reporting interval is useful for
    // diagnosing how the loop converges.
    target_rate: Histogram,
    measured_rate: Histogram,
}

impl TunerCycleComplete {
    pub fn register() -> Self {
        Self {
            target_rate: histogram!("rate_tuner_target"),
            measured_rate: histogram!("rate_tuner_measured_rate"),
        }
    }

    pub fn emit(&self, data: CycleData) {
        self.target_rate.record(f64::from(data.target_rate));
        self.measured_rate.record(data.measured_rate as f64);

        tracing::trace!(
            target: "rate_tuner::stats",
            target_rate = data.target_rate,
            measured_rate = data.measured_rate,
            threshold = data.threshold,
            elapsed_ms = data.elapsed.as_millis() as u64,
            events = data.events,
            adjusted = data.adjusted,
            "Cycle Evaluated"
        );
    }
}

/// Emitted when a measurement window is thrown away as stale.
pub struct TunerWindowDiscarded {
    discarded: Counter,
}

impl TunerWindowDiscarded {
    pub fn register() -> Self {
        Self {
            discarded: counter!("rate_tuner_discarded_windows_total"),
        }
    }

    pub fn emit(&self, elapsed: Duration) {
        self.discarded.increment(1);

        tracing::debug!(
            target: "rate_tuner::stats",
            elapsed_ms = elapsed.as_millis() as u64,
            "Window Discarded"
        );
    }
}
