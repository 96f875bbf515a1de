//! Keep a throughput target tuned to what the producer can sustain.

mod controller;
pub mod internal_event;
pub mod lifecycle;
pub mod tuner;

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};

pub use lifecycle::{HostSignal, LifecycleSignals};
pub use tuner::{EventRecorder, RateTuner};

fn instant_now() -> std::time::Instant {
    tokio::time::Instant::now().into()
}

/// Configuration of the rate tuning parameters.
///
/// The defaults describe a producer that comfortably runs around 30 events
/// per second; services with a very different sustainable rate should at
/// least set `initial_target` and the clamp bounds.
///
/// # Configuration Parameters
///
/// All fields are private; configure through the builder.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `initial_target` | 30 | Starting target rate (events per second) |
/// | `evaluation_interval_ms` | 5000 | How often the measured rate is evaluated |
/// | `step` | 2 | Amount the target moves per adjustment |
/// | `margin` | = `step` | Hysteresis band subtracted from the target to form the decision threshold |
/// | `lower_bound` | 6 | Inclusive floor for the target |
/// | `upper_bound` | 60 | Inclusive ceiling for the target |
/// | `ignore_overlong_windows` | true | Discard windows that ran far past the interval |
/// | `overlong_multiplier` | 3 | A window longer than `interval × multiplier` counts as overlong |
/// | `debug` | false | Emit per-cycle debug log lines |
/// | `debug_tag` | `"rate_tuner"` | Label attached to debug log lines |
/// | `enable_pause_integration` | true | Honor host pause/resume signals when a source is supplied |
///
/// # Example
///
/// ```rust
/// use rate_tuner::rate_tuning::RateTunerSettings;
///
/// let settings = RateTunerSettings::builder()
///     .initial_target(20)
///     .step(4)
///     .margin(2)
///     .upper_bound(40)
///     .build();
/// ```
#[derive(Clone, Debug, Builder, Serialize, Deserialize)]
pub struct RateTunerSettings {
    /// Starting target rate, in events per second.
    #[builder(default = default_initial_target())]
    #[serde(default = "default_initial_target")]
    initial_target: u32,

    /// Cadence of the periodic evaluation, in milliseconds.
    #[builder(default = default_evaluation_interval_ms())]
    #[serde(default = "default_evaluation_interval_ms")]
    evaluation_interval_ms: u64,

    /// Amount the target is raised or lowered per adjustment.
    #[builder(default = default_step())]
    #[serde(default = "default_step")]
    step: u32,

    /// Hysteresis band subtracted from the target to form the decision
    /// threshold. Falls back to `step` when unset, so a measurement has to
    /// undershoot by at least one whole step before the target drops.
    #[serde(default)]
    margin: Option<u32>,

    /// Inclusive floor for the target. Candidates below it are rejected,
    /// not clamped.
    #[builder(default = default_lower_bound())]
    #[serde(default = "default_lower_bound")]
    lower_bound: u32,

    /// Inclusive ceiling for the target. Candidates above it are rejected,
    /// not clamped.
    #[builder(default = default_upper_bound())]
    #[serde(default = "default_upper_bound")]
    upper_bound: u32,

    /// Discard measurement windows whose elapsed time far exceeds the
    /// evaluation interval. A suspended process would otherwise be misread
    /// as a catastrophic rate drop on the first cycle after it wakes.
    #[builder(default = default_ignore_overlong_windows())]
    #[serde(default = "default_ignore_overlong_windows")]
    ignore_overlong_windows: bool,

    /// A window counts as overlong once its elapsed time exceeds
    /// `evaluation_interval_ms × overlong_multiplier`.
    #[builder(default = default_overlong_multiplier())]
    #[serde(default = "default_overlong_multiplier")]
    overlong_multiplier: u32,

    /// Emit per-cycle debug log lines (measured rate, threshold, target,
    /// elapsed time, event count).
    #[builder(default)]
    #[serde(default)]
    debug: bool,

    /// Label attached to debug log lines, so multiple tuners can share a
    /// subscriber.
    #[builder(default = default_debug_tag())]
    #[serde(default = "default_debug_tag")]
    debug_tag: String,

    /// Map host pause/resume signals to `stop()`/`start()` when a signal
    /// source is supplied at construction.
    #[builder(default = default_enable_pause_integration())]
    #[serde(default = "default_enable_pause_integration")]
    enable_pause_integration: bool,
}

const fn default_initial_target() -> u32 {
    30
}

const fn default_evaluation_interval_ms() -> u64 {
    5000
}

const fn default_step() -> u32 {
    2
}

const fn default_lower_bound() -> u32 {
    6
}

const fn default_upper_bound() -> u32 {
    60
}

const fn default_ignore_overlong_windows() -> bool {
    true
}

const fn default_overlong_multiplier() -> u32 {
    3
}

fn default_debug_tag() -> String {
    String::from("rate_tuner")
}

const fn default_enable_pause_integration() -> bool {
    true
}

impl Default for RateTunerSettings {
    fn default() -> Self {
        Self {
            initial_target: default_initial_target(),
            evaluation_interval_ms: default_evaluation_interval_ms(),
            step: default_step(),
            margin: None,
            lower_bound: default_lower_bound(),
            upper_bound: default_upper_bound(),
            ignore_overlong_windows: default_ignore_overlong_windows(),
            overlong_multiplier: default_overlong_multiplier(),
            debug: false,
            debug_tag: default_debug_tag(),
            enable_pause_integration: default_enable_pause_integration(),
        }
    }
}

impl RateTunerSettings {
    pub fn get_initial_target(&self) -> u32 {
        self.initial_target
    }

    pub fn get_evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }

    pub fn get_bounds(&self) -> (u32, u32) {
        (self.lower_bound, self.upper_bound)
    }

    /// The hysteresis band actually applied: `margin` when set, `step`
    /// otherwise.
    pub fn effective_margin(&self) -> u32 {
        self.margin.unwrap_or(self.step)
    }

    /// Reject configurations the control loop cannot run with.
    pub fn validate(&self) -> Result<(), InvalidSettings> {
        ensure!(self.evaluation_interval_ms > 0, ZeroIntervalSnafu);
        ensure!(self.step > 0, ZeroStepSnafu);
        ensure!(
            self.lower_bound <= self.upper_bound,
            BoundsReversedSnafu {
                lower: self.lower_bound,
                upper: self.upper_bound,
            }
        );
        ensure!(
            (self.lower_bound..=self.upper_bound).contains(&self.initial_target),
            TargetOutOfBoundsSnafu {
                target_rate: self.initial_target,
                lower: self.lower_bound,
                upper: self.upper_bound,
            }
        );
        Ok(())
    }
}

/// A settings combination the control loop cannot run with.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InvalidSettings {
    #[snafu(display("evaluation_interval_ms must be greater than zero"))]
    ZeroInterval,

    #[snafu(display("step must be greater than zero"))]
    ZeroStep,

    #[snafu(display("lower_bound {lower} must not exceed upper_bound {upper}"))]
    BoundsReversed { lower: u32, upper: u32 },

    #[snafu(display("initial_target {target_rate} must lie within [{lower}, {upper}]"))]
    TargetOutOfBounds {
        target_rate: u32,
        lower: u32,
        upper: u32,
    },
}
