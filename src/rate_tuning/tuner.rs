//! The periodic sampling shell around the controller core.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use futures::StreamExt;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use super::{
    InvalidSettings, RateTunerSettings,
    controller::{Controller, CycleOutcome},
    instant_now,
    lifecycle::{HostSignal, LifecycleSignals},
};

type AdjustFn = dyn Fn(u32) + Send + Sync;

/// Closed-loop tuner for a throughput target.
///
/// Construction starts the evaluation schedule immediately and fires the
/// adjustment callback once with the initial target, so a consumer can
/// prime itself before the first real cycle. Dropping the tuner cancels
/// the schedule and unsubscribes from any lifecycle signal source.
///
/// Must be constructed inside a Tokio runtime.
pub struct RateTuner {
    shared: Arc<Shared>,
    lifecycle: Option<JoinHandle<()>>,
}

struct Shared {
    settings: RateTunerSettings,
    events: AtomicU64,
    controller: Mutex<Controller>,
    schedule: Mutex<Option<JoinHandle<()>>>,
    on_adjust: Box<AdjustFn>,
}

impl RateTuner {
    /// Validate `settings`, then build and start the tuner. `on_adjust` is
    /// invoked synchronously from the evaluation task whenever the target
    /// is initialized or changes; a panic in it is not caught here.
    pub fn new<F>(settings: RateTunerSettings, on_adjust: F) -> Result<Self, InvalidSettings>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        settings.validate()?;

        let controller = Controller::new(&settings, instant_now());
        let shared = Arc::new(Shared {
            settings,
            events: AtomicU64::new(0),
            controller: Mutex::new(controller),
            schedule: Mutex::new(None),
            on_adjust: Box::new(on_adjust),
        });
        Shared::start(&shared);

        Ok(Self {
            shared,
            lifecycle: None,
        })
    }

    /// Like [`RateTuner::new`], but also subscribes to a host lifecycle
    /// signal source when `enable_pause_integration` is set: `Pause` maps
    /// to [`RateTuner::stop`] and `Resume` to [`RateTuner::start`].
    pub fn with_lifecycle<F, S>(
        settings: RateTunerSettings,
        on_adjust: F,
        signals: &S,
    ) -> Result<Self, InvalidSettings>
    where
        F: Fn(u32) + Send + Sync + 'static,
        S: LifecycleSignals + ?Sized,
    {
        let mut tuner = Self::new(settings, on_adjust)?;

        if tuner.shared.settings.enable_pause_integration {
            let mut stream = signals.subscribe();
            let shared = Arc::clone(&tuner.shared);
            tuner.lifecycle = Some(tokio::spawn(async move {
                while let Some(signal) = stream.next().await {
                    match signal {
                        HostSignal::Pause => shared.stop(),
                        HostSignal::Resume => Shared::start(&shared),
                    }
                }
            }));
        }

        Ok(tuner)
    }

    /// Count one unit of work against the current measurement window.
    ///
    /// Hot path: a single relaxed atomic increment, no allocation, safe to
    /// call at arbitrarily high frequency from any task.
    pub fn record_event(&self) {
        self.shared.events.fetch_add(1, Ordering::Relaxed);
    }

    /// A cheap cloneable handle for producers that should not hold the
    /// tuner itself.
    pub fn recorder(&self) -> EventRecorder {
        EventRecorder {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The current target rate.
    pub fn target(&self) -> u32 {
        self.shared
            .controller
            .lock()
            .expect("controller lock poisoned")
            .target()
    }

    /// Whether the periodic evaluation is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.shared
            .schedule
            .lock()
            .expect("schedule lock poisoned")
            .is_some()
    }

    /// (Re)start the evaluation schedule: any existing schedule is
    /// cancelled first, the measurement window and counter are reset, and
    /// the adjustment callback fires once with the current target.
    pub fn start(&self) {
        Shared::start(&self.shared);
    }

    /// Cancel the evaluation schedule. No-op when already stopped. The
    /// target and counters are left untouched, so a later [`RateTuner::start`]
    /// resumes from the same target.
    pub fn stop(&self) {
        self.shared.stop();
    }
}

impl Drop for RateTuner {
    fn drop(&mut self) {
        self.shared.stop();
        if let Some(handle) = self.lifecycle.take() {
            handle.abort();
        }
    }
}

impl Shared {
    fn start(this: &Arc<Self>) {
        this.stop();

        let initial = {
            let mut controller = this.controller.lock().expect("controller lock poisoned");
            controller.restart_window(instant_now());
            controller.target()
        };
        this.events.store(0, Ordering::Relaxed);

        if this.settings.debug {
            debug!(
                message = "Starting rate evaluation.",
                tag = %this.settings.debug_tag,
                target_rate = initial,
                interval_ms = this.settings.get_evaluation_interval().as_millis() as u64,
            );
        }

        let period = this.settings.get_evaluation_interval();
        let shared = Arc::clone(this);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            // A process that was descheduled must not replay missed ticks
            // as a burst; the overlong-window guard owns that case.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                shared.run_cycle();
            }
        });
        *this.schedule.lock().expect("schedule lock poisoned") = Some(handle);

        (this.on_adjust)(initial);
    }

    fn stop(&self) {
        if let Some(handle) = self
            .schedule
            .lock()
            .expect("schedule lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    fn run_cycle(&self) {
        let events = self.events.swap(0, Ordering::Relaxed);
        let outcome = {
            let mut controller = self.controller.lock().expect("controller lock poisoned");
            controller.evaluate(instant_now(), events)
        };
        // Invoked with no lock held, so the callback may query the tuner.
        if let CycleOutcome::Adjusted { target } = outcome {
            (self.on_adjust)(target);
        }
    }
}

/// Clone-friendly handle onto a tuner's event counter.
#[derive(Clone)]
pub struct EventRecorder {
    shared: Arc<Shared>,
}

impl EventRecorder {
    /// Same hot path as [`RateTuner::record_event`].
    pub fn record_event(&self) {
        self.shared.events.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::*;
    use crate::test_utils::trace_init;

    fn test_settings() -> RateTunerSettings {
        RateTunerSettings::builder()
            .evaluation_interval_ms(1000)
            .margin(2)
            .build()
    }

    fn collector() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Send + Sync + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (calls, move |target| sink.lock().unwrap().push(target))
    }

    fn recorded(calls: &Arc<Mutex<Vec<u32>>>) -> Vec<u32> {
        calls.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn emits_initial_target_on_construction() {
        trace_init();
        time::pause();

        let (calls, sink) = collector();
        let tuner = RateTuner::new(test_settings(), sink).unwrap();

        assert_eq!(recorded(&calls), vec![30]);
        assert_eq!(tuner.target(), 30);
        assert!(tuner.is_running());
    }

    #[tokio::test]
    async fn stop_before_first_cycle_leaves_target_unchanged() {
        time::pause();

        let (calls, sink) = collector();
        let tuner = RateTuner::new(test_settings(), sink).unwrap();
        tuner.stop();

        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(recorded(&calls), vec![30]);
        assert_eq!(tuner.target(), 30);
        assert!(!tuner.is_running());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_start_refires_the_callback() {
        time::pause();

        let (calls, sink) = collector();
        let tuner = RateTuner::new(test_settings(), sink).unwrap();

        tuner.stop();
        tuner.stop();
        assert!(!tuner.is_running());

        tuner.start();
        assert!(tuner.is_running());
        assert_eq!(recorded(&calls), vec![30, 30]);
    }

    #[tokio::test]
    async fn tracks_rate_across_cycles() {
        time::pause();

        let (calls, sink) = collector();
        let tuner = RateTuner::new(test_settings(), sink).unwrap();

        // 20 events in the first 1s window: below threshold 28, step down.
        for _ in 0..20 {
            tuner.record_event();
        }
        time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(recorded(&calls), vec![30, 28]);

        // 40 events in the next window: at or above threshold 26, step up.
        for _ in 0..40 {
            tuner.record_event();
        }
        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(recorded(&calls), vec![30, 28, 30]);
        assert_eq!(tuner.target(), 30);
    }

    #[tokio::test]
    async fn upper_bound_suppresses_the_callback() {
        time::pause();

        let (calls, sink) = collector();
        let tuner = RateTuner::new(
            RateTunerSettings::builder()
                .evaluation_interval_ms(1000)
                .initial_target(60)
                .margin(2)
                .build(),
            sink,
        )
        .unwrap();

        for _ in 0..200 {
            tuner.record_event();
        }
        time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(recorded(&calls), vec![60]);
        assert_eq!(tuner.target(), 60);
    }

    #[tokio::test]
    async fn lower_bound_suppresses_the_callback() {
        time::pause();

        let (calls, sink) = collector();
        let tuner = RateTuner::new(
            RateTunerSettings::builder()
                .evaluation_interval_ms(1000)
                .initial_target(6)
                .margin(2)
                .build(),
            sink,
        )
        .unwrap();

        time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(recorded(&calls), vec![6]);
        assert_eq!(tuner.target(), 6);
    }

    #[tokio::test]
    async fn restart_discards_events_from_the_previous_window() {
        time::pause();

        let (calls, sink) = collector();
        let tuner = RateTuner::new(test_settings(), sink).unwrap();

        for _ in 0..500 {
            tuner.record_event();
        }
        tuner.stop();
        tuner.start();

        // The 500 stale events are gone; only the 20 below count.
        for _ in 0..20 {
            tuner.record_event();
        }
        time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(recorded(&calls), vec![30, 30, 28]);
    }

    #[tokio::test]
    async fn pause_and_resume_signals_drive_the_schedule() {
        time::pause();

        let (tx, _keep_open) = broadcast::channel(8);
        let (calls, sink) = collector();
        let tuner = RateTuner::with_lifecycle(test_settings(), sink, &tx).unwrap();

        tx.send(HostSignal::Pause).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert!(!tuner.is_running());

        // While paused, nothing is evaluated no matter how long passes.
        for _ in 0..100 {
            tuner.record_event();
        }
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorded(&calls), vec![30]);

        tx.send(HostSignal::Resume).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert!(tuner.is_running());
        assert_eq!(recorded(&calls), vec![30, 30]);

        // The resumed window starts clean: zero events reads as rate 0.
        time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(recorded(&calls), vec![30, 30, 28]);
    }

    #[tokio::test]
    async fn disabled_pause_integration_ignores_signals() {
        time::pause();

        let (tx, _keep_open) = broadcast::channel(8);
        let (_calls, sink) = collector();
        let tuner = RateTuner::with_lifecycle(
            RateTunerSettings::builder()
                .evaluation_interval_ms(1000)
                .enable_pause_integration(false)
                .build(),
            sink,
            &tx,
        )
        .unwrap();

        tx.send(HostSignal::Pause).unwrap();
        time::sleep(Duration::from_millis(10)).await;

        assert!(tuner.is_running());
    }

    #[tokio::test]
    async fn recorder_handles_count_from_other_tasks() {
        time::pause();

        let (calls, sink) = collector();
        let tuner = RateTuner::new(test_settings(), sink).unwrap();

        let recorder = tuner.recorder();
        let worker = tokio::spawn(async move {
            for _ in 0..20 {
                recorder.record_event();
            }
        });
        worker.await.unwrap();

        time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(recorded(&calls), vec![30, 28]);
    }

    #[tokio::test]
    async fn construction_rejects_invalid_settings() {
        let result = RateTuner::new(
            RateTunerSettings::builder()
                .lower_bound(60)
                .upper_bound(6)
                .build(),
            |_| {},
        );

        assert!(matches!(result, Err(InvalidSettings::BoundsReversed { .. })));
    }
}
