//! Admission state machine and the sampler task that drives it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::admission::middleware::AdmissionRejection;
use crate::admission::sample::{HealthProbe, HealthSample};
use crate::config::AdmissionConfig;
use crate::lifecycle::resources::{CloseError, CloseMode, OwnedResource};
use crate::observability::metrics;

/// Whether new requests are let in.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionState {
    Accepting = 0,
    Shedding = 1,
}

impl From<u8> for AdmissionState {
    fn from(val: u8) -> Self {
        match val {
            1 => AdmissionState::Shedding,
            _ => AdmissionState::Accepting,
        }
    }
}

impl AdmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionState::Accepting => "accepting",
            AdmissionState::Shedding => "shedding",
        }
    }
}

/// How a sample compares with the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    /// At least one signal is above its high threshold.
    Over,
    /// Nothing is over, but something is above its recovery threshold.
    Elevated,
    /// Every signal is below its recovery threshold.
    Calm,
}

/// High and recovery thresholds. Disabled signals never contribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub max_event_loop_delay: Option<Duration>,
    pub max_heap_bytes: Option<u64>,
    pub shed_on_pool_saturation: bool,
    /// Recovery threshold as a fraction of each high threshold, in (0, 1).
    pub recovery_ratio: f64,
}

impl Thresholds {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            max_event_loop_delay: config.max_event_loop_delay(),
            max_heap_bytes: config.max_heap_bytes(),
            shed_on_pool_saturation: config.shed_on_pool_saturation,
            recovery_ratio: config.recovery_ratio,
        }
    }

    pub fn classify(&self, sample: &HealthSample) -> Pressure {
        let delay = sample.event_loop_delay.as_secs_f64();
        let delay_limits = self
            .max_event_loop_delay
            .map(|max| (max.as_secs_f64(), max.as_secs_f64() * self.recovery_ratio));
        let heap_limits = self
            .max_heap_bytes
            .map(|max| (max as f64, max as f64 * self.recovery_ratio));
        let heap = sample.heap_used_bytes.map(|b| b as f64);
        let pool = self.shed_on_pool_saturation && sample.pool_saturated;

        let delay_over = delay_limits.is_some_and(|(high, _)| delay > high);
        let heap_over = matches!((heap, heap_limits), (Some(h), Some((high, _))) if h > high);
        if delay_over || heap_over || pool {
            return Pressure::Over;
        }

        let delay_calm = delay_limits.map_or(true, |(_, low)| delay < low);
        let heap_calm = match (heap, heap_limits) {
            (Some(h), Some((_, low))) => h < low,
            _ => true,
        };
        if delay_calm && heap_calm && !sample.pool_saturated {
            Pressure::Calm
        } else {
            Pressure::Elevated
        }
    }
}

/// Decides, from periodic samples, whether requests are admitted.
///
/// Enters [`Shedding`](AdmissionState::Shedding) on the first sample over a
/// high threshold. Leaves it only once samples have stayed calm for a full
/// sampling interval, so a single good reading does not reopen the gate.
#[derive(Debug)]
pub struct AdmissionController {
    enabled: bool,
    interval: Duration,
    thresholds: Thresholds,
    state: AtomicU8,
    calm_since: Mutex<Option<Instant>>,
    last_sample: ArcSwapOption<HealthSample>,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            enabled: config.enabled,
            interval: config.sample_interval(),
            thresholds: Thresholds::from_config(config),
            state: AtomicU8::new(AdmissionState::Accepting as u8),
            calm_since: Mutex::new(None),
            last_sample: ArcSwapOption::empty(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> AdmissionState {
        AdmissionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn last_sample(&self) -> Option<Arc<HealthSample>> {
        self.last_sample.load_full()
    }

    /// Gate for the request-entry path.
    pub fn admit(&self) -> Result<(), AdmissionRejection> {
        match self.state() {
            AdmissionState::Accepting => Ok(()),
            AdmissionState::Shedding => Err(AdmissionRejection::new(self.interval)),
        }
    }

    /// Feed one sample taken at `now` and return the resulting state.
    pub fn observe(&self, sample: HealthSample, now: Instant) -> AdmissionState {
        let pressure = self.thresholds.classify(&sample);
        metrics::record_event_loop_delay(sample.event_loop_delay);
        let sample = Arc::new(sample);
        self.last_sample.store(Some(Arc::clone(&sample)));

        let mut calm_since = self
            .calm_since
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.state();

        let next = match (current, pressure) {
            (_, Pressure::Over) => {
                *calm_since = None;
                AdmissionState::Shedding
            }
            (AdmissionState::Shedding, Pressure::Calm) => match *calm_since {
                Some(since) if now.duration_since(since) >= self.interval => {
                    *calm_since = None;
                    AdmissionState::Accepting
                }
                Some(_) => AdmissionState::Shedding,
                None => {
                    *calm_since = Some(now);
                    AdmissionState::Shedding
                }
            },
            (state, _) => {
                *calm_since = None;
                state
            }
        };

        if next != current {
            self.state.store(next as u8, Ordering::Release);
            metrics::record_admission_state(next == AdmissionState::Shedding);
            match next {
                AdmissionState::Shedding => tracing::warn!(
                    event_loop_delay_ms = sample.event_loop_delay.as_millis() as u64,
                    heap_used_bytes = ?sample.heap_used_bytes,
                    pool_saturated = sample.pool_saturated,
                    "Process under pressure; shedding new requests"
                ),
                AdmissionState::Accepting => {
                    tracing::info!("Pressure subsided; accepting requests again")
                }
            }
        }

        next
    }

    /// Start sampling `probe` every interval until the returned handle is closed.
    pub fn spawn_sampler(self: &Arc<Self>, probe: Arc<dyn HealthProbe>) -> SamplerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let controller = Arc::clone(self);

        let task = tokio::spawn(async move {
            tracing::info!(
                interval_ms = controller.interval.as_millis() as u64,
                "Admission sampler starting"
            );
            let mut ticker = time::interval(controller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sample = probe.sample().await;
                        controller.observe(sample, Instant::now());
                    }
                    _ = &mut stop_rx => {
                        tracing::debug!("Admission sampler stopping");
                        break;
                    }
                }
            }
        });

        SamplerHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Owned handle to a running sampler task.
#[derive(Debug)]
pub struct SamplerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl OwnedResource for SamplerHandle {
    fn name(&self) -> &str {
        "admission-sampler"
    }

    async fn close(&mut self, _mode: CloseMode) -> Result<(), CloseError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|err| CloseError::failed(self.name(), err))?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdmissionConfig {
        AdmissionConfig {
            enabled: true,
            sample_interval_ms: 1000,
            max_event_loop_delay_ms: 100,
            max_heap_bytes: 1000,
            shed_on_pool_saturation: true,
            recovery_ratio: 0.5,
        }
    }

    fn delay(ms: u64) -> HealthSample {
        HealthSample::new(Duration::from_millis(ms), Some(10), false)
    }

    #[test]
    fn classification_uses_both_thresholds() {
        let thresholds = Thresholds::from_config(&config());
        assert_eq!(thresholds.classify(&delay(150)), Pressure::Over);
        assert_eq!(thresholds.classify(&delay(80)), Pressure::Elevated);
        assert_eq!(thresholds.classify(&delay(20)), Pressure::Calm);

        let heavy = HealthSample::new(Duration::ZERO, Some(2000), false);
        assert_eq!(thresholds.classify(&heavy), Pressure::Over);

        let saturated = HealthSample::new(Duration::ZERO, None, true);
        assert_eq!(thresholds.classify(&saturated), Pressure::Over);
    }

    #[test]
    fn saturation_ignored_when_disabled_but_blocks_calm() {
        let mut cfg = config();
        cfg.shed_on_pool_saturation = false;
        let thresholds = Thresholds::from_config(&cfg);
        let saturated = HealthSample::new(Duration::ZERO, None, true);
        assert_eq!(thresholds.classify(&saturated), Pressure::Elevated);
    }

    #[test]
    fn disabled_signals_never_trip() {
        let mut cfg = config();
        cfg.max_event_loop_delay_ms = 0;
        cfg.max_heap_bytes = 0;
        let thresholds = Thresholds::from_config(&cfg);
        let sample = HealthSample::new(Duration::from_secs(30), Some(u64::MAX), false);
        assert_eq!(thresholds.classify(&sample), Pressure::Calm);
    }

    #[test]
    fn enters_shedding_on_first_high_sample() {
        let controller = AdmissionController::new(&config());
        let t0 = Instant::now();
        assert_eq!(controller.observe(delay(50), t0), AdmissionState::Accepting);
        assert_eq!(
            controller.observe(delay(150), t0 + Duration::from_secs(1)),
            AdmissionState::Shedding
        );
        assert!(controller.admit().is_err());
    }

    #[test]
    fn single_calm_sample_does_not_restore() {
        let controller = AdmissionController::new(&config());
        let t0 = Instant::now();
        controller.observe(delay(150), t0);
        assert_eq!(
            controller.observe(delay(10), t0 + Duration::from_secs(1)),
            AdmissionState::Shedding
        );
        // back above recovery before a full interval of calm
        assert_eq!(
            controller.observe(delay(70), t0 + Duration::from_secs(2)),
            AdmissionState::Shedding
        );
        assert_eq!(
            controller.observe(delay(10), t0 + Duration::from_secs(3)),
            AdmissionState::Shedding
        );
    }

    #[test]
    fn restores_after_a_full_calm_interval() {
        let controller = AdmissionController::new(&config());
        let t0 = Instant::now();
        controller.observe(delay(150), t0);
        controller.observe(delay(10), t0 + Duration::from_secs(1));
        assert_eq!(
            controller.observe(delay(10), t0 + Duration::from_secs(2)),
            AdmissionState::Accepting
        );
        assert!(controller.admit().is_ok());
    }

    #[test]
    fn elevated_sample_keeps_current_state() {
        let controller = AdmissionController::new(&config());
        let t0 = Instant::now();
        assert_eq!(controller.observe(delay(80), t0), AdmissionState::Accepting);
        controller.observe(delay(150), t0);
        assert_eq!(
            controller.observe(delay(80), t0 + Duration::from_secs(5)),
            AdmissionState::Shedding
        );
    }

    #[test]
    fn last_sample_is_recorded() {
        let controller = AdmissionController::new(&config());
        assert!(controller.last_sample().is_none());
        controller.observe(delay(42), Instant::now());
        assert_eq!(
            controller.last_sample().unwrap().event_loop_delay,
            Duration::from_millis(42)
        );
    }
}
