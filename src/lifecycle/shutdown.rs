//! Shutdown coordination.
//!
//! [`Shutdown`] counts termination requests; [`ShutdownCoordinator`] turns
//! the first one into the drain-and-close sequence and treats a second as
//! an order to stop waiting.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};

use crate::config::ShutdownConfig;
use crate::http::{InFlightRequest, InFlightTracker};
use crate::lifecycle::resources::{CloseError, CloseMode, OwnedResource};
use crate::lifecycle::state::{Lifecycle, LifecycleState};
use crate::observability::metrics;

/// Termination trigger shared by signal handlers and long-running tasks.
///
/// Every [`trigger`](Self::trigger) bumps a counter; tasks wait for the
/// count they care about (first request to drain, second to force).
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<u32>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.tx.subscribe()
    }

    /// Request termination. Returns how many requests have been made so far.
    pub fn trigger(&self) -> u32 {
        let mut count = 0;
        self.tx.send_modify(|c| {
            *c += 1;
            count = *c;
        });
        count
    }

    pub fn count(&self) -> u32 {
        *self.tx.borrow()
    }

    /// Resolve once at least `n` termination requests have been made.
    pub async fn triggered(&self, n: u32) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// How the drain phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight request finished within the grace period.
    Drained,
    /// The grace period ran out with requests still in flight.
    GraceExpired,
    /// A second termination request cut the drain short.
    Escalated,
}

impl DrainOutcome {
    pub fn is_forced(&self) -> bool {
        !matches!(self, DrainOutcome::Drained)
    }
}

/// What happened during shutdown.
#[derive(Debug)]
pub struct ShutdownReport {
    pub outcome: DrainOutcome,
    pub grace_period: Duration,
    /// From the start of draining to `Closed`.
    pub elapsed: Duration,
    /// Requests still in flight when the drain was cut short.
    pub abandoned: Vec<InFlightRequest>,
    /// Resources that failed or overran their close timeout.
    pub close_failures: Vec<CloseError>,
}

impl ShutdownReport {
    pub fn is_forced(&self) -> bool {
        self.outcome.is_forced()
    }

    /// `Ok` for a clean drain, otherwise the forced-shutdown error.
    pub fn into_result(self) -> Result<ShutdownReport, ShutdownTimeoutError> {
        if !self.is_forced() {
            return Ok(self);
        }
        Err(ShutdownTimeoutError {
            grace_period: self.grace_period,
            escalated: self.outcome == DrainOutcome::Escalated,
            abandoned: self.abandoned,
            close_failures: self.close_failures,
        })
    }
}

/// Shutdown had to force its way past in-flight work.
#[derive(Debug)]
pub struct ShutdownTimeoutError {
    pub grace_period: Duration,
    pub escalated: bool,
    pub abandoned: Vec<InFlightRequest>,
    pub close_failures: Vec<CloseError>,
}

impl fmt::Display for ShutdownTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cause = if self.escalated {
            "second termination signal".to_string()
        } else {
            format!("grace period of {:?} exhausted", self.grace_period)
        };
        write!(
            f,
            "forced shutdown ({cause}) with {} request(s) abandoned",
            self.abandoned.len()
        )
    }
}

impl std::error::Error for ShutdownTimeoutError {}

/// Drives DRAINING → CLOSED over the resources acquired at startup.
pub struct ShutdownCoordinator {
    grace_period: Duration,
    close_timeout: Duration,
    lifecycle: Lifecycle,
    shutdown: Shutdown,
    inflight: InFlightTracker,
    resources: Vec<Box<dyn OwnedResource>>,
}

enum CloseStep {
    Finished(Result<(), CloseError>),
    TimedOut,
    Escalated,
}

impl ShutdownCoordinator {
    pub fn new(
        config: &ShutdownConfig,
        lifecycle: Lifecycle,
        shutdown: Shutdown,
        inflight: InFlightTracker,
    ) -> Self {
        Self {
            grace_period: config.grace_period(),
            close_timeout: config.close_timeout(),
            lifecycle,
            shutdown,
            inflight,
            resources: Vec::new(),
        }
    }

    /// Take ownership of a resource. Call in acquisition order.
    pub fn push(&mut self, resource: Box<dyn OwnedResource>) {
        tracing::debug!(resource = resource.name(), "Resource acquired");
        self.resources.push(resource);
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name()).collect()
    }

    /// Drain in-flight requests, then close every resource in reverse
    /// acquisition order.
    pub async fn run(mut self) -> ShutdownReport {
        let started = Instant::now();
        self.lifecycle.advance(LifecycleState::Draining);
        tracing::info!(
            in_flight = self.inflight.count(),
            grace_period_secs = self.grace_period.as_secs_f64(),
            "Draining"
        );

        for resource in self.resources.iter_mut() {
            resource.begin_drain();
        }

        let outcome = drain(&self.inflight, &self.shutdown, self.grace_period).await;
        let abandoned = if outcome.is_forced() {
            let abandoned = self.inflight.snapshot();
            metrics::record_forced_shutdown(outcome == DrainOutcome::Escalated);
            tracing::warn!(
                abandoned = abandoned.len(),
                escalated = outcome == DrainOutcome::Escalated,
                "Forcing shutdown with requests still in flight"
            );
            for request in &abandoned {
                tracing::warn!(
                    request_id = request.request_id.as_deref().unwrap_or("-"),
                    method = %request.method,
                    path = %request.path,
                    elapsed_ms = request.elapsed().as_millis() as u64,
                    "Request abandoned"
                );
            }
            abandoned
        } else {
            Vec::new()
        };

        let mode = if outcome.is_forced() {
            CloseMode::Forced
        } else {
            CloseMode::Graceful
        };
        let close_failures = self.close_all(mode).await;

        self.lifecycle.advance(LifecycleState::Closed);
        let elapsed = started.elapsed();
        tracing::info!(
            elapsed_ms = elapsed.as_millis() as u64,
            forced = outcome.is_forced(),
            close_failures = close_failures.len(),
            "Shutdown complete"
        );

        ShutdownReport {
            outcome,
            grace_period: self.grace_period,
            elapsed,
            abandoned,
            close_failures,
        }
    }

    async fn close_all(&mut self, mut mode: CloseMode) -> Vec<CloseError> {
        let mut failures = Vec::new();
        let close_timeout = self.close_timeout;
        let shutdown = self.shutdown.clone();

        for resource in self.resources.iter_mut().rev() {
            let name = resource.name().to_string();
            let step = {
                let close = time::timeout(close_timeout, resource.close(mode));
                tokio::select! {
                    result = close => match result {
                        Ok(result) => CloseStep::Finished(result),
                        Err(_) => CloseStep::TimedOut,
                    },
                    _ = shutdown.triggered(2), if mode == CloseMode::Graceful => CloseStep::Escalated,
                }
            };

            match step {
                CloseStep::Finished(Ok(())) => {
                    tracing::info!(resource = %name, "Resource closed");
                }
                CloseStep::Finished(Err(err)) => {
                    tracing::error!(resource = %name, error = %err, "Resource failed to close");
                    failures.push(err);
                }
                CloseStep::TimedOut => {
                    resource.abort();
                    let err = CloseError::TimedOut {
                        resource: name,
                        timeout: close_timeout,
                    };
                    tracing::error!(error = %err, "Resource close timed out; aborted");
                    failures.push(err);
                }
                CloseStep::Escalated => {
                    resource.abort();
                    tracing::warn!(resource = %name, "Second termination signal; aborting close");
                    failures.push(CloseError::Interrupted { resource: name });
                    mode = CloseMode::Forced;
                }
            }
        }

        failures
    }
}

/// Race the in-flight count reaching zero against the grace period and a
/// second termination request.
async fn drain(inflight: &InFlightTracker, shutdown: &Shutdown, grace_period: Duration) -> DrainOutcome {
    if shutdown.count() >= 2 {
        return DrainOutcome::Escalated;
    }
    tokio::select! {
        _ = inflight.wait_idle() => DrainOutcome::Drained,
        _ = time::sleep(grace_period) => DrainOutcome::GraceExpired,
        _ = shutdown.triggered(2) => DrainOutcome::Escalated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl OwnedResource for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn begin_drain(&mut self) {
            self.log.lock().unwrap().push(format!("drain {}", self.name));
        }

        async fn close(&mut self, mode: CloseMode) -> Result<(), CloseError> {
            time::sleep(self.delay).await;
            self.log
                .lock()
                .unwrap()
                .push(format!("close {} {:?}", self.name, mode));
            Ok(())
        }

        fn abort(&mut self) {
            self.log.lock().unwrap().push(format!("abort {}", self.name));
        }
    }

    fn assert_about(elapsed: Duration, secs: u64) {
        let expected = Duration::from_secs(secs);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(50),
            "expected ~{expected:?}, took {elapsed:?}"
        );
    }

    fn config(grace: u64) -> ShutdownConfig {
        ShutdownConfig {
            grace_period_secs: grace,
            close_timeout_secs: 1,
        }
    }

    fn coordinator(
        grace: u64,
        delays: &[(&'static str, u64)],
    ) -> (ShutdownCoordinator, InFlightTracker, Shutdown, Arc<Mutex<Vec<String>>>) {
        let inflight = InFlightTracker::new();
        let shutdown = Shutdown::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut coordinator = ShutdownCoordinator::new(
            &config(grace),
            Lifecycle::new(),
            shutdown.clone(),
            inflight.clone(),
        );
        for &(name, delay_ms) in delays {
            coordinator.push(Box::new(Recorder {
                name,
                log: Arc::clone(&log),
                delay: Duration::from_millis(delay_ms),
            }));
        }
        (coordinator, inflight, shutdown, log)
    }

    #[test]
    fn trigger_counts_requests() {
        let shutdown = Shutdown::new();
        assert_eq!(shutdown.count(), 0);
        assert_eq!(shutdown.trigger(), 1);
        assert_eq!(shutdown.clone().trigger(), 2);
        assert_eq!(shutdown.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closes_in_reverse_acquisition_order() {
        let (coordinator, _inflight, _shutdown, log) =
            coordinator(5, &[("pool", 0), ("sampler", 0), ("listener", 0)]);

        let report = coordinator.run().await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert!(report.close_failures.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "drain pool",
                "drain sampler",
                "drain listener",
                "close listener Graceful",
                "close sampler Graceful",
                "close pool Graceful",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_close_is_bounded_and_aborted() {
        let (coordinator, _inflight, _shutdown, log) =
            coordinator(5, &[("pool", 0), ("listener", 10_000)]);

        let started = Instant::now();
        let report = coordinator.run().await;
        assert_about(started.elapsed(), 1);
        assert_eq!(
            report.close_failures,
            vec![CloseError::TimedOut {
                resource: "listener".into(),
                timeout: Duration::from_secs(1)
            }]
        );
        assert!(log.lock().unwrap().contains(&"abort listener".to_string()));
        assert!(log.lock().unwrap().contains(&"close pool Graceful".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_expiry_forces_close_and_reports_abandoned() {
        let (coordinator, inflight, _shutdown, log) = coordinator(5, &[("pool", 0)]);
        let _stuck = inflight.track("GET", "/stuck", Some("req-1".into()));

        let started = Instant::now();
        let report = coordinator.run().await;
        assert_about(started.elapsed(), 5);
        assert_eq!(report.outcome, DrainOutcome::GraceExpired);
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].path, "/stuck");
        assert!(log.lock().unwrap().contains(&"close pool Forced".to_string()));

        let err = report.into_result().unwrap_err();
        assert!(!err.escalated);
        assert_eq!(err.abandoned.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn two_requests_finishing_early_drain_in_about_two_seconds() {
        let (coordinator, inflight, _shutdown, log) = coordinator(5, &[("pool", 0)]);
        let first = inflight.track("GET", "/orders", Some("req-1".into()));
        let second = inflight.track("POST", "/orders", Some("req-2".into()));

        let finish = tokio::spawn(async move {
            time::sleep(Duration::from_secs(2)).await;
            drop(first);
            drop(second);
        });

        let started = Instant::now();
        let report = coordinator.run().await;
        finish.await.unwrap();
        assert_about(started.elapsed(), 2);
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_about(report.elapsed, 2);
        assert!(report.abandoned.is_empty());
        assert!(log.lock().unwrap().contains(&"close pool Graceful".to_string()));
        assert!(report.into_result().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn two_stuck_requests_are_both_abandoned_at_grace_expiry() {
        let (coordinator, inflight, _shutdown, log) = coordinator(5, &[("pool", 0)]);
        let _first = inflight.track("GET", "/orders", Some("req-1".into()));
        let _second = inflight.track("POST", "/orders", Some("req-2".into()));

        let report = coordinator.run().await;
        assert_eq!(report.outcome, DrainOutcome::GraceExpired);
        assert_about(report.elapsed, 5);
        assert_eq!(report.abandoned.len(), 2);
        let mut ids: Vec<_> = report
            .abandoned
            .iter()
            .filter_map(|r| r.request_id.clone())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["req-1", "req-2"]);
        assert!(log.lock().unwrap().contains(&"close pool Forced".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn second_trigger_escalates_drain() {
        let (coordinator, inflight, shutdown, _log) = coordinator(30, &[("pool", 0)]);
        let _stuck = inflight.track("GET", "/stuck", None);
        shutdown.trigger();

        let escalate = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_secs(1)).await;
                shutdown.trigger();
            })
        };

        let started = Instant::now();
        let report = coordinator.run().await;
        escalate.await.unwrap();
        assert_about(started.elapsed(), 1);
        assert_eq!(report.outcome, DrainOutcome::Escalated);
        assert!(report.into_result().unwrap_err().escalated);
    }
}
