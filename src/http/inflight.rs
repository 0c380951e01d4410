//! In-flight request tracking.
//!
//! # Responsibilities
//! - Count requests between entry and response
//! - Remember enough about each one to report it if shutdown abandons it
//! - Let the shutdown sequence wait for the count to reach zero

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::http::request::request_id;
use crate::observability::metrics;

/// Relaxed ordering is enough: ids only need to be unique.
static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// A request that has entered the service and not yet responded.
#[derive(Debug, Clone, Serialize)]
pub struct InFlightRequest {
    pub seq: u64,
    pub request_id: Option<String>,
    pub method: String,
    pub path: String,
    #[serde(skip)]
    pub started_at: Instant,
}

impl InFlightRequest {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Tracks in-flight requests for draining.
///
/// The count lives in a watch channel so waiters wake exactly when it
/// changes instead of polling.
#[derive(Debug, Clone)]
pub struct InFlightTracker {
    requests: Arc<DashMap<u64, InFlightRequest>>,
    count: Arc<watch::Sender<usize>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            requests: Arc::new(DashMap::new()),
            count: Arc::new(tx),
        }
    }

    /// Record a request. It stays in flight until the guard drops.
    pub fn track(
        &self,
        method: impl Into<String>,
        path: impl Into<String>,
        request_id: Option<String>,
    ) -> InFlightGuard {
        let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
        self.requests.insert(
            seq,
            InFlightRequest {
                seq,
                request_id,
                method: method.into(),
                path: path.into(),
                started_at: Instant::now(),
            },
        );
        self.count.send_modify(|count| *count += 1);
        metrics::record_inflight(self.count());

        InFlightGuard {
            tracker: self.clone(),
            seq,
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Requests currently in flight, oldest first.
    pub fn snapshot(&self) -> Vec<InFlightRequest> {
        let mut requests: Vec<_> = self
            .requests
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        requests.sort_by_key(|r| r.seq);
        requests
    }

    /// Resolve once no request is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    fn release(&self, seq: u64) {
        if self.requests.remove(&seq).is_some() {
            self.count.send_modify(|count| *count = count.saturating_sub(1));
            metrics::record_inflight(self.count());
        }
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one request in flight. Releases it on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: InFlightTracker,
    seq: u64,
}

impl InFlightGuard {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.release(self.seq);
        tracing::trace!(seq = self.seq, "Request finished");
    }
}

/// Hold an [`InFlightGuard`] for the lifetime of each request.
pub async fn track_inflight(
    State(tracker): State<InFlightTracker>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request_id(&request).map(str::to_string);
    let _guard = tracker.track(request.method().as_str(), request.uri().path(), request_id);
    next.run(request).await
}
