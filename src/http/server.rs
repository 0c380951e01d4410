//! HTTP server setup.
//!
//! # Responsibilities
//! - Assemble the plugin router with the health endpoints
//! - Wire up middleware (admission gate, in-flight tracking, timeout, request ID, tracing)
//! - Serve on a bound listener until told to drain

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::middleware;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;

use crate::admission::{admission_middleware, AdmissionController};
use crate::config::ListenerConfig;
use crate::http::health::health_router;
use crate::http::inflight::{track_inflight, InFlightTracker};
use crate::http::request::with_request_id;
use crate::lifecycle::resources::{CloseError, CloseMode, OwnedResource};
use crate::lifecycle::Lifecycle;

/// HTTP front end: plugin routes behind the admission gate plus health.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(
        config: &ListenerConfig,
        plugins: Router,
        admission: Arc<AdmissionController>,
        lifecycle: Lifecycle,
        inflight: InFlightTracker,
    ) -> Self {
        let router = Self::build_router(config, plugins, admission, lifecycle, inflight);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(
        config: &ListenerConfig,
        plugins: Router,
        admission: Arc<AdmissionController>,
        lifecycle: Lifecycle,
        inflight: InFlightTracker,
    ) -> Router {
        let gated = if admission.is_enabled() {
            plugins.layer(middleware::from_fn_with_state(
                Arc::clone(&admission),
                admission_middleware,
            ))
        } else {
            plugins
        };

        let router = gated
            .merge(health_router(lifecycle, admission))
            .layer(TimeoutLayer::new(config.request_timeout()))
            .layer(middleware::from_fn_with_state(inflight, track_inflight));

        with_request_id(router)
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` in a background task.
    pub fn spawn(self, listener: TcpListener) -> io::Result<ServerHandle> {
        let local_addr = listener.local_addr()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let router = self.router;

        let task = tokio::spawn(async move {
            tracing::info!(address = %local_addr, "HTTP server starting");
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await;
            tracing::info!("HTTP server stopped");
            result
        });

        Ok(ServerHandle {
            local_addr,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }
}

/// A running listener, owned by the shutdown sequence.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl OwnedResource for ServerHandle {
    fn name(&self) -> &str {
        "http-listener"
    }

    /// Stop accepting connections; open ones finish their requests.
    fn begin_drain(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
            tracing::info!(address = %self.local_addr, "Listener stopped accepting connections");
        }
    }

    async fn close(&mut self, mode: CloseMode) -> Result<(), CloseError> {
        self.begin_drain();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        if mode == CloseMode::Forced {
            task.abort();
            return Ok(());
        }
        match task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(CloseError::failed(self.name(), err)),
            Err(err) => Err(CloseError::failed(self.name(), err)),
        }
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
