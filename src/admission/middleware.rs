//! Request-entry gate.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::admission::controller::AdmissionController;
use crate::observability::metrics;

/// A request turned away because the process is shedding load.
///
/// Not an error: it renders as a normal `503` with a `Retry-After` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRejection {
    retry_after: Duration,
}

impl AdmissionRejection {
    pub fn new(retry_after: Duration) -> Self {
        Self { retry_after }
    }

    /// Whole seconds to advertise, at least one.
    pub fn retry_after_secs(&self) -> u64 {
        retry_after_hint_seconds(self.retry_after)
    }
}

/// Round a wait up to whole seconds, never advertising zero.
pub fn retry_after_hint_seconds(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for AdmissionRejection {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs();
        let mut response = (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "service is shedding load",
                "retry_after_secs": retry_after,
            })),
        )
            .into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        response
    }
}

/// Reject new requests while the controller is shedding.
pub async fn admission_middleware(
    State(controller): State<Arc<AdmissionController>>,
    request: Request,
    next: Next,
) -> Response {
    match controller.admit() {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            metrics::record_request_shed();
            tracing::debug!(
                method = %request.method(),
                path = %request.uri().path(),
                "Request shed"
            );
            rejection.into_response()
        }
    }
}
