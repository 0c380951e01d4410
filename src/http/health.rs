//! Readiness and liveness endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::admission::{retry_after_hint_seconds, AdmissionController, AdmissionState};
use crate::lifecycle::{Lifecycle, LifecycleState};

pub const READINESS_PATH: &str = "/health";
pub const LIVENESS_PATH: &str = "/health/live";

#[derive(Clone)]
struct HealthState {
    lifecycle: Lifecycle,
    admission: Arc<AdmissionController>,
}

/// `GET /health` and `GET /health/live`, outside admission control.
pub fn health_router(lifecycle: Lifecycle, admission: Arc<AdmissionController>) -> Router {
    Router::new()
        .route(READINESS_PATH, get(readiness))
        .route(LIVENESS_PATH, get(liveness))
        .with_state(HealthState {
            lifecycle,
            admission,
        })
}

async fn readiness(State(state): State<HealthState>) -> Response {
    let lifecycle = state.lifecycle.current();
    let admission = state.admission.state();
    let ready = lifecycle == LifecycleState::Running && admission == AdmissionState::Accepting;

    let payload = Json(json!({
        "status": if ready { "ok" } else { "unavailable" },
        "lifecycle": lifecycle,
        "admission": admission,
        "last_sample": state.admission.last_sample().as_deref(),
    }));

    if ready {
        return (StatusCode::OK, payload).into_response();
    }

    let mut response = (StatusCode::SERVICE_UNAVAILABLE, payload).into_response();
    let retry_after = retry_after_hint_seconds(state.admission.interval());
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}
