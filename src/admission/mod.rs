//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! sampler task (every ADMISSION_SAMPLE_INTERVAL_MS)
//!     → HealthProbe::sample (timer lateness, resident memory, pool usage)
//!     → AdmissionController::observe (thresholds + hysteresis)
//!     → AdmissionState (atomic)
//!
//! request → admission_middleware → admit()
//!     → Accepting: handler
//!     → Shedding: 503 + Retry-After
//! ```
//!
//! # Design Decisions
//! - Only the sampler writes the state; requests only read it
//! - Recovery needs a full interval below a lower threshold
//! - In-flight requests are never interrupted; only entry is gated
//! - Readiness and liveness endpoints sit outside the gate

pub mod controller;
pub mod middleware;
pub mod sample;

pub use controller::{AdmissionController, AdmissionState, Pressure, SamplerHandle, Thresholds};
pub use middleware::{admission_middleware, retry_after_hint_seconds, AdmissionRejection};
pub use sample::{HealthProbe, HealthSample, ProcessProbe};
