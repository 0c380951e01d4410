//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (request ID, trace span)
//!     → inflight.rs (tracked until the response is produced)
//!     → request timeout
//!     → /health, /health/live (always answered)
//!     → admission gate (503 while shedding)
//!     → plugin hooks → plugin route handler
//! ```

pub mod health;
pub mod inflight;
pub mod request;
pub mod server;

pub use inflight::{InFlightGuard, InFlightRequest, InFlightTracker};
pub use request::{request_id, X_REQUEST_ID};
pub use server::{HttpServer, ServerHandle};
