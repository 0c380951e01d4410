//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (orchestrator.rs):
//!     Config → open pool → migrations → plugins → bind → sampler → serve
//!     STARTING ─────────────────────────────────────────────────→ RUNNING
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger (second one escalates)
//!
//! Shutdown (shutdown.rs):
//!     DRAINING: listener stops accepting, in-flight requests finish
//!         (bounded by the grace period, cut short by a second signal)
//!     close listener → sampler → pool, each with its own timeout
//!     CLOSED
//! ```
//!
//! # Design Decisions
//! - Lifecycle state only moves forward
//! - Resources close in reverse acquisition order
//! - Every close is timeout-bounded once draining begins
//! - A forced shutdown still closes everything and exits non-zero

pub mod orchestrator;
pub mod resources;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use orchestrator::{migrate, Orchestrator, RunningService};
pub use resources::{CloseError, CloseMode, OwnedResource, PoolResource};
pub use shutdown::{DrainOutcome, Shutdown, ShutdownCoordinator, ShutdownReport, ShutdownTimeoutError};
pub use signals::spawn_signal_listener;
pub use state::{Lifecycle, LifecycleState};
