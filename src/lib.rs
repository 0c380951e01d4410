//! Service bootstrap and lifecycle orchestration.
//!
//! # Architecture Overview
//!
//! ```text
//!   environment ──▶ config ──▶ Orchestrator
//!                                 │
//!                                 ├─▶ database (open pool, health check)
//!                                 ├─▶ migration (ledger, pending, apply in order)
//!                                 ├─▶ plugins (topological order, scoped registration)
//!                                 ├─▶ http (listener, request ids, in-flight tracking)
//!                                 └─▶ admission (sampler ──▶ accept / shed)
//!
//!   SIGINT/SIGTERM ──▶ lifecycle::Shutdown ──▶ ShutdownCoordinator
//!                         drain in-flight ─▶ close listener ─▶ sampler ─▶ pool
//! ```

pub mod admission;
pub mod config;
pub mod database;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod migration;
pub mod observability;
pub mod plugins;

pub use config::{load_config, ServiceConfig};
pub use error::StartupError;
pub use lifecycle::{Orchestrator, RunningService, Shutdown};
pub use plugins::{PluginDescriptor, RouteSchema};
