//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! process environment / env file / in-memory map
//!     → source.rs (EnvironmentSource lookups)
//!     → loader.rs (typed parse, every problem collected)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → passed by reference or Arc to every component
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload path
//! - Every missing or malformed key is reported in one error
//! - `DATABASE_URL` supersedes the individual `POSTGRES_*` components
//! - Validation separates parsing from semantic checks

pub mod loader;
pub mod schema;
pub mod source;
pub mod validation;

pub use loader::{load_config, ConfigProblem, ConfigValidationError};
pub use schema::{
    AdmissionConfig, DatabaseConfig, ListenerConfig, LogFormat, MigrationConfig,
    ObservabilityConfig, ServiceConfig, ShutdownConfig,
};
pub use source::{EnvFile, EnvironmentSource, Layered, ProcessEnv};
