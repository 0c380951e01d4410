//! Schema migration subsystem.
//!
//! # Data Flow
//! ```text
//! migrations dir (<version>_<name>.sql)
//!     → source.rs (scan, parse names, sha256 checksums, sort)
//!     → runner.rs (compare with ledger, plan, apply in order)
//!     → MigrationStore (one transaction per migration)
//! ```
//!
//! # Design Decisions
//! - Runs strictly before any request is served
//! - First failure stops the run; earlier migrations stay applied
//! - Checksum drift and out-of-order versions fail before anything is applied

pub mod runner;
pub mod source;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use runner::{MigrationError, MigrationRunner};
pub use source::{scan_dir, Migration};

/// One row of the migration ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}
