//! Backing store seam.
//!
//! # Data Flow
//! ```text
//! Orchestrator
//!     → connect (postgres.rs, sqlx pool)
//!     → MigrationStore (ledger read, per-migration transaction)
//!     → ResourcePool (health check, usage for admission, close on shutdown)
//! ```
//!
//! # Design Decisions
//! - The core never checks connections in or out; handlers use the pool directly
//! - Only open, health-check, usage and close are part of the contract
//! - Traits keep the orchestrator testable against an in-memory store

pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::migration::{Migration, MigrationRecord};

pub use postgres::PgDatabase;

/// Error type for backing store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("resource pool is closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn other(message: impl Into<String>) -> Self {
        StoreError::Other(message.into())
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolUsage {
    /// Open connections.
    pub size: u32,
    /// Open connections not checked out.
    pub idle: u32,
    /// Configured ceiling.
    pub max: u32,
}

impl PoolUsage {
    /// True when every allowed connection is open and checked out.
    pub fn is_saturated(&self) -> bool {
        self.max > 0 && self.size >= self.max && self.idle == 0
    }
}

/// A connection pool whose lifecycle the core owns.
#[async_trait]
pub trait ResourcePool: Send + Sync {
    /// Short name used in logs and shutdown reports.
    fn name(&self) -> &str;

    async fn health_check(&self) -> Result<(), StoreError>;

    fn usage(&self) -> PoolUsage;

    /// Close the pool, waiting for checked-out connections to return.
    async fn close(&self);
}

/// Persistence for the migration ledger.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Create the ledger if it does not exist yet.
    async fn ensure_ledger(&self) -> Result<(), StoreError>;

    /// Applied migrations ordered by version.
    async fn applied(&self) -> Result<Vec<MigrationRecord>, StoreError>;

    /// Run one migration and record it, atomically where the store allows.
    async fn apply(&self, migration: &Migration) -> Result<MigrationRecord, StoreError>;
}
