//! Applies pending migrations against a [`MigrationStore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::database::{MigrationStore, StoreError};
use crate::migration::source::{scan_dir, Migration};
use crate::migration::MigrationRecord;
use crate::observability::metrics;

/// Error type for migration runs.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read migrations from {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("migration file `{0}` does not match <version>_<name>.sql or V<version>__<name>.sql")]
    InvalidName(String),
    #[error("migration version {version} is defined twice ({first} and {second})")]
    DuplicateVersion {
        version: i64,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("migration ledger unavailable: {0}")]
    Ledger(#[source] StoreError),
    #[error("migration {version} was applied with checksum {recorded} but its file now hashes to {current}")]
    ChecksumMismatch {
        version: i64,
        recorded: String,
        current: String,
    },
    #[error("migration {version} is pending but version {latest} is already applied")]
    OutOfOrder { version: i64, latest: i64 },
    #[error("migration {version} ({name}) failed: {cause}")]
    Failed {
        version: i64,
        name: String,
        #[source]
        cause: StoreError,
        /// Migrations this run applied before the failure. They stay applied.
        applied: Vec<MigrationRecord>,
        /// Pending versions that were never attempted.
        not_attempted: Vec<i64>,
    },
}

impl MigrationError {
    /// The version the run stopped at, when one migration is to blame.
    pub fn failed_version(&self) -> Option<i64> {
        match self {
            MigrationError::Failed { version, .. }
            | MigrationError::ChecksumMismatch { version, .. }
            | MigrationError::OutOfOrder { version, .. }
            | MigrationError::DuplicateVersion { version, .. } => Some(*version),
            _ => None,
        }
    }
}

/// Decide which migrations still need to run.
///
/// Applied versions are checked for checksum drift; a pending version below the
/// newest applied one would make the ledger decrease and is refused.
pub fn plan<'a>(
    available: &'a [Migration],
    applied: &[MigrationRecord],
) -> Result<Vec<&'a Migration>, MigrationError> {
    let recorded: HashMap<i64, &MigrationRecord> =
        applied.iter().map(|r| (r.version, r)).collect();
    let latest = applied.iter().map(|r| r.version).max();

    let mut pending = Vec::new();
    for migration in available {
        match recorded.get(&migration.version) {
            Some(record) if record.checksum != migration.checksum => {
                return Err(MigrationError::ChecksumMismatch {
                    version: migration.version,
                    recorded: record.checksum.clone(),
                    current: migration.checksum.clone(),
                });
            }
            Some(_) => {}
            None => {
                if let Some(latest) = latest.filter(|latest| migration.version < *latest) {
                    return Err(MigrationError::OutOfOrder {
                        version: migration.version,
                        latest,
                    });
                }
                pending.push(migration);
            }
        }
    }

    Ok(pending)
}

/// Brings the backing store's schema up to date.
pub struct MigrationRunner {
    store: Arc<dyn MigrationStore>,
}

impl MigrationRunner {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        Self { store }
    }

    /// Scan `dir` and apply every migration the ledger does not know yet.
    ///
    /// The directory is read on the blocking pool.
    pub async fn run(&self, dir: &Path) -> Result<Vec<MigrationRecord>, MigrationError> {
        let scan_path = dir.to_path_buf();
        let available = tokio::task::spawn_blocking(move || scan_dir(&scan_path))
            .await
            .map_err(|err| MigrationError::Scan {
                path: dir.to_path_buf(),
                source: std::io::Error::other(err),
            })??;
        tracing::debug!(dir = %dir.display(), found = available.len(), "Scanned migrations");
        self.run_migrations(&available).await
    }

    /// Apply the given definitions (already sorted by version) in order.
    ///
    /// Returns the records applied by this call; an up-to-date store yields an
    /// empty list.
    pub async fn run_migrations(
        &self,
        available: &[Migration],
    ) -> Result<Vec<MigrationRecord>, MigrationError> {
        self.store
            .ensure_ledger()
            .await
            .map_err(MigrationError::Ledger)?;
        let ledger = self.store.applied().await.map_err(MigrationError::Ledger)?;

        let pending = plan(available, &ledger)?;
        if pending.is_empty() {
            tracing::info!(applied = ledger.len(), "Schema is up to date");
            return Ok(Vec::new());
        }

        tracing::info!(
            pending = pending.len(),
            already_applied = ledger.len(),
            "Applying migrations"
        );

        let mut applied = Vec::with_capacity(pending.len());
        for (index, migration) in pending.iter().enumerate() {
            match self.store.apply(migration).await {
                Ok(record) => {
                    tracing::info!(
                        version = record.version,
                        name = %record.name,
                        "Migration applied"
                    );
                    metrics::record_migration_applied();
                    applied.push(record);
                }
                Err(cause) => {
                    let not_attempted: Vec<i64> =
                        pending[index + 1..].iter().map(|m| m.version).collect();
                    tracing::error!(
                        version = migration.version,
                        name = %migration.name,
                        error = %cause,
                        applied_this_run = applied.len(),
                        not_attempted = ?not_attempted,
                        "Migration failed; schema left partially migrated"
                    );
                    return Err(MigrationError::Failed {
                        version: migration.version,
                        name: migration.name.clone(),
                        cause,
                        applied,
                        not_attempted,
                    });
                }
            }
        }

        Ok(applied)
    }
}
