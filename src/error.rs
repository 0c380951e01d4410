//! Startup failures and process exit codes.

use thiserror::Error;

use crate::config::source::EnvFileError;
use crate::config::ConfigValidationError;
use crate::database::StoreError;
use crate::migration::MigrationError;
use crate::plugins::{PluginDependencyError, PluginError};

pub const EXIT_OK: u8 = 0;
pub const EXIT_CONFIG: u8 = 1;
pub const EXIT_MIGRATION: u8 = 2;
pub const EXIT_PLUGIN: u8 = 3;
pub const EXIT_FORCED_SHUTDOWN: u8 = 4;
/// Startup failed for a reason outside the categories above (pool, bind).
pub const EXIT_STARTUP: u8 = 5;

/// Anything that stops the service from reaching `Running`.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    #[error(transparent)]
    EnvFile(#[from] EnvFileError),

    #[error("resource pool unavailable: {0}")]
    Pool(#[source] StoreError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    PluginDependency(#[from] PluginDependencyError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Config(_) | StartupError::EnvFile(_) => EXIT_CONFIG,
            StartupError::Migration(_) => EXIT_MIGRATION,
            StartupError::PluginDependency(_) | StartupError::Plugin(_) => EXIT_PLUGIN,
            StartupError::Pool(_) | StartupError::Bind { .. } => EXIT_STARTUP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_failure_category() {
        let missing = StartupError::from(PluginDependencyError::Missing {
            plugin: "users".into(),
            name: "db".into(),
        });
        assert_eq!(missing.exit_code(), EXIT_PLUGIN);

        let migration = StartupError::from(MigrationError::OutOfOrder {
            version: 3,
            latest: 4,
        });
        assert_eq!(migration.exit_code(), EXIT_MIGRATION);

        let pool = StartupError::Pool(StoreError::Closed);
        assert_eq!(pool.exit_code(), EXIT_STARTUP);
    }
}
