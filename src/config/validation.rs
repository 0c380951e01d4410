//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (the loader handles parsing)
//! - Validate value ranges (port and intervals > 0, ratios in range, pool size)
//! - Check the log level is one the subscriber understands
//!
//! # Design Decisions
//! - Returns all validation problems, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ConfigProblem>>
//! - Runs before config is accepted into the system

use crate::config::loader::ConfigProblem;
use crate::config::schema::{
    AdmissionConfig, DatabaseConfig, ListenerConfig, MigrationConfig, ObservabilityConfig,
    ServiceConfig, ShutdownConfig,
};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Check cross-field and range constraints of a parsed configuration.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ConfigProblem>> {
    let mut problems = validate_sections(
        &config.listener,
        &config.migrations,
        &config.admission,
        &config.shutdown,
        &config.observability,
    );
    problems.extend(validate_database(&config.database));

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

/// Range checks for every section except the database.
///
/// Kept apart so the loader can still run them when the database keys
/// themselves are missing.
pub fn validate_sections(
    listener: &ListenerConfig,
    migrations: &MigrationConfig,
    admission: &AdmissionConfig,
    shutdown: &ShutdownConfig,
    observability: &ObservabilityConfig,
) -> Vec<ConfigProblem> {
    let mut problems = Vec::new();

    if listener.port == 0 {
        problems.push(invalid("PORT", "must be greater than zero"));
    }
    if listener.request_timeout_secs == 0 {
        problems.push(invalid("REQUEST_TIMEOUT_SECS", "must be greater than zero"));
    }

    if migrations.dir.as_os_str().is_empty() {
        problems.push(invalid("MIGRATIONS_DIR", "must not be empty"));
    }

    if admission.sample_interval_ms == 0 {
        problems.push(invalid(
            "ADMISSION_SAMPLE_INTERVAL_MS",
            "must be greater than zero",
        ));
    }
    if !(admission.recovery_ratio > 0.0 && admission.recovery_ratio < 1.0) {
        problems.push(invalid(
            "ADMISSION_RECOVERY_RATIO",
            &format!(
                "{} is outside (0, 1); recovery must sit strictly below the shed threshold",
                admission.recovery_ratio
            ),
        ));
    }

    if shutdown.close_timeout_secs == 0 {
        problems.push(invalid(
            "SHUTDOWN_CLOSE_TIMEOUT_SECS",
            "must be greater than zero",
        ));
    }

    if !LOG_LEVELS.contains(&observability.log_level.as_str()) {
        problems.push(invalid(
            "LOG_LEVEL",
            &format!(
                "`{}` is not one of {}",
                observability.log_level,
                LOG_LEVELS.join(", ")
            ),
        ));
    }

    problems
}

pub fn validate_database(database: &DatabaseConfig) -> Vec<ConfigProblem> {
    let mut problems = Vec::new();
    if database.max_connections == 0 {
        problems.push(invalid("DATABASE_MAX_CONNECTIONS", "must be greater than zero"));
    }
    problems
}

fn invalid(key: &'static str, reason: &str) -> ConfigProblem {
    ConfigProblem::Invalid {
        key,
        reason: reason.to_string(),
    }
}
