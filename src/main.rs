//! `service-bootstrap` command line.
//!
//! ```text
//! service-bootstrap start   [--env-file PATH]             full lifecycle
//! service-bootstrap migrate [--env-file PATH] [--dir PATH] migrations only
//! service-bootstrap health  [--url URL]                    probe a running instance
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use service_bootstrap::config::{
    load_config, DatabaseConfig, EnvFile, Layered, ObservabilityConfig, ProcessEnv, ServiceConfig,
};
use service_bootstrap::database::{PgDatabase, StoreError};
use service_bootstrap::error::{StartupError, EXIT_FORCED_SHUTDOWN};
use service_bootstrap::lifecycle::{migrate, Orchestrator};
use service_bootstrap::migration::MigrationError;
use service_bootstrap::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "service-bootstrap")]
#[command(about = "Bootstrap, serve and shut down the service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate config, migrate, register plugins and serve until signalled
    Start {
        /// TOML file of KEY = value pairs layered under the process environment
        #[arg(long)]
        env_file: Option<PathBuf>,
    },
    /// Apply pending migrations and exit
    Migrate {
        #[arg(long)]
        env_file: Option<PathBuf>,
        /// Migrations directory (defaults to MIGRATIONS_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Query the readiness endpoint of a running instance
    Health {
        #[arg(long, default_value = "http://127.0.0.1:3000/health")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { env_file } => start(env_file.as_deref()).await,
        Commands::Migrate { env_file, dir } => run_migrations(env_file.as_deref(), dir).await,
        Commands::Health { url } => health(&url).await,
    }
}

async fn connect(config: DatabaseConfig) -> Result<PgDatabase, StoreError> {
    PgDatabase::connect(&config).await
}

async fn start(env_file: Option<&Path>) -> ExitCode {
    let config = match prepare(env_file) {
        Ok(config) => config,
        Err(code) => return code,
    };

    if let Some(address) = config.observability.metrics_address {
        if let Err(err) = metrics::init_metrics(address) {
            tracing::error!(error = %err, address = %address, "Failed to start metrics exporter");
        }
    }

    match Orchestrator::new(config).run(connect).await {
        Ok(report) => match report.into_result() {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    abandoned = err.abandoned.len(),
                    close_failures = err.close_failures.len(),
                    "Shutdown forced"
                );
                ExitCode::from(EXIT_FORCED_SHUTDOWN)
            }
        },
        Err(err) => exit_with(&err),
    }
}

async fn run_migrations(env_file: Option<&Path>, dir: Option<PathBuf>) -> ExitCode {
    let config = match prepare(env_file) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let dir = dir.unwrap_or_else(|| config.migrations.dir.clone());

    match migrate(&config, &dir, connect).await {
        Ok(applied) => {
            let versions: Vec<i64> = applied.iter().map(|r| r.version).collect();
            tracing::info!(applied = applied.len(), versions = ?versions, "Migrations complete");
            ExitCode::SUCCESS
        }
        Err(err) => exit_with(&err),
    }
}

async fn health(url: &str) -> ExitCode {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match client.get(url).send().await {
        Ok(res) => {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => println!(
                    "{}",
                    serde_json::to_string_pretty(&json).unwrap_or(body)
                ),
                Err(_) => println!("{body}"),
            }
            if status.is_success() {
                ExitCode::SUCCESS
            } else {
                eprintln!("Error: {url} returned {status}");
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("Error: {url} unreachable: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Load config and install logging. On failure, logs with defaults and
/// returns the exit code to use.
fn prepare(env_file: Option<&Path>) -> Result<ServiceConfig, ExitCode> {
    match load(env_file) {
        Ok(config) => {
            if let Err(err) = logging::init_logging(&config.observability) {
                eprintln!("Warning: logging not initialised: {err}");
            }
            Ok(config)
        }
        Err(err) => {
            let _ = logging::init_logging(&ObservabilityConfig::default());
            Err(exit_with(&err))
        }
    }
}

fn load(env_file: Option<&Path>) -> Result<ServiceConfig, StartupError> {
    let file = match env_file {
        Some(path) => EnvFile::from_path(path)?,
        None => EnvFile::default(),
    };
    Ok(load_config(&Layered::new(ProcessEnv, file))?)
}

fn exit_with(err: &StartupError) -> ExitCode {
    let code = err.exit_code();
    match err {
        StartupError::Config(config) => {
            for problem in &config.problems {
                tracing::error!(key = problem.key(), problem = %problem, "Invalid configuration");
            }
            tracing::error!(problems = config.problems.len(), "Configuration rejected");
        }
        StartupError::Migration(migration) => {
            let failed_version = migration.failed_version();
            match migration {
                MigrationError::Failed {
                    applied,
                    not_attempted,
                    ..
                } => tracing::error!(
                    error = %err,
                    failed_version = ?failed_version,
                    applied_this_run = applied.len(),
                    not_attempted = ?not_attempted,
                    "Migration failed"
                ),
                _ => tracing::error!(error = %err, failed_version = ?failed_version, "Migration failed"),
            }
        }
        _ => tracing::error!(error = %err, exit_code = code, "Startup aborted"),
    }
    ExitCode::from(code)
}
