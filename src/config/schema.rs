//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! Values are produced by [`crate::config::loader`] from environment keys and
//! are never mutated afterwards.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use url::Url;

/// Root configuration for the service.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address, request timeout).
    pub listener: ListenerConfig,

    /// Backing store connection settings.
    pub database: DatabaseConfig,

    /// Schema migration settings.
    pub migrations: MigrationConfig,

    /// Load shedding thresholds.
    pub admission: AdmissionConfig,

    /// Drain and close timing.
    pub shutdown: ShutdownConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerConfig {
    /// Host or IP to bind (`HOST`).
    pub host: String,

    /// TCP port to bind (`PORT`). Must be non-zero when loaded from the
    /// environment; a hand-built config may use zero for an ephemeral port.
    pub port: u16,

    /// Per-request timeout in seconds (`REQUEST_TIMEOUT_SECS`).
    pub request_timeout_secs: u64,
}

impl ListenerConfig {
    /// Address string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    /// Connection URL, either taken from `DATABASE_URL` or composed from the
    /// `POSTGRES_*` components.
    #[serde(serialize_with = "serialize_redacted")]
    pub url: Url,

    /// True when `DATABASE_URL` superseded the component variables.
    pub from_override: bool,

    /// Maximum pooled connections.
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection.
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    /// The connection URL with any password masked, for logs.
    pub fn redacted_url(&self) -> String {
        redact(&self.url).to_string()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

fn serialize_redacted<S>(url: &Url, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(redact(url).as_str())
}

fn redact(url: &Url) -> Url {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some("****"));
    }
    url
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("postgres://postgres@localhost:5432/postgres")
                .expect("static database URL is valid"),
            from_override: false,
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Schema migration configuration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationConfig {
    /// Directory holding `<version>_<name>.sql` files (`MIGRATIONS_DIR`).
    pub dir: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("migrations"),
        }
    }
}

/// Admission control thresholds.
///
/// A threshold of zero disables that signal.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionConfig {
    /// Run the sampler at all (`ADMISSION_ENABLED`).
    pub enabled: bool,

    /// Sampling interval in milliseconds.
    pub sample_interval_ms: u64,

    /// Event-loop delay above which requests are shed.
    pub max_event_loop_delay_ms: u64,

    /// Heap (resident memory) above which requests are shed.
    pub max_heap_bytes: u64,

    /// Shed while the connection pool has no idle connection left.
    pub shed_on_pool_saturation: bool,

    /// Recovery threshold as a fraction of each high threshold, in (0, 1).
    pub recovery_ratio: f64,
}

impl AdmissionConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn max_event_loop_delay(&self) -> Option<Duration> {
        (self.max_event_loop_delay_ms > 0)
            .then(|| Duration::from_millis(self.max_event_loop_delay_ms))
    }

    pub fn max_heap_bytes(&self) -> Option<u64> {
        (self.max_heap_bytes > 0).then_some(self.max_heap_bytes)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_ms: 2_000,
            max_event_loop_delay_ms: 1_000,
            max_heap_bytes: 0,
            shed_on_pool_saturation: true,
            recovery_ratio: 0.8,
        }
    }
}

/// Shutdown timing.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownConfig {
    /// Seconds in-flight requests get to finish once draining starts.
    pub grace_period_secs: u64,

    /// Upper bound for each individual resource close.
    pub close_timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 10,
            close_timeout_secs: 5,
        }
    }
}

/// Log output format (`LOG_FORMAT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Prometheus exporter bind address; disabled when unset.
    pub metrics_address: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            metrics_address: None,
        }
    }
}
