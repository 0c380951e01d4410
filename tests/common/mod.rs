//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::future::{ready, Ready};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use service_bootstrap::admission::{HealthProbe, HealthSample};
use service_bootstrap::config::{
    AdmissionConfig, DatabaseConfig, ListenerConfig, ServiceConfig, ShutdownConfig,
};
use service_bootstrap::database::{MigrationStore, PoolUsage, ResourcePool, StoreError};
use service_bootstrap::migration::{Migration, MigrationRecord};

/// In-memory backing store with failure injection.
///
/// Clones share state, so a test keeps one handle while the orchestrator owns
/// another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<StoreState>,
}

#[derive(Default)]
struct StoreState {
    ledger: Mutex<BTreeMap<i64, MigrationRecord>>,
    fail_versions: Mutex<HashSet<i64>>,
    attempted: Mutex<Vec<i64>>,
    unhealthy: AtomicBool,
    saturated: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `connect` function handing out a clone of this store.
    pub fn connector(
        &self,
    ) -> impl FnOnce(DatabaseConfig) -> Ready<Result<MemoryStore, StoreError>> {
        let store = self.clone();
        move |_config| ready(Ok(store))
    }

    /// Make `apply` fail for `version`.
    pub fn fail_on(&self, version: i64) {
        self.state.fail_versions.lock().unwrap().insert(version);
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.state.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    pub fn set_saturated(&self, saturated: bool) {
        self.state.saturated.store(saturated, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    pub fn applied_versions(&self) -> Vec<i64> {
        self.state.ledger.lock().unwrap().keys().copied().collect()
    }

    /// Every version `apply` was called with, in call order.
    pub fn attempted(&self) -> Vec<i64> {
        self.state.attempted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourcePool for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        if self.state.unhealthy.load(Ordering::SeqCst) {
            return Err(StoreError::other("connection refused"));
        }
        Ok(())
    }

    fn usage(&self) -> PoolUsage {
        if self.state.saturated.load(Ordering::SeqCst) {
            PoolUsage { size: 4, idle: 0, max: 4 }
        } else {
            PoolUsage { size: 1, idle: 1, max: 4 }
        }
    }

    async fn close(&self) {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn ensure_ledger(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn applied(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        Ok(self.state.ledger.lock().unwrap().values().cloned().collect())
    }

    async fn apply(&self, migration: &Migration) -> Result<MigrationRecord, StoreError> {
        self.state.attempted.lock().unwrap().push(migration.version);
        if self.state.fail_versions.lock().unwrap().contains(&migration.version) {
            return Err(StoreError::other(format!(
                "syntax error in {}",
                migration.name
            )));
        }
        let record = MigrationRecord {
            version: migration.version,
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            applied_at: Utc::now(),
        };
        self.state
            .ledger
            .lock()
            .unwrap()
            .insert(record.version, record.clone());
        Ok(record)
    }
}

/// Probe whose readings the test controls.
#[derive(Default)]
pub struct ScriptedProbe {
    overloaded: AtomicBool,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_overloaded(&self, overloaded: bool) {
        self.overloaded.store(overloaded, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn sample(&self) -> HealthSample {
        let delay = if self.overloaded.load(Ordering::SeqCst) {
            Duration::from_millis(500)
        } else {
            Duration::from_millis(1)
        };
        HealthSample::new(delay, None, false)
    }
}

/// Write `files` (name, sql) into `dir`.
pub fn write_migrations(dir: &Path, files: &[(&str, &str)]) {
    for (name, sql) in files {
        fs::write(dir.join(name), sql).unwrap();
    }
}

/// Five numbered migrations creating one table each.
pub fn five_migrations(dir: &Path) {
    write_migrations(
        dir,
        &[
            ("0001_users.sql", "CREATE TABLE users (id BIGINT);"),
            ("0002_orders.sql", "CREATE TABLE orders (id BIGINT);"),
            ("0003_payments.sql", "CREATE TABLE payments (id BIGINT);"),
            ("0004_refunds.sql", "CREATE TABLE refunds (id BIGINT);"),
            ("0005_audit.sql", "CREATE TABLE audit (id BIGINT);"),
        ],
    );
}

/// Config bound to an ephemeral local port with fast admission sampling.
pub fn test_config(migrations_dir: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener = ListenerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
    };
    config.migrations.dir = migrations_dir.to_path_buf();
    config.admission = AdmissionConfig {
        enabled: true,
        sample_interval_ms: 50,
        max_event_loop_delay_ms: 200,
        max_heap_bytes: 0,
        shed_on_pool_saturation: false,
        recovery_ratio: 0.5,
    };
    config.shutdown = ShutdownConfig {
        grace_period_secs: 5,
        close_timeout_secs: 1,
    };
    config
}

/// Poll `check` every 10ms until it holds or `within` elapses.
pub async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
