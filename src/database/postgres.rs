//! Postgres pool backed by sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::database::{MigrationStore, PoolUsage, ResourcePool, StoreError};
use crate::migration::{Migration, MigrationRecord};

const LEDGER_DDL: &str = "\
CREATE TABLE IF NOT EXISTS schema_migrations (
    version BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

/// Shared Postgres connection pool.
///
/// Cloning is cheap; every clone refers to the same pool.
#[derive(Clone, Debug)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Open the pool and establish the first connection.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(config.url.as_str())
            .await?;

        tracing::info!(
            url = %config.redacted_url(),
            max_connections = config.max_connections,
            "Database pool opened"
        );

        Ok(Self { pool })
    }

    /// The underlying sqlx pool, for handlers registered by plugins.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResourcePool for PgDatabase {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.pool.is_closed() {
            return Err(StoreError::Closed);
        }
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn usage(&self) -> PoolUsage {
        PoolUsage {
            size: self.pool.size(),
            idle: u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX),
            max: self.pool.options().get_max_connections(),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MigrationStore for PgDatabase {
    async fn ensure_ledger(&self) -> Result<(), StoreError> {
        sqlx::query(LEDGER_DDL).execute(&self.pool).await?;
        Ok(())
    }

    async fn applied(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        let rows: Vec<(i64, String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT version, name, checksum, applied_at FROM schema_migrations ORDER BY version",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(version, name, checksum, applied_at)| MigrationRecord {
                version,
                name,
                checksum,
                applied_at,
            })
            .collect())
    }

    async fn apply(&self, migration: &Migration) -> Result<MigrationRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&migration.sql)).await?;

        let (applied_at,): (DateTime<Utc>,) = sqlx::query_as(
            "INSERT INTO schema_migrations (version, name, checksum) VALUES ($1, $2, $3) \
             RETURNING applied_at",
        )
        .bind(migration.version)
        .bind(&migration.name)
        .bind(&migration.checksum)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(MigrationRecord {
            version: migration.version,
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            applied_at,
        })
    }
}
