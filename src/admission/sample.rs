//! Process health signals.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::time::Instant;

use crate::database::ResourcePool;

/// One reading of the signals admission decisions are based on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSample {
    pub taken_at: DateTime<Utc>,
    /// How late a short timer fired: a proxy for runtime starvation.
    #[serde(rename = "event_loop_delay_ms", serialize_with = "as_millis")]
    pub event_loop_delay: Duration,
    /// Resident memory, when the platform reports it.
    pub heap_used_bytes: Option<u64>,
    pub pool_saturated: bool,
}

impl HealthSample {
    pub fn new(event_loop_delay: Duration, heap_used_bytes: Option<u64>, pool_saturated: bool) -> Self {
        Self {
            taken_at: Utc::now(),
            event_loop_delay,
            heap_used_bytes,
            pool_saturated,
        }
    }
}

fn as_millis<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(delay.as_secs_f64() * 1000.0)
}

/// Source of [`HealthSample`]s for the sampler task.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn sample(&self) -> HealthSample;
}

const TIMER_PROBE: Duration = Duration::from_millis(10);
const PAGE_SIZE: u64 = 4096;

/// Samples the running process: timer lateness, resident memory, pool usage.
pub struct ProcessProbe {
    pool: Option<Arc<dyn ResourcePool>>,
}

impl ProcessProbe {
    pub fn new(pool: Option<Arc<dyn ResourcePool>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for ProcessProbe {
    async fn sample(&self) -> HealthSample {
        let started = Instant::now();
        tokio::time::sleep(TIMER_PROBE).await;
        let event_loop_delay = started.elapsed().saturating_sub(TIMER_PROBE);

        let pool_saturated = self
            .pool
            .as_ref()
            .is_some_and(|pool| pool.usage().is_saturated());

        HealthSample::new(event_loop_delay, resident_bytes().await, pool_saturated)
    }
}

/// Resident set size from `/proc/self/statm`; `None` where unavailable.
async fn resident_bytes() -> Option<u64> {
    let statm = tokio::fs::read_to_string("/proc/self/statm").await.ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * PAGE_SIZE)
}
