//! Resources the process owns and must close on the way out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::database::ResourcePool;

/// How a close should treat work still in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Let in-progress work finish.
    Graceful,
    /// Cut in-progress work off.
    Forced,
}

/// A resource that did not close cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseError {
    #[error("{resource} did not close within {timeout:?}")]
    TimedOut { resource: String, timeout: Duration },
    #[error("{resource} was abandoned by a forced shutdown while closing")]
    Interrupted { resource: String },
    #[error("{resource} failed to close: {message}")]
    Failed { resource: String, message: String },
}

impl CloseError {
    pub fn failed(resource: &str, message: impl fmt::Display) -> Self {
        CloseError::Failed {
            resource: resource.to_string(),
            message: message.to_string(),
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            CloseError::TimedOut { resource, .. }
            | CloseError::Interrupted { resource }
            | CloseError::Failed { resource, .. } => resource,
        }
    }
}

/// Something acquired during startup and released during shutdown.
///
/// The shutdown sequence calls [`begin_drain`](Self::begin_drain) on every
/// resource as draining starts, then [`close`](Self::close) on each in
/// reverse acquisition order. A close that overruns its timeout is
/// abandoned and followed by [`abort`](Self::abort).
#[async_trait]
pub trait OwnedResource: Send {
    fn name(&self) -> &str;

    /// Stop taking on new work. Must not block.
    fn begin_drain(&mut self) {}

    async fn close(&mut self, mode: CloseMode) -> Result<(), CloseError>;

    /// Release whatever is left without waiting.
    fn abort(&mut self) {}
}

/// The backing store pool, closed last.
pub struct PoolResource {
    pool: Arc<dyn ResourcePool>,
}

impl PoolResource {
    pub fn new(pool: Arc<dyn ResourcePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OwnedResource for PoolResource {
    fn name(&self) -> &str {
        self.pool.name()
    }

    async fn close(&mut self, _mode: CloseMode) -> Result<(), CloseError> {
        self.pool.close().await;
        Ok(())
    }
}
