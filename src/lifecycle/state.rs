//! Process lifecycle state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Where the process is in its life. Only ever moves forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Closed = 3,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Closed => "closed",
        }
    }
}

/// Shared, observable [`LifecycleState`] cell.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Starting);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move to `next` if it lies ahead of the current state.
    ///
    /// Returns `false` (and changes nothing) for a backward or repeated
    /// transition.
    pub fn advance(&self, next: LifecycleState) -> bool {
        let advanced = self.tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });
        if advanced {
            tracing::debug!(state = next.as_str(), "Lifecycle advanced");
        }
        advanced
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Resolve once the state has reached `target` or gone past it.
    pub async fn reached(&self, target: LifecycleState) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.current(), LifecycleState::Starting);

        assert!(lifecycle.advance(LifecycleState::Running));
        assert!(lifecycle.advance(LifecycleState::Draining));
        assert!(!lifecycle.advance(LifecycleState::Running));
        assert!(!lifecycle.advance(LifecycleState::Draining));
        assert_eq!(lifecycle.current(), LifecycleState::Draining);

        assert!(lifecycle.advance(LifecycleState::Closed));
        assert!(!lifecycle.advance(LifecycleState::Starting));
    }

    #[test]
    fn states_may_be_skipped() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.advance(LifecycleState::Closed));
        assert_eq!(lifecycle.current(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn reached_resolves_for_later_states() {
        let lifecycle = Lifecycle::new();
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.reached(LifecycleState::Draining).await })
        };
        lifecycle.advance(LifecycleState::Closed);
        waiter.await.unwrap();
    }
}
