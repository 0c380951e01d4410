//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT)
//! - Translate each signal into a [`Shutdown::trigger`]
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The first signal starts draining; a second forces shutdown

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

#[cfg(unix)]
struct TerminateSignal(Option<tokio::signal::unix::Signal>);

#[cfg(unix)]
impl TerminateSignal {
    fn new() -> Self {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(stream) => Self(Some(stream)),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to install SIGTERM handler");
                Self(None)
            }
        }
    }

    async fn recv(&mut self) {
        match self.0.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(not(unix))]
struct TerminateSignal;

#[cfg(not(unix))]
impl TerminateSignal {
    fn new() -> Self {
        Self
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

/// Listen for SIGINT/SIGTERM for the rest of the process.
///
/// Exits after the second signal; nothing more can be escalated.
pub fn spawn_signal_listener(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut terminate = TerminateSignal::new();

        loop {
            let signal = tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        tracing::error!(error = %err, "Failed to listen for SIGINT");
                        return;
                    }
                    "SIGINT"
                }
                _ = terminate.recv() => "SIGTERM",
            };

            match shutdown.trigger() {
                1 => tracing::info!(signal, "Termination signal received; draining"),
                n => {
                    tracing::warn!(signal, count = n, "Repeated termination signal; forcing shutdown");
                    return;
                }
            }
        }
    })
}
