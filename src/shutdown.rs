//! Cooperative cancellation.
//!
//! One write-once token threaded through the run loop and polled at
//! well-defined checkpoints: the start of each site and the start of
//! each candidate. In-flight network calls are never interrupted; they
//! complete, no further work starts, and accumulated state is flushed
//! before exit.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent; the token never resets.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Trip the token on SIGINT (Ctrl+C) or SIGTERM (container stop).
pub fn listen_for_signals(token: ShutdownToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to register SIGTERM handler");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        token.trigger();
                    }
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT, finishing in-flight work then stopping");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, finishing in-flight work then stopping");
                }
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::info!("Received Ctrl+C, finishing in-flight work then stopping");
        }
        token.trigger();
    });
}
