//! Shutdown signal handling
//!
//! `axum::serve(..).with_graceful_shutdown` wants a `()` future, but the
//! service also needs to know which signal stopped it so the device
//! teardown can be logged against its cause. [`ShutdownTrigger`] bridges
//! the two: the serve future waits on it, `main` reads the signal after
//! the server drains.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signal that ended the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl+C
    CtrlC,
    /// SIGTERM (Unix only)
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::CtrlC => f.write_str("Ctrl+C"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Wait for Ctrl+C or, on Unix, SIGTERM and report which one arrived
pub async fn wait_for_signal() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}); only Ctrl+C stops the service", e);
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => ShutdownSignal::CtrlC,
            _ = async {
                match term_signal.as_mut() {
                    Some(sig) => { sig.recv().await; },
                    None => std::future::pending::<()>().await,
                }
            } => ShutdownSignal::Terminate,
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler failed: {}", e);
        }
        ShutdownSignal::CtrlC
    }
}

/// Records the first shutdown cause and wakes every waiter
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    token: CancellationToken,
    cause: Arc<Mutex<Option<ShutdownSignal>>>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `signal` unless a cause is already set, then release waiters
    pub fn trigger(&self, signal: ShutdownSignal) {
        {
            let mut cause = self.cause.lock();
            if cause.is_none() {
                *cause = Some(signal);
            }
        }
        self.token.cancel();
    }

    /// Cause of the shutdown, once triggered
    pub fn signal(&self) -> Option<ShutdownSignal> {
        *self.cause.lock()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// Forward OS signals into this trigger; returns the graceful-shutdown
    /// future for `axum::serve`
    pub fn listen(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let trigger = self.clone();
        async move {
            tokio::select! {
                signal = wait_for_signal() => {
                    info!("Received {}, starting graceful shutdown", signal);
                    trigger.trigger(signal);
                },
                () = trigger.triggered() => {},
            }
        }
    }
}
