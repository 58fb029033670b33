//! Shutdown signal handling for the probe.
//!
//! SIGTERM and SIGINT set an atomic flag that the sampling loop polls
//! between samples.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Set from the signal handlers. Only atomics are touched there.
static SIGNAL_FLAG: AtomicBool = AtomicBool::new(false);
static LAST_SIGNO: AtomicU32 = AtomicU32::new(0);

/// Signals that stop the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Shutdown state shared between the handler and the sampling loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    last_signal: AtomicU32,
}

impl SignalState {
    /// Create a state with no shutdown pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Request shutdown (can be called from any thread).
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self, signo: u32) {
        self.last_signal.store(signo, Ordering::Relaxed);
        self.request_shutdown();
    }

    /// Most recent signal number, or 0 if none arrived.
    pub fn last_signal(&self) -> u32 {
        self.last_signal.load(Ordering::Relaxed)
    }
}

/// Handle for shutdown signals.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a handler and register SIGTERM and SIGINT on Unix.
    ///
    /// On other platforms only manual shutdown is available.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
        };

        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(handler)
    }

    /// Check if shutdown has been requested by a signal or manually.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        if self.state.shutdown_requested() {
            return true;
        }
        let signo = LAST_SIGNO.load(Ordering::Relaxed);
        if SIGNAL_FLAG.swap(false, Ordering::Relaxed) {
            let kind = if signo == libc::SIGTERM.unsigned_abs() {
                SignalKind::Terminate
            } else {
                SignalKind::Interrupt
            };
            info!(signal = %kind, "Shutdown signal received");
            self.state.record_signal(signo);
            return true;
        }
        false
    }

    /// Manually request shutdown.
    #[cfg(test)]
    pub fn request_shutdown(&self) {
        info!("Manual shutdown requested");
        self.state.request_shutdown();
    }

    /// Shared state for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

#[cfg(unix)]
fn register_unix_handlers() -> std::io::Result<()> {
    use std::os::raw::c_int;

    extern "C" fn shutdown_handler(signo: c_int) {
        LAST_SIGNO.store(signo.unsigned_abs(), Ordering::Relaxed);
        SIGNAL_FLAG.store(true, Ordering::Relaxed);
    }

    for signo in [libc::SIGTERM, libc::SIGINT] {
        // SAFETY: the handler only stores to atomics, which is async-signal-safe.
        let previous = unsafe { libc::signal(signo, shutdown_handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }

    debug!("Unix signal handlers registered");
    Ok(())
}
