//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT request shutdown; SIGHUP requests an immediate
//! counter report. Handlers only set atomic flags (the async-signal-safe
//! subset), which a small poll thread folds into the shared state the
//! main loop reads.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Signal types the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM or SIGINT - Graceful termination request.
    Terminate,
    /// SIGHUP - Report the counter now.
    Hangup,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM/SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Shared state between the signal poll thread and the main loop.
///
/// All fields use atomic operations for thread-safe access.
#[derive(Debug, Default)]
pub struct SignalState {
    /// Set when a shutdown signal is received.
    shutdown_requested: AtomicBool,
    /// Set when a report signal is received.
    report_requested: AtomicBool,
    /// Count of signals received (for diagnostics).
    signal_count: AtomicU32,
}

impl SignalState {
    /// Create a new signal state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Check if a report has been requested (and clear the flag).
    #[inline]
    pub fn take_report_request(&self) -> bool {
        self.report_requested.swap(false, Ordering::Relaxed)
    }

    /// Request shutdown (can be called from any thread).
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    /// Request a counter report (can be called from any thread).
    pub fn request_report(&self) {
        self.report_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self, kind: SignalKind) {
        debug!(signal = %kind, "signal recorded");
        self.signal_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

/// Handle for signal management.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a new signal handler and register signal handlers.
    ///
    /// On Unix this registers handlers for SIGTERM, SIGINT, and SIGHUP.
    /// Elsewhere only manual shutdown requests are supported.
    pub fn new() -> std::io::Result<Self> {
        let state = Arc::new(SignalState::new());
        let handler = Self {
            state: Arc::clone(&state),
        };

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    /// Register Unix signal handlers.
    #[cfg(unix)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        // Handlers must be async-signal-safe, so they only touch these
        // static flags; a poll thread folds them into the shared state.
        static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
        static REPORT_FLAG: AtomicBool = AtomicBool::new(false);

        let state = Arc::clone(&self.state);

        std::thread::spawn(move || loop {
            if SHUTDOWN_FLAG.swap(false, Ordering::Relaxed) {
                info!("shutdown signal received");
                state.record_signal(SignalKind::Terminate);
                state.request_shutdown();
            }
            if REPORT_FLAG.swap(false, Ordering::Relaxed) {
                info!("report signal received");
                state.record_signal(SignalKind::Hangup);
                state.request_report();
            }
            if state.shutdown_requested() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        });

        extern "C" fn shutdown_handler(_: c_int) {
            SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn report_handler(_: c_int) {
            REPORT_FLAG.store(true, Ordering::Relaxed);
        }

        // SAFETY: installing handlers that only store to static atomics.
        unsafe {
            libc::signal(libc::SIGTERM, shutdown_handler as libc::sighandler_t);
            libc::signal(libc::SIGINT, shutdown_handler as libc::sighandler_t);
            libc::signal(libc::SIGHUP, report_handler as libc::sighandler_t);
        }

        debug!("unix signal handlers registered");
        Ok(())
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Check if a report has been requested (clears the flag).
    #[inline]
    pub fn take_report_request(&self) -> bool {
        self.state.take_report_request()
    }

    /// The underlying shared state.
    pub fn state(&self) -> &Arc<SignalState> {
        &self.state
    }
}
