//! SIGINT/SIGTERM during a submission
//!
//! The first interrupt asks the submitter to stop between jobs; it then
//! destroys the cluster it allocated and discards the open transaction.
//! A second interrupt exits at once and leaves the queue manager to drop
//! the uncommitted work with the connection.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Exit status after a forced second interrupt.
pub const EXIT_CODE_INTERRUPTED: i32 = 1;

/// What an incoming interrupt means, by how many came before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    StopSubmission,
    ImmediateExit,
    Ignore,
}

/// Interrupt counter shared between the handler and the submit loop.
#[derive(Debug, Default)]
pub struct SignalState {
    received: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.received.load(Ordering::SeqCst) > 0
    }

    /// Count one interrupt.
    pub fn handle_signal(&self) -> SignalAction {
        let before = self
            .received
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(1)))
            .unwrap_or(u8::MAX);
        match before {
            0 => SignalAction::StopSubmission,
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Installs the process-wide handler feeding a [`SignalState`].
#[derive(Default)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Call once at startup; `ctrlc` allows a single handler per process.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = self.state();
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::StopSubmission => {
                tracing::warn!("interrupt received, stopping after the current job");
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nSecond interrupt, exiting without cleanup");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}
