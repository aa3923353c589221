//! Shutdown coordination for a synchronization session.
//!
//! Once leaving starts, inbound events are no longer applied and no new outbound pass
//! begins; the leave sequence then removes the participant's records and marks the
//! session closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    /// Set when leaving starts: no more inbound applies or outbound ticks
    leaving: Arc<AtomicBool>,
    /// Set when the leave sequence finished cleaning up the store
    closed: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leaving(&self) -> bool {
        self.leaving.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Starts leaving. Returns `false` if leaving had already started.
    pub fn begin_leave(&self) -> bool {
        let first = !self.leaving.swap(true, Ordering::AcqRel);
        if first {
            info!("🛑 Leaving session - inbound and outbound sync stopped");
        }
        first
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        info!("✅ Session closed - owned records removed");
    }
}
