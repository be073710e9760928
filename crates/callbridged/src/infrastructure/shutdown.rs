//! Process-wide shutdown flag.
//!
//! `main.rs` sets it from the Ctrl+C / SIGTERM handler.  The accept loop and
//! the active session both wait on it inside their `select!`, so a shutdown
//! request interrupts a blocked `accept` or read immediately instead of
//! waiting for the next poll tick.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A one-way latch: once triggered it stays triggered.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once [`ShutdownSignal::trigger`] has been called.
    ///
    /// Returns immediately if it already was.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking the flag so a trigger between
            // the check and the await is not missed.
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
