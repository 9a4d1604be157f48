//! Handle for a running tick delivery task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Stops tick delivery when closed or dropped.
pub struct TickSubscription {
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TickSubscription {
    pub(crate) fn new(shutdown: watch::Sender<bool>, handle: JoinHandle<()>) -> Self {
        Self {
            shutdown,
            handle: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop delivery. No new batch starts after this returns. Safe to call twice.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        debug!("Tick subscription closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for TickSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
