//! Shared graceful-shutdown signal for the Worker, Scheduler, and
//! Progress Publisher flush loop: an atomic flag plus a notify rather than
//! a broadcast channel, since every loop here only needs to observe "stop",
//! never to exchange a reason.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { requested: AtomicBool::new(false), notify: Notify::new() })
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once `request` has been called. Safe to await repeatedly
    /// and from multiple loops concurrently.
    pub async fn wait(&self) {
        if self.is_requested() {
            return;
        }
        self.notify.notified().await;
    }
}
