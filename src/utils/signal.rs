//! Cooperative stop signal shared by the pipeline stages.
//!
//! A cloneable latch: raising any clone wakes every waiter, and the
//! signal stays raised forever after. Used for abort (one signal
//! dominating the whole pipeline) and nothing else — pause/resume is a
//! level, not a latch, and lives on a watch channel instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the signal and wake all waiters. Idempotent.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Resolve once the signal has been raised. Returns immediately if it
    /// already was.
    pub async fn raised(&self) {
        loop {
            if self.is_raised() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering so a raise between the check and
            // the registration cannot be lost.
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_lowered() {
        let signal = StopSignal::new();
        assert!(!signal.is_raised());
    }

    #[tokio::test]
    async fn raise_wakes_waiter() {
        let signal = StopSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.raised().await;
            true
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.raise();
        assert!(handle.await.unwrap());
        assert!(signal.is_raised());
    }

    #[tokio::test]
    async fn raised_resolves_immediately_when_already_raised() {
        let signal = StopSignal::new();
        signal.raise();
        signal.raise(); // idempotent
        signal.raised().await;
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = StopSignal::new();
        let b = a.clone();
        b.raise();
        assert!(a.is_raised());
    }
}
