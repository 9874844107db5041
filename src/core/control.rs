//! Control plane: the externally driven signals that gate the pipeline.
//!
//! Four caller-facing signals (pause, resume, retry, abort) plus the
//! internal start. Each control is a typed channel with the semantics
//! the pipeline needs:
//!
//! - pause/resume: a watch level, deduplicated by last-value comparison;
//! - retry: a sequence counter — the pipeline snapshots it when entering
//!   an error state, so retries fired outside one are ignored;
//! - start: at-most-once, observed even if fired before the pipeline is
//!   listening;
//! - abort: a latched stop signal dominating everything else.
//!
//! Once the pipeline reaches a terminal state it closes the plane and
//! every method becomes a no-op.

use crate::utils::signal::StopSignal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::debug;

#[derive(Clone)]
pub(crate) struct Controls {
    inner: Arc<ControlsInner>,
}

struct ControlsInner {
    closed: AtomicBool,
    started: AtomicBool,
    start: Notify,
    pause: watch::Sender<bool>,
    retry: watch::Sender<u64>,
    abort: StopSignal,
}

/// Receiver half handed to the coordinator task.
pub(crate) struct ControlGates {
    pub pause: watch::Receiver<bool>,
    pub retry: watch::Receiver<u64>,
    pub abort: StopSignal,
}

impl Controls {
    pub fn new() -> (Self, ControlGates) {
        let (pause_tx, pause_rx) = watch::channel(false);
        let (retry_tx, retry_rx) = watch::channel(0);
        let abort = StopSignal::new();
        let controls = Self {
            inner: Arc::new(ControlsInner {
                closed: AtomicBool::new(false),
                started: AtomicBool::new(false),
                start: Notify::new(),
                pause: pause_tx,
                retry: retry_tx,
                abort: abort.clone(),
            }),
        };
        let gates = ControlGates {
            pause: pause_rx,
            retry: retry_rx,
            abort,
        };
        (controls, gates)
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Arm the pipeline. At-most-once; later calls are no-ops.
    pub fn start(&self) {
        if self.is_closed() || self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        // notify_one stores a permit, so firing before the pipeline
        // awaits is not lost.
        self.inner.start.notify_one();
    }

    /// Wait until `start` has fired (or abort wins the race upstream).
    pub async fn started(&self) {
        if self.inner.started.load(Ordering::Acquire) {
            return;
        }
        self.inner.start.notified().await;
    }

    pub fn set_paused(&self, paused: bool) {
        if self.is_closed() {
            return;
        }
        let changed = self.inner.pause.send_if_modified(|current| {
            if *current != paused {
                *current = paused;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(event = "pause_toggled", paused, "Pause level changed");
        }
    }

    pub fn retry(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.retry.send_modify(|seq| *seq += 1);
    }

    pub fn abort(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.abort.raise();
    }

    /// Terminal cleanup: after this every control call is a no-op.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn start_is_observed_even_when_fired_first() {
        let (controls, _gates) = Controls::new();
        controls.start();
        tokio::time::timeout(Duration::from_secs(1), controls.started())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pause_deduplicates_by_last_value() {
        let (controls, mut gates) = Controls::new();
        controls.set_paused(true);
        controls.set_paused(true); // duplicate: no second notification
        gates.pause.changed().await.unwrap();
        assert!(*gates.pause.borrow_and_update());
        assert!(!gates.pause.has_changed().unwrap());

        controls.set_paused(false);
        gates.pause.changed().await.unwrap();
        assert!(!*gates.pause.borrow_and_update());
    }

    #[tokio::test]
    async fn retry_outside_error_state_is_ignored_via_snapshot() {
        let (controls, mut gates) = Controls::new();
        // Stray retries before the pipeline enters an error state.
        controls.retry();
        controls.retry();

        // Entering the error state: snapshot the current sequence.
        let snapshot = *gates.retry.borrow_and_update();
        assert!(!gates.retry.has_changed().unwrap());

        controls.retry();
        gates.retry.changed().await.unwrap();
        assert!(*gates.retry.borrow_and_update() > snapshot);
    }

    #[tokio::test]
    async fn closed_controls_are_no_ops() {
        let (controls, mut gates) = Controls::new();
        controls.close();
        controls.set_paused(true);
        controls.retry();
        controls.abort();
        controls.start();

        assert!(!*gates.pause.borrow_and_update());
        assert_eq!(*gates.retry.borrow_and_update(), 0);
        assert!(!gates.abort.is_raised());
    }

    #[tokio::test]
    async fn abort_latches() {
        let (controls, gates) = Controls::new();
        controls.abort();
        controls.abort();
        assert!(gates.abort.is_raised());
    }
}
