//! The event stream surfaced to callers, and the progress bookkeeping
//! that feeds it.
//!
//! Every event is emitted by the single coordinator task, so the stream
//! is totally ordered without locks. Progress is deduplicated with a
//! strict-greater-than comparison: a restarted chunk reports small byte
//! counts again, and the resulting aggregate regression is suppressed
//! rather than shown to the caller.

use crate::core::meta::FileMeta;
use crate::core::slicer::ChunkSpan;
use crate::error::ErrorKind;
use tokio::sync::mpsc;

/// Events on the upload stream, in the order guaranteed by the pipeline:
/// `Start` precedes `SessionOpen` precedes the first `Progress`;
/// `Finish` is the last event of a successful run; on abort the stream
/// completes after flag cleanup without a `Finish`.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// The pipeline was armed.
    Start,
    /// Session-open returned; chunk uploads begin after this.
    SessionOpen(FileMeta),
    /// Aggregate uploaded fraction in [0, 1]; strictly increasing.
    Progress(f64),
    /// Whether pausing currently has an effect.
    Pausable(bool),
    /// Whether a retryable error is pending.
    Retryable(bool),
    /// An error observed by the retry gate. Retryable errors are
    /// followed by `Retryable(true)`; all others are terminal.
    Error { kind: ErrorKind, message: String },
    /// Terminal success, carrying the finish response body.
    Finish(serde_json::Value),
}

/// Per-chunk byte tally. `record` keeps the latest report per chunk (not
/// a sum), so a restarted chunk simply overwrites its stale count.
pub(crate) struct ProgressLedger {
    loaded: Vec<u64>,
    spans: Vec<ChunkSpan>,
    file_size: u64,
}

impl ProgressLedger {
    pub fn new(spans: &[ChunkSpan], file_size: u64) -> Self {
        Self {
            loaded: vec![0; spans.len()],
            spans: spans.to_vec(),
            file_size,
        }
    }

    /// Record the cumulative byte count for one chunk and return the new
    /// aggregate fraction.
    pub fn record(&mut self, index: u32, loaded: u64) -> f64 {
        if let Some(slot) = self.loaded.get_mut(index as usize) {
            *slot = loaded;
        }
        self.fraction()
    }

    /// Credit a completed chunk its full span length. Keeps the
    /// aggregate exact even when a transport reports no intermediate
    /// byte counts.
    pub fn credit_completed(&mut self, index: u32) -> f64 {
        if let Some(span) = self.spans.get(index as usize) {
            self.loaded[index as usize] = span.len();
        }
        self.fraction()
    }

    fn fraction(&self) -> f64 {
        if self.file_size == 0 {
            return 1.0;
        }
        let total: u64 = self.loaded.iter().sum();
        (total as f64 / self.file_size as f64).clamp(0.0, 1.0)
    }
}

/// Single-writer emitter for the upload stream.
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<UploadEvent>,
    last_progress: f64,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                last_progress: 0.0,
            },
            rx,
        )
    }

    /// Emit unconditionally. Send failures mean the caller dropped the
    /// receiver; the pipeline keeps running regardless.
    pub fn emit(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit `Progress` only on a strict increase over the last emitted
    /// value. Regressions (a restarted chunk back at zero) are dropped.
    pub fn progress(&mut self, fraction: f64) {
        if fraction > self.last_progress {
            self.last_progress = fraction;
            self.emit(UploadEvent::Progress(fraction));
        }
    }
}
