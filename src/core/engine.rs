//! UploadEngine: sole coordinator of the upload pipeline.
//!
//! This is the single source of truth for the upload lifecycle:
//! session open → bounded-parallel chunk dispatch → session finish,
//! gated by the control plane (pause/resume/retry/abort) and narrated on
//! the event stream.
//!
//! **Architecture rule**: every event is emitted by the one coordinator
//! task spawned here, so callers observe a total order. The handle
//! methods only flip control channels — no upload logic lives outside
//! the coordinator.

use crate::core::config::UploadConfig;
use crate::core::control::{ControlGates, Controls};
use crate::core::dispatcher::{Dispatcher, RunOutcome};
use crate::core::events::{EventSink, ProgressLedger, UploadEvent};
use crate::core::meta::UploadDescriptor;
use crate::core::session::SessionClient;
use crate::core::slicer::plan_chunks;
use crate::core::source::ChunkSource;
use crate::error::UploadError;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Handle to one upload. Construction spawns the coordinator task; the
/// caller drives it through the control methods and consumes the event
/// stream. All control methods are idempotent and become no-ops once
/// the upload reaches a terminal state.
pub struct UploadEngine {
    controls: Controls,
    events: Option<mpsc::UnboundedReceiver<UploadEvent>>,
    upload_id: Uuid,
}

impl UploadEngine {
    /// Spawn the upload coordinator. Must be called within a tokio
    /// runtime. With `auto_start` (the default) the pipeline arms
    /// immediately; otherwise it waits for [`start`](Self::start).
    pub fn new(
        descriptor: UploadDescriptor,
        source: Arc<dyn ChunkSource>,
        transport: Arc<dyn Transport>,
        config: UploadConfig,
    ) -> Self {
        let upload_id = Uuid::new_v4();
        let (controls, gates) = Controls::new();
        let (sink, events) = EventSink::new();
        let auto_start = config.auto_start;

        let pipeline = Pipeline {
            descriptor,
            source,
            transport,
            config: Arc::new(config),
            controls: controls.clone(),
            gates,
            sink,
        };
        let span = info_span!("upload", %upload_id);
        tokio::spawn(pipeline.run().instrument(span));

        if auto_start {
            controls.start();
        }

        Self {
            controls,
            events: Some(events),
            upload_id,
        }
    }

    /// Arm the pipeline. At-most-once; redundant calls are no-ops.
    pub fn start(&self) {
        self.controls.start();
    }

    /// Cancel the in-flight dispatcher run at the next chunk boundary.
    pub fn pause(&self) {
        self.controls.set_paused(true);
    }

    /// Re-run the dispatcher over the remaining chunks.
    pub fn resume(&self) {
        self.controls.set_paused(false);
    }

    /// Re-enter the pipeline after a chunk-failure error. Ignored in any
    /// other state.
    pub fn retry(&self) {
        self.controls.retry();
    }

    /// Terminate the pipeline; no finish is issued.
    pub fn abort(&self) {
        self.controls.abort();
    }

    /// Take the event stream. Single consumer; returns `None` after the
    /// first call.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events.take()
    }

    /// Identifier tagging this upload's log events.
    pub fn upload_id(&self) -> Uuid {
        self.upload_id
    }
}

// ── Coordinator ──────────────────────────────────────────────────────────────

struct Pipeline {
    descriptor: UploadDescriptor,
    source: Arc<dyn ChunkSource>,
    transport: Arc<dyn Transport>,
    config: Arc<UploadConfig>,
    controls: Controls,
    gates: ControlGates,
    sink: EventSink,
}

impl Pipeline {
    async fn run(mut self) {
        tokio::select! {
            _ = self.controls.started() => {}
            _ = self.gates.abort.raised() => {
                self.teardown_aborted();
                return;
            }
        }

        info!(event = "upload_started", file = %self.descriptor.file_name, size = self.source.size(), "Upload armed");
        self.sink.emit(UploadEvent::Start);
        self.sink.emit(UploadEvent::Pausable(true));
        self.sink.emit(UploadEvent::Retryable(false));

        let session = SessionClient::new(self.transport.clone(), self.config.clone());
        let meta = tokio::select! {
            opened = session.open(&self.descriptor, self.source.size()) => match opened {
                Ok(meta) => meta.clone(),
                Err(e) => {
                    self.fail(e);
                    return;
                }
            },
            _ = self.gates.abort.raised() => {
                self.teardown_aborted();
                return;
            }
        };
        self.sink.emit(UploadEvent::SessionOpen(meta.clone()));

        let spans = plan_chunks(meta.file_size, meta.chunks, meta.chunk_size);
        // Durable completed set: seeded with the server's view so a
        // resumed upload can reach |completes| = chunks, and kept across
        // pause cycles and retries (a 2xx chunk stays done).
        let mut completed = meta.uploaded_chunks.clone();
        let mut ledger = ProgressLedger::new(&spans, meta.file_size);
        let dispatcher = Dispatcher::new(
            self.transport.clone(),
            self.config.clone(),
            self.source.clone(),
            meta.clone(),
            spans,
        );

        loop {
            let outcome = dispatcher
                .run(
                    &mut completed,
                    &mut self.gates.pause,
                    &self.gates.abort,
                    &mut ledger,
                    &mut self.sink,
                )
                .await;
            match outcome {
                RunOutcome::Complete => {
                    let finished = tokio::select! {
                        finished = session.finish(&meta) => finished,
                        _ = self.gates.abort.raised() => {
                            self.teardown_aborted();
                            return;
                        }
                    };
                    match finished {
                        Ok(payload) => {
                            info!(event = "upload_complete", chunks = meta.chunks, "Upload finished");
                            self.sink.emit(UploadEvent::Pausable(false));
                            self.sink.emit(UploadEvent::Retryable(false));
                            self.sink.emit(UploadEvent::Finish(payload));
                            self.controls.close();
                        }
                        Err(e) => self.fail(e),
                    }
                    return;
                }

                RunOutcome::Paused => {
                    info!(event = "upload_paused", done = completed.len(), "Dispatcher parked");
                    self.sink.emit(UploadEvent::Pausable(false));
                    loop {
                        tokio::select! {
                            changed = self.gates.pause.changed() => {
                                if changed.is_err() {
                                    self.teardown_aborted();
                                    return;
                                }
                                if !*self.gates.pause.borrow_and_update() {
                                    break;
                                }
                            }
                            _ = self.gates.abort.raised() => {
                                self.teardown_aborted();
                                return;
                            }
                        }
                    }
                    info!(event = "upload_resumed", "Dispatcher resuming");
                    self.sink.emit(UploadEvent::Pausable(true));
                }

                RunOutcome::Failed { failed, threshold } => {
                    let err = UploadError::TooManyChunkFailures { failed, threshold };
                    warn!(event = "upload_run_failed", failed, threshold, "Awaiting user retry");
                    // Snapshot the retry sequence on entering the error
                    // state, before the error is visible to the caller:
                    // anything fired earlier is stale and ignored.
                    let seen = *self.gates.retry.borrow_and_update();
                    self.sink.emit(UploadEvent::Error {
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                    self.sink.emit(UploadEvent::Retryable(true));
                    loop {
                        tokio::select! {
                            changed = self.gates.retry.changed() => {
                                if changed.is_err() {
                                    self.teardown_aborted();
                                    return;
                                }
                                if *self.gates.retry.borrow_and_update() > seen {
                                    break;
                                }
                            }
                            _ = self.gates.abort.raised() => {
                                self.teardown_aborted();
                                return;
                            }
                        }
                    }
                    info!(event = "upload_retrying", "User retry accepted");
                    self.sink.emit(UploadEvent::Retryable(false));
                }

                RunOutcome::Aborted => {
                    self.teardown_aborted();
                    return;
                }
            }
        }
    }

    /// Terminal failure: surface the error, close the control plane.
    fn fail(&mut self, err: UploadError) {
        error!(event = "upload_failed", kind = ?err.kind(), %err, "Upload failed");
        self.sink.emit(UploadEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
        self.controls.close();
    }

    /// Abort teardown: flag-cleanup events, then the stream completes
    /// when the sink drops with the pipeline.
    fn teardown_aborted(&mut self) {
        info!(event = "upload_aborted", "Upload aborted");
        self.sink.emit(UploadEvent::Pausable(false));
        self.sink.emit(UploadEvent::Retryable(false));
        self.controls.close();
    }
}
