//! Bounded-parallel chunk dispatcher.
//!
//! One *run* uploads every chunk the server does not already hold. At
//! most [`MAX_CONCURRENT_CHUNKS`] attempts are in flight; the rest queue
//! in index order and start as slots free up. Chunk outcomes and
//! byte-level progress flow over a single channel into the fold loop,
//! which also watches the pause level and the abort signal — so the
//! accumulator, the progress ledger, and the control gates are observed
//! in one total order without locks.
//!
//! A chunk failure is counted, never propagated: when the number of
//! distinct failed chunks in the run reaches the threshold the run fails
//! (and the error tally is cleared so a retry starts clean). Failures
//! below the threshold are re-dispatched in a further cycle of the same
//! run.

use crate::core::config::{failure_threshold, UploadConfig, MAX_CONCURRENT_CHUNKS};
use crate::core::events::{EventSink, ProgressLedger};
use crate::core::meta::{ChunkProgress, ChunkStatus, FileMeta};
use crate::core::slicer::ChunkSpan;
use crate::core::source::ChunkSource;
use crate::transport::{PostRequest, ProgressFn, RequestBody, Transport};
use crate::utils::signal::StopSignal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// How a dispatcher run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// Every chunk index is accounted for; the session can be finished.
    Complete,
    /// The pause level went high; in-flight attempts were cancelled.
    Paused,
    /// The abort signal fired.
    Aborted,
    /// Distinct chunk failures reached the threshold.
    Failed { failed: u32, threshold: u32 },
}

/// Messages from chunk tasks into the fold loop.
enum ChunkMessage {
    Progress(ChunkProgress),
    Done(ChunkStatus),
}

pub(crate) struct Dispatcher {
    transport: Arc<dyn Transport>,
    config: Arc<UploadConfig>,
    source: Arc<dyn ChunkSource>,
    meta: FileMeta,
    spans: Vec<ChunkSpan>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: Arc<UploadConfig>,
        source: Arc<dyn ChunkSource>,
        meta: FileMeta,
        spans: Vec<ChunkSpan>,
    ) -> Self {
        Self {
            transport,
            config,
            source,
            meta,
            spans,
        }
    }

    /// Run until every chunk is accounted for or a gate stops the run.
    ///
    /// `completed` is the durable completed set, seeded from the
    /// server's `uploadedChunks` at session open; chunks it contains are
    /// skipped, and each run's accumulator is rebuilt from it — which is
    /// what makes a retry start with a fresh tally.
    pub async fn run(
        &self,
        completed: &mut HashSet<u32>,
        pause: &mut watch::Receiver<bool>,
        abort: &StopSignal,
        ledger: &mut ProgressLedger,
        sink: &mut EventSink,
    ) -> RunOutcome {
        let threshold = failure_threshold(self.meta.chunks);
        let mut errors: HashSet<u32> = HashSet::new();

        if *pause.borrow_and_update() {
            return RunOutcome::Paused;
        }

        // Dispatch cycles: each cycle attempts every missing chunk once;
        // sub-threshold failures roll into the next cycle.
        loop {
            if completed.len() as u32 >= self.meta.chunks {
                return RunOutcome::Complete;
            }

            let pending: Vec<ChunkSpan> = self
                .spans
                .iter()
                .copied()
                .filter(|span| !completed.contains(&span.index))
                .collect();
            debug!(
                event = "dispatch_cycle",
                pending = pending.len(),
                errors = errors.len(),
                "Dispatching missing chunks"
            );

            let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
            let mut tasks = JoinSet::new();
            let mut queue = pending.iter().copied();
            for span in queue.by_ref().take(MAX_CONCURRENT_CHUNKS) {
                self.spawn_chunk(&mut tasks, span, msg_tx.clone());
            }

            let mut settled = 0usize;
            loop {
                tokio::select! {
                    _ = abort.raised() => {
                        tasks.shutdown().await;
                        return RunOutcome::Aborted;
                    }
                    changed = pause.changed() => {
                        if changed.is_err() || *pause.borrow_and_update() {
                            tasks.shutdown().await;
                            return RunOutcome::Paused;
                        }
                    }
                    Some(msg) = msg_rx.recv() => match msg {
                        ChunkMessage::Progress(progress) => {
                            let fraction = ledger.record(progress.index, progress.loaded);
                            sink.progress(fraction);
                        }
                        ChunkMessage::Done(status) => {
                            settled += 1;
                            if status.completed {
                                completed.insert(status.index);
                                let fraction = ledger.credit_completed(status.index);
                                sink.progress(fraction);
                                if completed.len() as u32 >= self.meta.chunks {
                                    tasks.shutdown().await;
                                    return RunOutcome::Complete;
                                }
                            } else {
                                errors.insert(status.index);
                                warn!(
                                    event = "chunk_failed",
                                    chunk = status.index,
                                    failed = errors.len(),
                                    threshold,
                                    "Chunk upload failed"
                                );
                                if errors.len() as u32 >= threshold {
                                    let failed = errors.len() as u32;
                                    // Clear the tally so a user retry
                                    // starts clean.
                                    errors.clear();
                                    tasks.shutdown().await;
                                    return RunOutcome::Failed { failed, threshold };
                                }
                            }
                            if let Some(span) = queue.next() {
                                self.spawn_chunk(&mut tasks, span, msg_tx.clone());
                            } else if settled == pending.len() {
                                break;
                            }
                        }
                    }
                }
            }
            while tasks.join_next().await.is_some() {}
            // Not complete (that returns early), so some chunks failed
            // below the threshold: loop and re-dispatch them.
        }
    }

    fn spawn_chunk(
        &self,
        tasks: &mut JoinSet<()>,
        span: ChunkSpan,
        msg_tx: mpsc::UnboundedSender<ChunkMessage>,
    ) {
        let transport = self.transport.clone();
        let source = self.source.clone();
        let headers = self.config.headers.clone();
        let url = self.config.urls.chunk_url(&self.meta, span.index);

        tasks.spawn(async move {
            let index = span.index;
            let result = upload_chunk(transport, source, url, headers, span, &msg_tx).await;
            let completed = match result {
                Ok(()) => true,
                Err(error) => {
                    debug!(event = "chunk_attempt_error", chunk = index, %error, "Chunk attempt failed");
                    false
                }
            };
            let _ = msg_tx.send(ChunkMessage::Done(ChunkStatus { index, completed }));
        });
    }
}

/// One chunk attempt: read the span, POST it with a progress callback.
async fn upload_chunk(
    transport: Arc<dyn Transport>,
    source: Arc<dyn ChunkSource>,
    url: String,
    headers: std::collections::HashMap<String, String>,
    span: ChunkSpan,
    msg_tx: &mpsc::UnboundedSender<ChunkMessage>,
) -> anyhow::Result<()> {
    let bytes = source.read_range(span.start, span.end).await?;

    let progress_tx = msg_tx.clone();
    let index = span.index;
    let progress: ProgressFn = Arc::new(move |loaded| {
        let _ = progress_tx.send(ChunkMessage::Progress(ChunkProgress { index, loaded }));
    });

    let request =
        PostRequest::new(url, headers, RequestBody::Bytes(bytes)).with_progress(progress);
    transport.post(request).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventSink;
    use crate::core::slicer::plan_chunks;
    use crate::core::source::MemorySource;
    use crate::core::testutil::{test_config, MockTransport};

    struct Fixture {
        dispatcher: Dispatcher,
        transport: Arc<MockTransport>,
        completed: HashSet<u32>,
        pause_tx: watch::Sender<bool>,
        pause_rx: watch::Receiver<bool>,
        abort: StopSignal,
        ledger: ProgressLedger,
    }

    fn fixture(chunks: u32, chunk_size: u64, file_size: u64) -> Fixture {
        let transport = Arc::new(MockTransport::new(chunks, chunk_size, file_size));
        let meta = transport.meta();
        let spans = plan_chunks(file_size, chunks, chunk_size);
        let source = Arc::new(MemorySource::new(vec![0u8; file_size as usize]));
        let dispatcher = Dispatcher::new(
            transport.clone(),
            Arc::new(test_config()),
            source,
            meta.clone(),
            spans.clone(),
        );
        let (pause_tx, pause_rx) = watch::channel(false);
        Fixture {
            dispatcher,
            transport,
            completed: meta.uploaded_chunks.clone(),
            pause_tx,
            pause_rx,
            abort: StopSignal::new(),
            ledger: ProgressLedger::new(&spans, file_size),
        }
    }

    #[tokio::test]
    async fn clean_run_uploads_every_chunk_once() {
        let mut fx = fixture(5, 100, 500);
        let (mut sink, _rx) = EventSink::new();
        let outcome = fx
            .dispatcher
            .run(
                &mut fx.completed,
                &mut fx.pause_rx,
                &fx.abort,
                &mut fx.ledger,
                &mut sink,
            )
            .await;
        assert_eq!(outcome, RunOutcome::Complete);
        assert_eq!(fx.completed.len(), 5);

        let mut posts = fx.transport.chunk_posts();
        posts.sort_unstable();
        assert_eq!(posts, vec![0, 1, 2, 3, 4]);
        assert!(fx.transport.max_in_flight() <= MAX_CONCURRENT_CHUNKS);
    }

    #[tokio::test]
    async fn skips_chunks_the_server_already_holds() {
        let mut fx = fixture(5, 100, 500);
        fx.transport.set_uploaded([0, 2, 4]);
        fx.completed = fx.transport.meta().uploaded_chunks.clone();

        let (mut sink, _rx) = EventSink::new();
        let outcome = fx
            .dispatcher
            .run(
                &mut fx.completed,
                &mut fx.pause_rx,
                &fx.abort,
                &mut fx.ledger,
                &mut sink,
            )
            .await;
        assert_eq!(outcome, RunOutcome::Complete);

        let mut posts = fx.transport.chunk_posts();
        posts.sort_unstable();
        assert_eq!(posts, vec![1, 3]);
        assert_eq!(fx.completed.len(), 5);
    }

    #[tokio::test]
    async fn sub_threshold_failures_recover_within_the_run() {
        let mut fx = fixture(5, 100, 500);
        fx.transport.fail_once([1, 3]);

        let (mut sink, _rx) = EventSink::new();
        let outcome = fx
            .dispatcher
            .run(
                &mut fx.completed,
                &mut fx.pause_rx,
                &fx.abort,
                &mut fx.ledger,
                &mut sink,
            )
            .await;
        // threshold is 3 for 5 chunks: two failures roll into a second
        // dispatch cycle and the run still completes.
        assert_eq!(outcome, RunOutcome::Complete);
        let posts = fx.transport.chunk_posts();
        assert_eq!(posts.iter().filter(|i| **i == 1).count(), 2);
        assert_eq!(posts.iter().filter(|i| **i == 3).count(), 2);
    }

    #[tokio::test]
    async fn three_distinct_failures_fail_the_run() {
        let mut fx = fixture(10, 100, 1000);
        fx.transport.fail_always([2, 5, 7]);

        let (mut sink, _rx) = EventSink::new();
        let outcome = fx
            .dispatcher
            .run(
                &mut fx.completed,
                &mut fx.pause_rx,
                &fx.abort,
                &mut fx.ledger,
                &mut sink,
            )
            .await;
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                failed: 3,
                threshold: 3
            }
        );
    }

    #[tokio::test]
    async fn small_uploads_fail_on_the_first_error() {
        let mut fx = fixture(2, 100, 200);
        fx.transport.fail_once([1]);

        let (mut sink, _rx) = EventSink::new();
        let outcome = fx
            .dispatcher
            .run(
                &mut fx.completed,
                &mut fx.pause_rx,
                &fx.abort,
                &mut fx.ledger,
                &mut sink,
            )
            .await;
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                failed: 1,
                threshold: 1
            }
        );
    }

    #[tokio::test]
    async fn abort_stops_the_run() {
        let mut fx = fixture(10, 100, 1000);
        fx.transport.hold([0, 1, 2]);
        fx.abort.raise();

        let (mut sink, _rx) = EventSink::new();
        let outcome = fx
            .dispatcher
            .run(
                &mut fx.completed,
                &mut fx.pause_rx,
                &fx.abort,
                &mut fx.ledger,
                &mut sink,
            )
            .await;
        assert_eq!(outcome, RunOutcome::Aborted);
        assert!(fx.completed.len() < 10);
    }

    #[tokio::test]
    async fn pause_already_high_returns_immediately() {
        let mut fx = fixture(5, 100, 500);
        fx.pause_tx.send(true).unwrap();

        let (mut sink, _rx) = EventSink::new();
        let outcome = fx
            .dispatcher
            .run(
                &mut fx.completed,
                &mut fx.pause_rx,
                &fx.abort,
                &mut fx.ledger,
                &mut sink,
            )
            .await;
        assert_eq!(outcome, RunOutcome::Paused);
        assert!(fx.transport.chunk_posts().is_empty());
    }
}
