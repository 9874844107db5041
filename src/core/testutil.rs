//! Scripted in-process transport for pipeline tests.
//!
//! Routes on a `mock:` URL scheme, records every call, and can be
//! programmed with one-shot or persistent chunk failures plus hold
//! gates that park a chunk POST until the test releases it.

use crate::core::config::{UploadConfig, UrlScheme};
use crate::core::meta::FileMeta;
use crate::transport::{PostRequest, RequestBody, Transport, TransportError};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// URL scheme matching [`MockTransport`]'s routing.
pub(crate) struct MockUrls;

impl UrlScheme for MockUrls {
    fn session_open_url(&self) -> String {
        "mock:open".into()
    }

    fn chunk_url(&self, _meta: &FileMeta, index: u32) -> String {
        format!("mock:chunk/{index}")
    }

    fn session_finish_url(&self, _meta: &FileMeta) -> String {
        "mock:finish".into()
    }
}

pub(crate) fn test_config() -> UploadConfig {
    UploadConfig::new(Arc::new(MockUrls))
}

/// Route test logs through tracing when `RUST_LOG` is set.
pub(crate) fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub(crate) struct MockTransport {
    meta: Mutex<Value>,
    open_calls: AtomicUsize,
    finish_calls: AtomicUsize,
    chunk_posts: Mutex<Vec<u32>>,
    chunk_bodies: Mutex<Vec<(u32, usize)>>,
    fail_open: AtomicBool,
    fail_finish: AtomicBool,
    fail_once: Mutex<HashSet<u32>>,
    fail_always: Mutex<HashSet<u32>>,
    held: Mutex<HashSet<u32>>,
    release: Notify,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new(chunks: u32, chunk_size: u64, file_size: u64) -> Self {
        Self {
            meta: Mutex::new(json!({
                "chunks": chunks,
                "chunkSize": chunk_size,
                "fileSize": file_size,
                "uploadedChunks": [],
                "key": "test-key",
                "token": "opaque"
            })),
            open_calls: AtomicUsize::new(0),
            finish_calls: AtomicUsize::new(0),
            chunk_posts: Mutex::new(Vec::new()),
            chunk_bodies: Mutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
            fail_finish: AtomicBool::new(false),
            fail_once: Mutex::new(HashSet::new()),
            fail_always: Mutex::new(HashSet::new()),
            held: Mutex::new(HashSet::new()),
            release: Notify::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn meta(&self) -> FileMeta {
        serde_json::from_value(self.meta.lock().unwrap().clone()).unwrap()
    }

    /// Script the session as a resumption: these indices are already
    /// persisted server-side.
    pub fn set_uploaded(&self, indices: impl IntoIterator<Item = u32>) {
        let list: Vec<u32> = indices.into_iter().collect();
        self.meta.lock().unwrap()["uploadedChunks"] = json!(list);
    }

    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn fail_finish(&self) {
        self.fail_finish.store(true, Ordering::SeqCst);
    }

    /// These chunks fail exactly once, then succeed.
    pub fn fail_once(&self, indices: impl IntoIterator<Item = u32>) {
        self.fail_once.lock().unwrap().extend(indices);
    }

    /// These chunks fail on every attempt.
    pub fn fail_always(&self, indices: impl IntoIterator<Item = u32>) {
        self.fail_always.lock().unwrap().extend(indices);
    }

    /// Park POSTs for these chunks until [`release`](Self::release).
    pub fn hold(&self, indices: impl IntoIterator<Item = u32>) {
        self.held.lock().unwrap().extend(indices);
    }

    pub fn release(&self, index: u32) {
        self.held.lock().unwrap().remove(&index);
        self.release.notify_waiters();
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }

    /// Chunk indices POSTed, in arrival order (duplicates on re-attempt).
    pub fn chunk_posts(&self) -> Vec<u32> {
        self.chunk_posts.lock().unwrap().clone()
    }

    /// `(index, body length)` for every chunk POST that completed.
    pub fn chunk_bodies(&self) -> Vec<(u32, usize)> {
        self.chunk_bodies.lock().unwrap().clone()
    }

    /// High-water mark of concurrent chunk POSTs.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn is_held(&self, index: u32) -> bool {
        self.held.lock().unwrap().contains(&index)
    }

    async fn serve_chunk(&self, index: u32, request: &PostRequest) -> Result<Value, TransportError> {
        self.chunk_posts.lock().unwrap().push(index);
        let _gauge = InFlightGauge::enter(&self.in_flight, &self.max_in_flight);

        // Hold gate: cancellation-safe because the gauge decrements on
        // drop when the task is aborted mid-wait.
        loop {
            if !self.is_held(index) {
                break;
            }
            let released = self.release.notified();
            if !self.is_held(index) {
                break;
            }
            released.await;
        }

        if self.fail_once.lock().unwrap().remove(&index)
            || self.fail_always.lock().unwrap().contains(&index)
        {
            return Err(TransportError::Status {
                status: 503,
                message: format!("chunk {index} unavailable"),
            });
        }

        if let RequestBody::Bytes(bytes) = &request.body {
            if let Some(progress) = &request.progress {
                progress(bytes.len() as u64);
            }
            self.chunk_bodies.lock().unwrap().push((index, bytes.len()));
        }
        Ok(Value::Null)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn post(&self, request: PostRequest) -> Result<Value, TransportError> {
        match request.url.as_str() {
            "mock:open" => {
                self.open_calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_open.load(Ordering::SeqCst) {
                    return Err(TransportError::Status {
                        status: 500,
                        message: "open rejected".into(),
                    });
                }
                Ok(self.meta.lock().unwrap().clone())
            }
            "mock:finish" => {
                self.finish_calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_finish.load(Ordering::SeqCst) {
                    return Err(TransportError::Status {
                        status: 500,
                        message: "finish rejected".into(),
                    });
                }
                Ok(json!({ "ok": true }))
            }
            url => {
                let index: u32 = url
                    .strip_prefix("mock:chunk/")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| panic!("unexpected mock url: {url}"));
                self.serve_chunk(index, &request).await
            }
        }
    }
}

/// RAII gauge of concurrent chunk POSTs.
struct InFlightGauge<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGauge<'a> {
    fn enter(in_flight: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGauge<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
