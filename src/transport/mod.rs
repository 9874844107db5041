//! Transport capability consumed by the upload pipeline.
//!
//! The engine never talks HTTP directly — it issues `PostRequest`s
//! through this trait. The production implementation is
//! [`HttpTransport`](http::HttpTransport); tests substitute a scripted
//! in-process transport.

mod http;

pub use http::HttpTransport;

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Callback receiving the cumulative byte count uploaded so far for one
/// request, at transport-defined granularity.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Body of an outgoing request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// No body (session-finish).
    Empty,
    /// JSON body, sent with `application/json` (session-open).
    Json(serde_json::Value),
    /// Raw bytes, sent with `application/octet-stream` (chunks).
    Bytes(Bytes),
}

/// A single POST issued by the pipeline.
pub struct PostRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: RequestBody,
    /// Installed for chunk uploads; `None` for control requests.
    pub progress: Option<ProgressFn>,
}

impl fmt::Debug for PostRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostRequest")
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl PostRequest {
    pub fn new(url: String, headers: HashMap<String, String>, body: RequestBody) -> Self {
        Self {
            url,
            headers,
            body,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Transport-level failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("http status {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never completed (DNS, connect, socket, timeout).
    #[error("request failed: {0}")]
    Network(String),

    /// The request was cancelled before completing.
    #[error("request cancelled")]
    Cancelled,
}

/// Asynchronous POST capability.
///
/// Any 2xx response is a success and yields the parsed JSON body
/// (`Value::Null` when the body is empty or not JSON). Implementations
/// must abort the underlying request when the returned future is dropped
/// — that drop is the pipeline's cancellation mechanism for pause and
/// abort.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn post(&self, request: PostRequest) -> Result<serde_json::Value, TransportError>;
}
