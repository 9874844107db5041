//! Centralized configuration for the upload engine.
//!
//! Tunable constants live here so they can be reviewed in one place.
//! The parallelism bound and failure thresholds are design constants of
//! the protocol, not caller knobs.

use crate::core::meta::FileMeta;
use std::collections::HashMap;
use std::sync::Arc;

// ── Dispatch constants ───────────────────────────────────────────────────────

/// Maximum chunk POSTs in flight at any instant. Remaining chunks queue
/// in index order and start as slots free up.
pub const MAX_CONCURRENT_CHUNKS: usize = 3;

/// Distinct failed chunks tolerated within one dispatcher run before the
/// run fails, for uploads of more than [`SMALL_UPLOAD_CHUNKS`] chunks.
/// A single transient chunk failure should not abort an N-chunk upload;
/// three distinct failures in one run indicate a systemic problem.
pub const CHUNK_FAILURE_THRESHOLD: u32 = 3;

/// Uploads of at most this many chunks fail on the first chunk error —
/// with so few chunks there is no meaningful notion of an isolated
/// transient failure.
pub const SMALL_UPLOAD_CHUNKS: u32 = 3;

/// Failure threshold for a run over `chunks` total chunks.
pub fn failure_threshold(chunks: u32) -> u32 {
    if chunks > SMALL_UPLOAD_CHUNKS {
        CHUNK_FAILURE_THRESHOLD
    } else {
        1
    }
}

// ── URL scheme ───────────────────────────────────────────────────────────────

/// Produces the three endpoint URLs of the upload protocol. The chunk and
/// finish URLs receive the session's `FileMeta` so schemes can route on
/// server-assigned keys or other opaque session fields.
pub trait UrlScheme: Send + Sync + 'static {
    fn session_open_url(&self) -> String;
    fn chunk_url(&self, meta: &FileMeta, index: u32) -> String;
    fn session_finish_url(&self, meta: &FileMeta) -> String;
}

/// Conventional REST layout over a base URL:
///
/// - open:   `{base}/uploads`
/// - chunk:  `{base}/uploads/{key}/chunks/{index}`
/// - finish: `{base}/uploads/{key}/finish`
///
/// `{key}` is the server-assigned `FileMeta::key`.
#[derive(Debug, Clone)]
pub struct RestUrlScheme {
    base: String,
}

impl RestUrlScheme {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }
}

impl UrlScheme for RestUrlScheme {
    fn session_open_url(&self) -> String {
        format!("{}/uploads", self.base)
    }

    fn chunk_url(&self, meta: &FileMeta, index: u32) -> String {
        format!(
            "{}/uploads/{}/chunks/{}",
            self.base,
            meta.key.as_deref().unwrap_or_default(),
            index
        )
    }

    fn session_finish_url(&self, meta: &FileMeta) -> String {
        format!(
            "{}/uploads/{}/finish",
            self.base,
            meta.key.as_deref().unwrap_or_default()
        )
    }
}

// ── Engine configuration ─────────────────────────────────────────────────────

/// Caller-facing configuration surface.
#[derive(Clone)]
pub struct UploadConfig {
    /// Headers added to every request (auth, tenancy, ...).
    pub headers: HashMap<String, String>,
    /// Fire `start` at construction. Default true.
    pub auto_start: bool,
    pub urls: Arc<dyn UrlScheme>,
}

impl UploadConfig {
    pub fn new(urls: Arc<dyn UrlScheme>) -> Self {
        Self {
            headers: HashMap::new(),
            auto_start: true,
            urls,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

impl std::fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadConfig")
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("auto_start", &self.auto_start)
            .finish()
    }
}
