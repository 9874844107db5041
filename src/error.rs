//! Upload error taxonomy.
//!
//! Individual chunk failures are never surfaced here — they are counted
//! by the dispatcher and only become an error once the per-run threshold
//! trips. Everything else is terminal.

use crate::transport::TransportError;

/// Errors produced by the upload pipeline.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Session-open failed or the server returned an invalid session.
    /// Terminal: the pipeline cannot start without a session.
    #[error("session open failed: {0}")]
    SessionOpen(#[source] TransportError),

    /// The server session violates the chunk-geometry invariants or does
    /// not match the local source.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// Too many distinct chunks failed within one dispatcher run.
    /// The only retryable error: `retry()` re-runs the dispatcher.
    #[error("{failed} chunks failed (threshold {threshold})")]
    TooManyChunkFailures { failed: u32, threshold: u32 },

    /// Session-finish failed. Terminal.
    #[error("session finish failed: {0}")]
    Finish(#[source] TransportError),

    /// The upload was aborted by the caller.
    #[error("upload aborted")]
    Aborted,
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::SessionOpen(_) | UploadError::InvalidSession(_) => ErrorKind::SessionOpen,
            UploadError::TooManyChunkFailures { .. } => ErrorKind::ChunkFailures,
            UploadError::Finish(_) => ErrorKind::Finish,
            UploadError::Aborted => ErrorKind::Aborted,
        }
    }

    /// Only the chunk-failure threshold error re-enters the pipeline on
    /// an explicit user `retry()`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::TooManyChunkFailures { .. })
    }
}

/// Coarse error classification carried on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SessionOpen,
    ChunkFailures,
    Finish,
    Aborted,
}
