//! Session and chunk data types.
//!
//! `FileMeta` is the server's description of an upload session. Only the
//! chunk-geometry fields are interpreted; everything else the server
//! returns (keys, URLs, tokens, timestamps) is carried opaquely in
//! `extra` so URL schemes can echo it back.

use crate::error::UploadError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Server-side session descriptor returned by session-open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    /// Total number of chunks the server expects.
    pub chunks: u32,
    /// Byte length of every non-final chunk.
    pub chunk_size: u64,
    /// Total size of the file; must equal the local source's size.
    pub file_size: u64,
    /// Zero-based indices already persisted server-side. Non-empty when
    /// resuming an interrupted upload.
    #[serde(default)]
    pub uploaded_chunks: HashSet<u32>,
    /// Server-assigned upload key, consumed by URL schemes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Opaque server fields, echoed back through URL construction.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FileMeta {
    /// Check the chunk-geometry invariants:
    /// `chunk_size * (chunks - 1) < file_size <= chunk_size * chunks`
    /// and `uploaded_chunks ⊆ [0, chunks)`.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunks == 0 || self.chunk_size == 0 {
            return Err(UploadError::InvalidSession(format!(
                "degenerate session: chunks={} chunk_size={}",
                self.chunks, self.chunk_size
            )));
        }
        let capacity = self.chunk_size as u128 * self.chunks as u128;
        let floor = self.chunk_size as u128 * (self.chunks as u128 - 1);
        let size = self.file_size as u128;
        if size <= floor || size > capacity {
            return Err(UploadError::InvalidSession(format!(
                "file size {} does not fit {} chunks of {} bytes",
                self.file_size, self.chunks, self.chunk_size
            )));
        }
        if let Some(bad) = self.uploaded_chunks.iter().find(|i| **i >= self.chunks) {
            return Err(UploadError::InvalidSession(format!(
                "uploaded chunk index {} out of range (chunks={})",
                bad, self.chunks
            )));
        }
        Ok(())
    }
}

/// Outcome of one chunk upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStatus {
    pub index: u32,
    pub completed: bool,
}

/// Byte count uploaded so far for one chunk within the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub index: u32,
    pub loaded: u64,
}

/// Caller-supplied identity of the blob, sent at session-open.
#[derive(Debug, Clone)]
pub struct UploadDescriptor {
    pub file_name: String,
    /// Last-modified timestamp, epoch milliseconds.
    pub last_updated: u64,
}

impl UploadDescriptor {
    pub fn new(file_name: impl Into<String>, last_updated: u64) -> Self {
        Self {
            file_name: file_name.into(),
            last_updated,
        }
    }
}

/// JSON body of the session-open request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionOpenBody<'a> {
    pub file_name: &'a str,
    pub file_size: u64,
    pub last_updated: u64,
}
