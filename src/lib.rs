//! chunklift — resumable chunked file-upload engine.
//!
//! Transfers a byte-addressable source to a remote service as an
//! ordered sequence of byte-range chunks over a three-phase protocol
//! (session-open → per-chunk POSTs → session-finish), with:
//!
//! - bounded-parallel dispatch (at most three chunks in flight),
//! - pause / resume / retry / abort under caller control,
//! - strictly-increasing aggregate progress events,
//! - recovery from partial server state: the server's `uploadedChunks`
//!   list at session-open is the sole source of truth for resumption.
//!
//! ```no_run
//! use chunklift::{
//!     HttpTransport, MemorySource, RestUrlScheme, UploadConfig, UploadDescriptor,
//!     UploadEngine, UploadEvent,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = UploadConfig::new(Arc::new(RestUrlScheme::new("https://api.example.com")))
//!     .with_header("authorization", "Bearer ...");
//! let source = Arc::new(MemorySource::new(vec![0u8; 1 << 20]));
//! let mut engine = UploadEngine::new(
//!     UploadDescriptor::new("archive.bin", 1_700_000_000_000),
//!     source,
//!     Arc::new(HttpTransport::new()),
//!     config,
//! );
//!
//! let mut events = engine.events().unwrap();
//! while let Some(event) = events.recv().await {
//!     match event {
//!         UploadEvent::Progress(f) => println!("{:.0}%", f * 100.0),
//!         UploadEvent::Finish(body) => println!("done: {body}"),
//!         UploadEvent::Error { message, .. } => eprintln!("failed: {message}"),
//!         _ => {}
//!     }
//! }
//! # }
//! ```

pub mod core;
pub mod error;
pub mod transport;

mod utils;

pub use crate::core::config::{RestUrlScheme, UploadConfig, UrlScheme, MAX_CONCURRENT_CHUNKS};
pub use crate::core::engine::UploadEngine;
pub use crate::core::events::UploadEvent;
pub use crate::core::meta::{ChunkProgress, ChunkStatus, FileMeta, UploadDescriptor};
pub use crate::core::slicer::{plan_chunks, ChunkSpan};
pub use crate::core::source::{ChunkSource, FileSource, MemorySource};
pub use crate::error::{ErrorKind, UploadError};
pub use crate::transport::{
    HttpTransport, PostRequest, ProgressFn, RequestBody, Transport, TransportError,
};
