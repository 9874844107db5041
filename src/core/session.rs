//! Session open / finish against the upload service.
//!
//! The opener memoises one `FileMeta` per engine instance behind
//! once-initialisation: the dispatcher, the finisher, and the progress
//! math all read the same cached session, and the server sees exactly
//! one session-open per engine. Open failures propagate unchanged —
//! there is no local retry at this layer.

use crate::core::config::UploadConfig;
use crate::core::meta::{FileMeta, SessionOpenBody, UploadDescriptor};
use crate::error::UploadError;
use crate::transport::{PostRequest, RequestBody, Transport};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub(crate) struct SessionClient {
    transport: Arc<dyn Transport>,
    config: Arc<UploadConfig>,
    cached: OnceCell<FileMeta>,
}

impl SessionClient {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<UploadConfig>) -> Self {
        Self {
            transport,
            config,
            cached: OnceCell::new(),
        }
    }

    /// Open the session, or replay the cached `FileMeta` if it is already
    /// open. `source_size` is checked against the server's `fileSize`.
    pub async fn open(
        &self,
        descriptor: &UploadDescriptor,
        source_size: u64,
    ) -> Result<&FileMeta, UploadError> {
        self.cached
            .get_or_try_init(|| self.open_uncached(descriptor, source_size))
            .await
    }

    async fn open_uncached(
        &self,
        descriptor: &UploadDescriptor,
        source_size: u64,
    ) -> Result<FileMeta, UploadError> {
        let body = serde_json::to_value(SessionOpenBody {
            file_name: &descriptor.file_name,
            file_size: source_size,
            last_updated: descriptor.last_updated,
        })
        .map_err(|e| UploadError::InvalidSession(e.to_string()))?;

        let request = PostRequest::new(
            self.config.urls.session_open_url(),
            self.config.headers.clone(),
            RequestBody::Json(body),
        );

        debug!(event = "session_open", file = %descriptor.file_name, size = source_size, "Opening upload session");
        let response = self
            .transport
            .post(request)
            .await
            .map_err(UploadError::SessionOpen)?;

        let meta: FileMeta = serde_json::from_value(response)
            .map_err(|e| UploadError::InvalidSession(format!("malformed session response: {e}")))?;
        meta.validate()?;
        if meta.file_size != source_size {
            return Err(UploadError::InvalidSession(format!(
                "server session is for {} bytes but the source holds {}",
                meta.file_size, source_size
            )));
        }

        info!(
            event = "session_opened",
            file = %descriptor.file_name,
            chunks = meta.chunks,
            chunk_size = meta.chunk_size,
            already_uploaded = meta.uploaded_chunks.len(),
            "Upload session opened"
        );
        Ok(meta)
    }

    /// Finish the session; the server's response body becomes the
    /// `Finish` event payload.
    pub async fn finish(&self, meta: &FileMeta) -> Result<serde_json::Value, UploadError> {
        let request = PostRequest::new(
            self.config.urls.session_finish_url(meta),
            self.config.headers.clone(),
            RequestBody::Empty,
        );
        let response = self
            .transport
            .post(request)
            .await
            .map_err(UploadError::Finish)?;
        info!(event = "session_finished", chunks = meta.chunks, "Upload session finished");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{test_config, MockTransport};

    fn descriptor() -> UploadDescriptor {
        UploadDescriptor::new("report.bin", 1_700_000_000_000)
    }

    #[tokio::test]
    async fn open_is_issued_once_and_replayed() {
        let transport = Arc::new(MockTransport::new(5, 100, 500));
        let session = SessionClient::new(transport.clone(), Arc::new(test_config()));

        let first = session.open(&descriptor(), 500).await.unwrap().clone();
        let second = session.open(&descriptor(), 500).await.unwrap().clone();
        assert_eq!(first.chunks, second.chunks);
        assert_eq!(transport.open_calls(), 1);
    }

    #[tokio::test]
    async fn open_rejects_size_mismatch() {
        let transport = Arc::new(MockTransport::new(5, 100, 500));
        let session = SessionClient::new(transport, Arc::new(test_config()));
        let err = session.open(&descriptor(), 499).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidSession(_)));
    }

    #[tokio::test]
    async fn open_rejects_invalid_geometry() {
        // Server claims 5 chunks of 100 for a 300-byte file.
        let transport = Arc::new(MockTransport::new(5, 100, 300));
        let session = SessionClient::new(transport, Arc::new(test_config()));
        let err = session.open(&descriptor(), 300).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidSession(_)));
    }

    #[tokio::test]
    async fn open_surfaces_transport_failure() {
        let transport = Arc::new(MockTransport::new(5, 100, 500));
        transport.fail_open();
        let session = SessionClient::new(transport, Arc::new(test_config()));
        let err = session.open(&descriptor(), 500).await.unwrap_err();
        assert!(matches!(err, UploadError::SessionOpen(_)));
    }

    #[tokio::test]
    async fn finish_returns_server_payload() {
        let transport = Arc::new(MockTransport::new(2, 100, 200));
        let session = SessionClient::new(transport.clone(), Arc::new(test_config()));
        let meta = session.open(&descriptor(), 200).await.unwrap().clone();
        let payload = session.finish(&meta).await.unwrap();
        assert_eq!(payload["ok"], serde_json::json!(true));
        assert_eq!(transport.finish_calls(), 1);
    }
}
