//! reqwest-backed transport.
//!
//! Chunk bodies are streamed in fixed frames so the progress callback
//! observes the upload as it leaves the client rather than once at the
//! end. Dropping the in-flight future aborts the request, which is how
//! the pipeline cancels chunk POSTs on pause and abort.

use super::{PostRequest, ProgressFn, RequestBody, Transport, TransportError};
use bytes::Bytes;
use futures_util::stream;
use tracing::debug;

/// Frame size for streamed chunk bodies. Each frame handed to the HTTP
/// stack triggers one progress report with the cumulative byte count.
const PROGRESS_FRAME: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: PostRequest) -> Result<serde_json::Value, TransportError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        builder = match request.body {
            RequestBody::Empty => builder.header(reqwest::header::CONTENT_TYPE, "application/json"),
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes(data) => {
                let builder = builder.header(
                    reqwest::header::CONTENT_TYPE,
                    "application/octet-stream",
                );
                match request.progress {
                    Some(progress) => {
                        builder.body(reqwest::Body::wrap_stream(framed_body(data, progress)))
                    }
                    None => builder.body(data),
                }
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(event = "post_rejected", url = %request.url, status = status.as_u16(), "Server rejected request");
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::Null))
    }
}

/// Split `data` into frames, reporting the cumulative byte count as each
/// frame is pulled by the HTTP stack.
fn framed_body(
    data: Bytes,
    progress: ProgressFn,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
    let total = data.len();
    let frame_count = total.div_ceil(PROGRESS_FRAME).max(1);
    stream::iter((0..frame_count).map(move |i| {
        let start = i * PROGRESS_FRAME;
        let end = (start + PROGRESS_FRAME).min(total);
        progress(end as u64);
        Ok(data.slice(start..end))
    }))
}
