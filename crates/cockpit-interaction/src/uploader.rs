//! Attachment upload boundary and its HTTP implementation.

use async_trait::async_trait;
use cockpit_core::config::EngineConfig;
use cockpit_core::{CockpitError, Result};
use futures::stream;
use reqwest::{Body, Client};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const CHUNK_SIZE: usize = 64 * 1024;

/// Progress report delivered while an upload body streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub percentage: u8,
}

/// Callback invoked with upload progress. Reports are non-decreasing for a
/// single upload but may be delivered from another task.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// A file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Uploads attachment bodies and returns the URL the backend stored them at.
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    async fn upload(&self, file: UploadFile, on_progress: ProgressCallback) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Streams attachment bodies to `POST {base}/uploads`.
#[derive(Clone)]
pub struct HttpUploader {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl HttpUploader {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CockpitError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            request_timeout,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
            config.transport.request_timeout(),
        )
    }
}

/// Splits `data` into chunks, reporting cumulative progress as each is yielded.
fn progress_stream(
    data: Vec<u8>,
    on_progress: ProgressCallback,
) -> impl futures::Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> + Send + 'static {
    let total = data.len();
    let chunks: Vec<Vec<u8>> = data.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    let mut sent = 0usize;

    stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len();
        let percentage = if total == 0 {
            100
        } else {
            ((sent * 100) / total).min(100) as u8
        };
        on_progress(UploadProgress { percentage });
        Ok(chunk)
    }))
}

#[async_trait]
impl AttachmentUploader for HttpUploader {
    async fn upload(&self, file: UploadFile, on_progress: ProgressCallback) -> Result<String> {
        tracing::debug!(
            "[Uploader] Uploading '{}' ({} bytes)",
            file.name,
            file.data.len()
        );

        let size = file.data.len();
        let body = Body::wrap_stream(progress_stream(file.data, on_progress.clone()));
        let mut request = self
            .client
            .post(format!("{}/uploads", self.base_url))
            .header("x-file-name", file.name.as_str())
            .header(reqwest::header::CONTENT_TYPE, file.mime_type.as_str())
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CockpitError::timeout(
                    format!("upload of '{}'", file.name),
                    self.request_timeout.as_millis() as u64,
                )
            } else {
                CockpitError::transport(format!("Upload of '{}' failed: {e}", file.name))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CockpitError::transport(format!(
                "Upload of '{}' failed with HTTP {}",
                file.name,
                status.as_u16()
            )));
        }

        let parsed: UploadResponse = response.json().await.map_err(|e| {
            CockpitError::Serialization {
                format: "JSON".to_string(),
                message: format!("upload response for '{}': {e}", file.name),
            }
        })?;

        // Empty bodies never yield a chunk.
        if size == 0 {
            on_progress(UploadProgress { percentage: 100 });
        }
        Ok(parsed.url)
    }
}
