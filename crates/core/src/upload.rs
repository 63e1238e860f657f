//! Object-storage uploader collaborator contract (§6).
//!
//! Out of scope per the specification (the wire protocol is not specified),
//! but a crate with no working default uploader would be untestable as a
//! whole. The HTTP PUT implementation below reuses `reqwest`, the same HTTP
//! client crate the teacher uses for its Gemini API calls.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{EngineError, Result};

/// Whether an upload is a short-lived chunk (shorter TTL metadata) or a
/// final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Chunk,
    FinalArtifact,
}

/// Uploads a local file to a `(bucket, key)` destination. The engine does not
/// interpret the response beyond success/failure.
#[async_trait]
pub trait ObjectStorageUploader: Send + Sync {
    async fn upload(&self, local_path: &Path, bucket: &str, key: &str, kind: UploadKind) -> Result<()>;
}

/// PUTs the file body to `{base_url}/{bucket}/{key}` over HTTP. `base_url`
/// points at whatever object-storage gateway the deployment uses; this
/// engine treats it as an opaque endpoint.
pub struct HttpUploader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUploader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ObjectStorageUploader for HttpUploader {
    async fn upload(&self, local_path: &Path, bucket: &str, key: &str, kind: UploadKind) -> Result<()> {
        let body = tokio::fs::read(local_path).await?;
        let url = format!("{}/{}/{}", self.base_url.trim_end_matches('/'), bucket, key);

        let mut request = self.client.put(&url).body(body);
        if kind == UploadKind::Chunk {
            request = request.header("X-Object-TTL", "short");
        }

        let response = request
            .send()
            .await
            .map_err(|e| upload_error(kind, key, format!("request failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(upload_error(kind, key, format!("server returned {}", response.status())))
        }
    }
}

fn upload_error(kind: UploadKind, key: &str, detail: String) -> EngineError {
    match kind {
        UploadKind::Chunk => EngineError::ChunkUploadFailure { key: key.to_string(), detail },
        UploadKind::FinalArtifact => EngineError::FinalUploadFailure { key: key.to_string(), detail },
    }
}

/// Uploads each chunk, logging (not aborting on) per-chunk failures (§4.4
/// step 7, scenario 6). Returns the count that succeeded.
pub async fn upload_chunks(
    uploader: &dyn ObjectStorageUploader,
    chunk_paths: &[std::path::PathBuf],
    bot_id: &str,
    bucket: &str,
) -> usize {
    let mut succeeded = 0;
    for path in chunk_paths {
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        let key = format!("{bot_id}/{filename}");
        match uploader.upload(path, bucket, &key, UploadKind::Chunk).await {
            Ok(()) => succeeded += 1,
            Err(e) => tracing::error!(key = %key, error = %e, "chunk upload failed, continuing batch"),
        }
    }
    succeeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingUploader {
        fail_first_n: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStorageUploader for CountingUploader {
        async fn upload(&self, _local_path: &Path, _bucket: &str, key: &str, _kind: UploadKind) -> Result<()> {
            let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
            if call_index < self.fail_first_n {
                Err(EngineError::ChunkUploadFailure {
                    key: key.to_string(),
                    detail: "simulated failure".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn partial_chunk_upload_failure_does_not_abort_the_batch() {
        // Scenario 6: 3 of 5 chunk uploads fail -> 2 succeed, batch completes.
        let uploader = CountingUploader {
            fail_first_n: 3,
            calls: AtomicUsize::new(0),
        };
        let chunks: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("/tmp/bot-1-{i}.wav"))).collect();

        let succeeded = upload_chunks(&uploader, &chunks, "bot-1", "temporary-audio").await;
        assert_eq!(succeeded, 2);
    }

    #[tokio::test]
    async fn all_chunks_succeed_when_uploader_never_fails() {
        let uploader = CountingUploader {
            fail_first_n: 0,
            calls: AtomicUsize::new(0),
        };
        let chunks: Vec<PathBuf> = (0..3).map(|i| PathBuf::from(format!("/tmp/bot-2-{i}.wav"))).collect();
        let succeeded = upload_chunks(&uploader, &chunks, "bot-2", "temporary-audio").await;
        assert_eq!(succeeded, 3);
    }

    #[allow(dead_code)]
    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn http_uploader_is_send_and_sync() {
        assert_send_sync::<HttpUploader>();
        let _ = Arc::new(HttpUploader::new("http://example.invalid"));
    }
}
