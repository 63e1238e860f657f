//! Crate-wide error taxonomy.
//!
//! Every fallible public operation returns [`Result<T>`]. Infrastructure-level
//! failures (file I/O, JSON parsing) are wrapped with [`anyhow::Context`] at
//! the call site and converted into a variant here at the public boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The monitor source never became ready after the configured number of retries.
    #[error("audio monitor source not ready: {0}")]
    DeviceNotReady(String),

    /// The capture subprocess failed to spawn, or the initial sync-tone request failed.
    #[error("failed to start capture: {0}")]
    CaptureStartError(String),

    /// The capture subprocess exited with an unexpected code outside the grace period.
    #[error("capture aborted: exit code {code}")]
    CaptureAbort { code: i32 },

    /// Offset computation failed, returned an out-of-bounds result, or the meeting
    /// start time could not be recovered via the fallback.
    #[error("sync failure: {0}")]
    SyncFailure(String),

    /// The recording was stopped too early to reconstruct a meeting start time.
    #[error("bot removed too early: recording lasted only {duration_ms} ms")]
    BotRemovedTooEarly { duration_ms: i64 },

    /// A post-processing stage's external tool invocation returned non-zero.
    #[error("post-processing failed at stage '{stage}': {detail}")]
    PostProcessFailure { stage: String, detail: String },

    /// A single chunk failed to upload. Logged and skipped; does not abort the batch.
    #[error("chunk upload failed for '{key}': {detail}")]
    ChunkUploadFailure { key: String, detail: String },

    /// A final artifact (full video or audio) failed to upload. The local file is retained.
    #[error("final artifact upload failed for '{key}': {detail}")]
    FinalUploadFailure { key: String, detail: String },

    /// The cleanup coordinator's global deadline elapsed before all steps finished.
    #[error("cleanup timed out after {elapsed_ms} ms")]
    CleanupTimeout { elapsed_ms: u64 },

    /// A single best-effort cleanup step exceeded its per-step deadline.
    #[error("cleanup step '{step}' timed out")]
    CleanupStepTimeout { step: String },

    /// `ffmpeg`/`ffprobe` was not found on `PATH`.
    #[error("required media tool '{0}' was not found on PATH")]
    ToolUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
