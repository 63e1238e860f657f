//! Media Tool Runner (C1).
//!
//! Spawns `ffmpeg`/`ffprobe` with an argument vector and awaits termination.
//! No retry, no timeout — both are caller concerns. Grounded on the teacher's
//! `OnceLock`-cached ffmpeg-availability check and its pattern of discarding
//! unused child stdio while scanning the used stream for diagnostics.

use std::process::Stdio;
use std::sync::OnceLock;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
}

impl Tool {
    fn binary(self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
        }
    }
}

static FFMPEG_AVAILABLE: OnceLock<bool> = OnceLock::new();
static FFPROBE_AVAILABLE: OnceLock<bool> = OnceLock::new();

fn probe_on_path(binary: &str) -> bool {
    std::process::Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Checks (once, cached) whether the given tool is reachable on `PATH`.
pub fn ensure_available(tool: Tool) -> Result<()> {
    let available = match tool {
        Tool::Ffmpeg => *FFMPEG_AVAILABLE.get_or_init(|| probe_on_path("ffmpeg")),
        Tool::Ffprobe => *FFPROBE_AVAILABLE.get_or_init(|| probe_on_path("ffprobe")),
    };
    if available {
        Ok(())
    } else {
        Err(EngineError::ToolUnavailable(tool.binary().to_string()))
    }
}

/// Runs the encoder (`ffmpeg`) to completion, discarding stdout, scanning
/// stderr lines for the literal substring `error` (logged, non-fatal).
///
/// Resolves on exit 0; otherwise fails with [`EngineError::PostProcessFailure`]
/// carrying the numeric exit code, tagged with `stage` for diagnostics.
pub async fn run_encoder(args: &[impl AsRef<str>], stage: &str) -> Result<()> {
    ensure_available(Tool::Ffmpeg)?;

    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    tracing::debug!(stage, args = ?args, "spawning ffmpeg");

    let mut child = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EngineError::PostProcessFailure {
            stage: stage.to_string(),
            detail: format!("failed to spawn ffmpeg: {e}"),
        })?;

    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        let stage = stage.to_string();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                if line.to_lowercase().contains("error") {
                    tracing::error!(stage = %stage, "{line}");
                } else {
                    tracing::trace!(stage = %stage, "{line}");
                }
            }
        });
    }

    let status = child.wait().await.map_err(|e| EngineError::PostProcessFailure {
        stage: stage.to_string(),
        detail: format!("failed to await ffmpeg: {e}"),
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(EngineError::PostProcessFailure {
            stage: stage.to_string(),
            detail: format!("ffmpeg exited with {status}"),
        })
    }
}

/// Runs the prober (`ffprobe`), captures full stdout, resolves on exit 0.
pub async fn run_prober(args: &[impl AsRef<str>]) -> Result<String> {
    ensure_available(Tool::Ffprobe)?;

    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    let output = Command::new("ffprobe")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("failed to run ffprobe: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(EngineError::Other(anyhow::anyhow!(
            "ffprobe exited with {}",
            output.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ffmpeg_installed() -> bool {
        std::env::var("CI").is_err() && ensure_available(Tool::Ffmpeg).is_ok()
    }

    #[tokio::test]
    async fn run_encoder_fails_fast_on_bogus_args_when_ffmpeg_is_present() {
        if !ffmpeg_installed() {
            return;
        }
        let result = run_encoder(&["-this-flag-does-not-exist"], "test-stage").await;
        assert!(result.is_err());
    }

    #[test]
    fn ensure_available_is_consistent_across_calls() {
        // Cached OnceLock: two calls observe the same answer either way.
        let first = ensure_available(Tool::Ffmpeg).is_ok();
        let second = ensure_available(Tool::Ffmpeg).is_ok();
        assert_eq!(first, second);
    }
}
