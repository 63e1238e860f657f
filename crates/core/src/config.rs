//! Configuration and path-manager layer.
//!
//! Grounded on the teacher's `RecorderConfig`: a small struct resolving a
//! handful of directories under a root, created lazily and idempotently.

use std::path::{Path, PathBuf};

use crate::domain::{BotId, CaptureMode};
use crate::error::Result;

/// Environment/configuration inputs (§6). Loaded once at process start and
/// never mutated afterward.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory under which `temp/`, `out/`, `chunks/`, `screenshots/` live.
    pub root_dir: PathBuf,
    pub mode: CaptureMode,
    pub display_id: String,
    pub audio_source_id: String,
    /// Bucket that receives per-chunk uploads (the "temporary audio" bucket, §9).
    pub audio_chunk_bucket: String,
    /// Bucket that receives the final `.mp4`/`.wav` uploads.
    pub video_bucket: String,
    /// Enables chunking of the final audio (driven by a transcription-provider flag).
    pub transcription_enabled: bool,
    /// Whether ephemeral temp files (`silence.wav`, `concat_list.txt`, raw captures)
    /// are deleted after a successful run. Defaults to `true` (see §9 open questions).
    pub delete_temp_files: bool,
    /// Global cleanup deadline (§4.5).
    pub cleanup_timeout: std::time::Duration,
    /// Per-step cleanup deadline for best-effort steps (§4.5).
    pub cleanup_step_timeout: std::time::Duration,
}

impl EngineConfig {
    pub fn new(root_dir: impl Into<PathBuf>, mode: CaptureMode) -> Self {
        Self {
            root_dir: root_dir.into(),
            mode,
            display_id: ":99".to_string(),
            audio_source_id: "virtual_sink.monitor".to_string(),
            audio_chunk_bucket: "temporary-audio".to_string(),
            video_bucket: "video".to_string(),
            transcription_enabled: true,
            delete_temp_files: true,
            cleanup_timeout: std::time::Duration::from_secs(30),
            cleanup_step_timeout: std::time::Duration::from_secs(3),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root_dir.join("temp")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root_dir.join("out")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.root_dir.join("chunks")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.root_dir.join("screenshots")
    }

    /// Creates all managed directories if they don't already exist. Safe to
    /// call repeatedly.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [self.temp_dir(), self.out_dir(), self.chunks_dir(), self.screenshots_dir()] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn raw_video_path(&self) -> PathBuf {
        self.temp_dir().join("raw.mp4")
    }

    pub fn raw_audio_path(&self) -> PathBuf {
        self.temp_dir().join("raw.wav")
    }

    pub fn processed_audio_path(&self) -> PathBuf {
        self.temp_dir().join("processed.wav")
    }

    pub fn silence_path(&self) -> PathBuf {
        self.temp_dir().join("silence.wav")
    }

    pub fn concat_list_path(&self) -> PathBuf {
        self.temp_dir().join("concat_list.txt")
    }

    pub fn merged_path(&self) -> PathBuf {
        self.temp_dir().join("merged.mp4")
    }

    pub fn final_video_path(&self, bot_id: &BotId) -> PathBuf {
        self.out_dir().join(format!("{bot_id}.mp4"))
    }

    pub fn final_audio_path(&self, bot_id: &BotId) -> PathBuf {
        self.out_dir().join(format!("{bot_id}.wav"))
    }

    pub fn chunk_path(&self, bot_id: &BotId, index: usize) -> PathBuf {
        self.chunks_dir().join(crate::domain::ArtifactSet::chunk_filename(bot_id, index))
    }

    pub fn screenshot_pattern(&self, ts: i64) -> PathBuf {
        self.screenshots_dir().join(format!("{ts}_%04d.jpg"))
    }

    /// Deletes a file if `delete_temp_files` is enabled; logged, never fatal.
    pub fn maybe_delete(&self, path: &Path) {
        if !self.delete_temp_files {
            return;
        }
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete temp file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_layout_matches_file_system_layout_spec() {
        let cfg = EngineConfig::new("/var/capture/bot-1", CaptureMode::AudioVideo);
        assert_eq!(cfg.raw_video_path(), PathBuf::from("/var/capture/bot-1/temp/raw.mp4"));
        assert_eq!(cfg.raw_audio_path(), PathBuf::from("/var/capture/bot-1/temp/raw.wav"));
        assert_eq!(cfg.merged_path(), PathBuf::from("/var/capture/bot-1/temp/merged.mp4"));

        let bot = BotId::new("bot-1");
        assert_eq!(cfg.final_video_path(&bot), PathBuf::from("/var/capture/bot-1/out/bot-1.mp4"));
        assert_eq!(cfg.chunk_path(&bot, 3), PathBuf::from("/var/capture/bot-1/chunks/bot-1-3.wav"));
    }

    #[test]
    fn ensure_directories_is_idempotent() {
        let tmp = std::env::temp_dir().join(format!("capture-engine-test-{}", std::process::id()));
        let cfg = EngineConfig::new(&tmp, CaptureMode::AudioOnly);
        cfg.ensure_directories().unwrap();
        cfg.ensure_directories().unwrap();
        assert!(cfg.temp_dir().is_dir());
        assert!(cfg.chunks_dir().is_dir());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn delete_temp_files_defaults_to_true() {
        let cfg = EngineConfig::new("/tmp/x", CaptureMode::AudioOnly);
        assert!(cfg.delete_temp_files);
    }
}
