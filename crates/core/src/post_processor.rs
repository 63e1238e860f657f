//! Post-Processor (C4): executes the trim plan (§4.4).
//!
//! Grounded on the teacher's `merge_audio_streams_smart` (scenario-based
//! ffmpeg command construction, progress-aware execution) and
//! `chunk_processor::concatenate_audio_files` (concat-demuxer usage with an
//! escaped list file). Every stage invokes [`crate::media_tool`] exactly once
//! and is fatal to the session on failure — no stage retries (§4.4).

use std::path::{Path, PathBuf};

use crate::audio_utils;
use crate::config::EngineConfig;
use crate::domain::{ArtifactSet, BotId, CaptureMode, TrimPlan, MAX_CHUNK_DURATION_SECS};
use crate::error::{EngineError, Result};
use crate::media_tool::run_encoder;
use crate::upload::{upload_chunks, ObjectStorageUploader, UploadKind};

/// Step 2: audio head alignment. Produces `processed.wav`.
async fn align_audio_head(config: &EngineConfig, audio_padding_secs: f64) -> Result<()> {
    let raw = config.raw_audio_path();
    let processed = config.processed_audio_path();

    if audio_padding_secs > 0.0 {
        let silence = config.silence_path();
        run_encoder(
            &[
                "-f".to_string(), "lavfi".to_string(),
                "-i".to_string(), "anullsrc=r=44100:cl=mono".to_string(),
                "-t".to_string(), format!("{audio_padding_secs}"),
                "-c:a".to_string(), "pcm_s16le".to_string(),
                "-y".to_string(), silence.to_string_lossy().into_owned(),
            ],
            "align-audio-head:synthesize-silence",
        )
        .await?;

        let concat_list = config.concat_list_path();
        let list_contents = format!(
            "file '{}'\nfile '{}'\n",
            escape_concat_entry(&silence),
            escape_concat_entry(&raw),
        );
        std::fs::write(&concat_list, list_contents)?;

        run_encoder(
            &[
                "-f".to_string(), "concat".to_string(),
                "-safe".to_string(), "0".to_string(),
                "-i".to_string(), concat_list.to_string_lossy().into_owned(),
                "-ar".to_string(), "44100".to_string(),
                "-ac".to_string(), "1".to_string(),
                "-c:a".to_string(), "pcm_s16le".to_string(),
                "-y".to_string(), processed.to_string_lossy().into_owned(),
            ],
            "align-audio-head:concat-silence-and-raw",
        )
        .await?;

        config.maybe_delete(&silence);
        config.maybe_delete(&concat_list);
    } else if audio_padding_secs < 0.0 {
        run_encoder(
            &[
                "-ss".to_string(), format!("{}", audio_padding_secs.abs()),
                "-i".to_string(), raw.to_string_lossy().into_owned(),
                "-avoid_negative_ts".to_string(), "make_zero".to_string(),
                "-ar".to_string(), "44100".to_string(),
                "-ac".to_string(), "1".to_string(),
                "-c:a".to_string(), "pcm_s16le".to_string(),
                "-y".to_string(), processed.to_string_lossy().into_owned(),
            ],
            "align-audio-head:trim-head",
        )
        .await?;
    } else {
        std::fs::copy(&raw, &processed)?;
    }

    Ok(())
}

fn escape_concat_entry(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "'\\''")
}

/// Step 3: merge raw video (stream-copied) with processed audio (AAC 192kbps).
///
/// `raw.mp4` carries its own (unused here) audio track for the sync planner's
/// benefit, so the streams are mapped explicitly rather than relying on
/// ffmpeg's default per-type stream selection across inputs.
async fn merge(config: &EngineConfig, bitrate_kbps: u32) -> Result<()> {
    run_encoder(
        &[
            "-i".to_string(), config.raw_video_path().to_string_lossy().into_owned(),
            "-i".to_string(), config.processed_audio_path().to_string_lossy().into_owned(),
            "-map".to_string(), "0:v:0".to_string(),
            "-map".to_string(), "1:a:0".to_string(),
            "-c:v".to_string(), "copy".to_string(),
            "-c:a".to_string(), "aac".to_string(),
            "-b:a".to_string(), format!("{bitrate_kbps}k"),
            "-shortest".to_string(),
            "-avoid_negative_ts".to_string(), "make_zero".to_string(),
            "-y".to_string(), config.merged_path().to_string_lossy().into_owned(),
        ],
        "merge",
    )
    .await
}

/// Step 4: final trim to meeting boundaries, stream-copied, +faststart.
async fn final_trim(config: &EngineConfig, bot_id: &BotId, plan: &TrimPlan) -> Result<PathBuf> {
    let out = config.final_video_path(bot_id);
    run_encoder(
        &[
            "-ss".to_string(), format!("{}", plan.trim_start_secs),
            "-i".to_string(), config.merged_path().to_string_lossy().into_owned(),
            "-t".to_string(), format!("{}", plan.final_duration_secs),
            "-c".to_string(), "copy".to_string(),
            "-movflags".to_string(), "+faststart".to_string(),
            "-y".to_string(), out.to_string_lossy().into_owned(),
        ],
        "final-trim",
    )
    .await?;
    Ok(out)
}

/// Step 5: re-extract the final MP4's audio to a standalone WAV.
async fn extract_audio(config: &EngineConfig, bot_id: &BotId) -> Result<PathBuf> {
    let out = config.final_audio_path(bot_id);
    run_encoder(
        &[
            "-i".to_string(), config.final_video_path(bot_id).to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-ar".to_string(), "44100".to_string(),
            "-ac".to_string(), "1".to_string(),
            "-c:a".to_string(), "pcm_s16le".to_string(),
            "-y".to_string(), out.to_string_lossy().into_owned(),
        ],
        "extract-audio",
    )
    .await?;
    Ok(out)
}

/// Step 6: segment the final WAV into fixed-duration chunks via the media
/// tool's native segment muxer.
async fn chunk_audio(config: &EngineConfig, bot_id: &BotId, final_audio: &Path) -> Result<Vec<PathBuf>> {
    let total_duration = audio_utils::duration_secs(final_audio).await;
    let segment_time = total_duration.min(MAX_CHUNK_DURATION_SECS).max(1.0);

    let pattern = config.chunks_dir().join(format!("{bot_id}-%d.wav"));
    run_encoder(
        &[
            "-i".to_string(), final_audio.to_string_lossy().into_owned(),
            "-f".to_string(), "segment".to_string(),
            "-segment_time".to_string(), format!("{segment_time}"),
            "-c".to_string(), "copy".to_string(),
            "-y".to_string(), pattern.to_string_lossy().into_owned(),
        ],
        "chunk",
    )
    .await?;

    let expected_chunks = (total_duration / segment_time).ceil().max(1.0) as usize;
    Ok((0..expected_chunks).map(|i| config.chunk_path(bot_id, i)).collect())
}

/// Executes the full post-processing pipeline (§4.4) and returns the
/// resulting artifact set. `trim_plan` is required in video mode and ignored
/// in audio-only mode (step 1 bypasses the trim plan entirely).
pub async fn process(
    config: &EngineConfig,
    bot_id: &BotId,
    mode: CaptureMode,
    trim_plan: Option<&TrimPlan>,
    uploader: &dyn ObjectStorageUploader,
) -> Result<ArtifactSet> {
    let final_audio = match mode {
        CaptureMode::AudioOnly => {
            let out = config.final_audio_path(bot_id);
            std::fs::copy(config.raw_audio_path(), &out)?;
            out
        }
        CaptureMode::AudioVideo => {
            let plan = trim_plan.ok_or_else(|| {
                EngineError::PostProcessFailure {
                    stage: "final-trim".to_string(),
                    detail: "video mode requires a trim plan".to_string(),
                }
            })?;

            align_audio_head(config, plan.audio_padding_secs).await?;
            merge(config, 192).await?;
            final_trim(config, bot_id, plan).await?;
            let audio = extract_audio(config, bot_id).await?;

            config.maybe_delete(&config.processed_audio_path());
            config.maybe_delete(&config.merged_path());

            audio
        }
    };

    let chunk_paths = if config.transcription_enabled {
        chunk_audio(config, bot_id, &final_audio).await?
    } else {
        Vec::new()
    };

    upload_chunks(uploader, &chunk_paths, bot_id.as_str(), &config.audio_chunk_bucket).await;

    let final_video = if mode.is_video() {
        Some(config.final_video_path(bot_id))
    } else {
        None
    };

    upload_final_artifacts(config, bot_id, final_video.as_deref(), &final_audio, uploader).await;

    Ok(ArtifactSet {
        bot_id: bot_id.clone(),
        final_video,
        final_audio,
        chunks: chunk_paths,
        screenshots: list_screenshots(config),
    })
}

async fn upload_final_artifacts(
    config: &EngineConfig,
    bot_id: &BotId,
    final_video: Option<&Path>,
    final_audio: &Path,
    uploader: &dyn ObjectStorageUploader,
) {
    let audio_key = format!("{bot_id}.wav");
    match uploader
        .upload(final_audio, &config.video_bucket, &audio_key, UploadKind::FinalArtifact)
        .await
    {
        Ok(()) => config.maybe_delete(final_audio),
        Err(e) => tracing::error!(key = %audio_key, error = %e, "final audio upload failed, retaining local file"),
    }

    if let Some(video_path) = final_video {
        let video_key = format!("{bot_id}.mp4");
        match uploader
            .upload(video_path, &config.video_bucket, &video_key, UploadKind::FinalArtifact)
            .await
        {
            Ok(()) => config.maybe_delete(video_path),
            Err(e) => tracing::error!(key = %video_key, error = %e, "final video upload failed, retaining local file"),
        }
    }
}

fn list_screenshots(config: &EngineConfig) -> Vec<PathBuf> {
    std::fs::read_dir(config.screenshots_dir())
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_entry_escaping_handles_embedded_single_quotes() {
        let path = Path::new("/tmp/it's a test/raw.wav");
        let escaped = escape_concat_entry(path);
        assert!(escaped.contains("'\\''"));
    }

    #[test]
    fn chunk_count_matches_ceil_of_duration_over_segment_time() {
        // Scenario 3: audio-only, chunking yields ceil(duration/3600) chunks.
        let total_duration = 7250.0_f64; // just over 2x 3600
        let segment_time = total_duration.min(MAX_CHUNK_DURATION_SECS);
        let expected = (total_duration / segment_time).ceil() as usize;
        assert_eq!(expected, 3);
    }

    #[test]
    fn segment_time_never_exceeds_the_max_chunk_duration() {
        let total_duration = 10_000.0_f64;
        let segment_time = total_duration.min(MAX_CHUNK_DURATION_SECS);
        assert_eq!(segment_time, MAX_CHUNK_DURATION_SECS);
    }
}
