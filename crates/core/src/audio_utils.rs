//! Never-fail duration detection (§4.4) and tone cross-correlation input decode (§4.3).
//!
//! Grounded on the teacher's multi-tier `get_audio_duration_ms`: direct WAV
//! header parsing first (instant, exact), then container-format probing,
//! then per-stream probing, then a file-size estimate that never raises.

use std::path::Path;

use crate::error::Result;
use crate::media_tool;

/// Walks the RIFF/WAVE chunk list directly and computes duration from the
/// `fmt `/`data` chunks. Returns `None` if the file isn't a well-formed WAV
/// header (callers fall through to the probing tiers).
pub fn try_wav_header_duration_secs(path: &Path) -> Option<f64> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < 44 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }

    let mut offset = 12usize;
    let mut channels: Option<u16> = None;
    let mut sample_rate: Option<u32> = None;
    let mut bits_per_sample: Option<u16> = None;
    let mut data_len: Option<u32> = None;

    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().ok()?);
        let body_start = offset + 8;

        if chunk_id == b"fmt " && body_start + 16 <= bytes.len() {
            channels = Some(u16::from_le_bytes(bytes[body_start + 2..body_start + 4].try_into().ok()?));
            sample_rate = Some(u32::from_le_bytes(bytes[body_start + 4..body_start + 8].try_into().ok()?));
            bits_per_sample = Some(u16::from_le_bytes(bytes[body_start + 14..body_start + 16].try_into().ok()?));
        } else if chunk_id == b"data" {
            data_len = Some(chunk_size);
        }

        // Chunks are word-aligned; odd sizes get a padding byte.
        offset = body_start + chunk_size as usize + (chunk_size as usize % 2);
    }

    let channels = channels? as u64;
    let sample_rate = sample_rate? as u64;
    let bits_per_sample = bits_per_sample? as u64;
    let data_len = data_len? as u64;

    if channels == 0 || sample_rate == 0 || bits_per_sample == 0 {
        return None;
    }

    let bytes_per_sample_frame = channels * (bits_per_sample / 8);
    if bytes_per_sample_frame == 0 {
        return None;
    }

    let total_frames = data_len / bytes_per_sample_frame;
    Some(total_frames as f64 / sample_rate as f64)
}

async fn probe_format_duration_secs(path: &Path) -> Option<f64> {
    let out = media_tool::run_prober(&[
        "-v", "error",
        "-show_entries", "format=duration",
        "-of", "default=noprint_wrappers=1:nokey=1",
        path.to_str()?,
    ])
    .await
    .ok()?;
    out.trim().parse::<f64>().ok()
}

async fn probe_stream_duration_secs(path: &Path) -> Option<f64> {
    let out = media_tool::run_prober(&[
        "-v", "error",
        "-select_streams", "a:0",
        "-show_entries", "stream=duration",
        "-of", "default=noprint_wrappers=1:nokey=1",
        path.to_str()?,
    ])
    .await
    .ok()?;
    out.trim().parse::<f64>().ok()
}

/// Rough estimate from file size alone; last-resort tier, never fails.
fn estimate_duration_from_file_size_secs(path: &Path) -> f64 {
    const ASSUMED_BYTES_PER_SEC: f64 = 44_100.0 * 2.0; // 44.1kHz mono 16-bit PCM
    std::fs::metadata(path)
        .map(|m| m.len() as f64 / ASSUMED_BYTES_PER_SEC)
        .unwrap_or(0.0)
}

/// Never-fail duration cascade (§4.4): WAV header → ffprobe format → ffprobe
/// stream → file-size estimate. Always returns *some* answer; logs a warning
/// when a fallback tier had to be used.
pub async fn duration_secs(path: &Path) -> f64 {
    if let Some(d) = try_wav_header_duration_secs(path) {
        return d;
    }
    if let Some(d) = probe_format_duration_secs(path).await {
        return d;
    }
    if let Some(d) = probe_stream_duration_secs(path).await {
        tracing::warn!(path = %path.display(), "duration from stream-level probe, format probe failed");
        return d;
    }
    let estimate = estimate_duration_from_file_size_secs(path);
    tracing::warn!(path = %path.display(), estimate, "duration estimated from file size, probing failed entirely");
    estimate
}

/// Decodes a media file's audio track to mono f32 PCM at `sample_rate_hz` via
/// the media tool runner, for use as cross-correlation input (§4.3). Never
/// performs container parsing itself — all decoding is delegated to ffmpeg.
pub async fn decode_mono_f32(path: &Path, sample_rate_hz: u32) -> Result<Vec<f32>> {
    use std::process::Stdio;
    use tokio::io::AsyncReadExt;
    use tokio::process::Command;

    media_tool::ensure_available(media_tool::Tool::Ffmpeg)?;

    let mut child = Command::new("ffmpeg")
        .args([
            "-v", "error",
            "-i", path.to_str().ok_or_else(|| anyhow::anyhow!("non-utf8 path"))?,
            "-ac", "1",
            "-ar", &sample_rate_hz.to_string(),
            "-f", "f32le",
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let mut buf = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout.read_to_end(&mut buf).await?;
    }
    child.wait().await?;

    let samples = buf
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_minimal_wav(path: &Path, sample_rate: u32, channels: u16, num_frames: u32) {
        let bits_per_sample: u16 = 16;
        let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
        let block_align = channels * (bits_per_sample / 8);
        let data_len = num_frames * block_align as u32;

        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(b"RIFF").unwrap();
        f.write_all(&(36 + data_len).to_le_bytes()).unwrap();
        f.write_all(b"WAVE").unwrap();
        f.write_all(b"fmt ").unwrap();
        f.write_all(&16u32.to_le_bytes()).unwrap();
        f.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
        f.write_all(&channels.to_le_bytes()).unwrap();
        f.write_all(&sample_rate.to_le_bytes()).unwrap();
        f.write_all(&byte_rate.to_le_bytes()).unwrap();
        f.write_all(&block_align.to_le_bytes()).unwrap();
        f.write_all(&bits_per_sample.to_le_bytes()).unwrap();
        f.write_all(b"data").unwrap();
        f.write_all(&data_len.to_le_bytes()).unwrap();
        f.write_all(&vec![0u8; data_len as usize]).unwrap();
    }

    #[test]
    fn wav_header_duration_is_exact_for_well_formed_header() {
        let path = std::env::temp_dir().join(format!("audio-utils-test-{}.wav", std::process::id()));
        write_minimal_wav(&path, 44_100, 1, 44_100 * 2); // 2 seconds
        let duration = try_wav_header_duration_secs(&path).unwrap();
        assert!((duration - 2.0).abs() < 1e-9);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn wav_header_duration_rejects_non_wav_input() {
        let path = std::env::temp_dir().join(format!("audio-utils-test-notwav-{}.bin", std::process::id()));
        std::fs::write(&path, b"not a riff file at all").unwrap();
        assert!(try_wav_header_duration_secs(&path).is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn duration_cascade_falls_back_to_file_size_for_missing_file() {
        let path = Path::new("/nonexistent/does-not-exist.wav");
        // Should never panic or return an error type; always produces a number.
        let d = duration_secs(path).await;
        assert!(d >= 0.0);
    }
}
