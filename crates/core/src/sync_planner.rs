//! Sync Planner (C3).
//!
//! Locates the embedded sync tone in both tracks via normalized cross-
//! correlation against a synthesized reference waveform, then folds the
//! offset together with meeting-phase wall-clock timing into a [`TrimPlan`].
//! No teacher file implements this directly; the correlation routine is
//! original, but the "decode via the media tool, never hand-parse the
//! container" discipline follows [`crate::audio_utils`].

use std::path::Path;

use crate::audio_utils;
use crate::domain::{
    SyncTone, ToneOffsets, TrimPlan, FALLBACK_TRAILING_WINDOW_MS, FLASH_SCREEN_SLEEP_MS,
    MIN_RECORDING_DURATION_FOR_FALLBACK_MS,
};
use crate::error::{EngineError, Result};

/// Sample rate used for the correlation search itself; independent of the
/// archived/streaming rates, chosen low enough to keep the search cheap.
const CORRELATION_SAMPLE_RATE_HZ: u32 = 8_000;

/// Expected residual tolerance (§4.3).
const TONE_RESIDUAL_TOLERANCE_SECS: f64 = 0.050;

/// Synthesizes the reference tone waveform at the correlation sample rate.
fn reference_tone(tone: &SyncTone, sample_rate_hz: u32) -> Vec<f32> {
    let num_samples = (tone.duration.as_secs_f64() * sample_rate_hz as f64).round() as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate_hz as f64;
            (tone.amplitude * (2.0 * std::f64::consts::PI * tone.frequency_hz * t).sin()) as f32
        })
        .collect()
}

/// Finds the sample offset in `haystack` where `needle` correlates most
/// strongly, using normalized cross-correlation. Returns `None` for
/// degenerate (empty) input.
fn find_best_correlation_offset(haystack: &[f32], needle: &[f32]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    let needle_energy: f64 = needle.iter().map(|&s| (s as f64).powi(2)).sum();
    if needle_energy == 0.0 {
        return None;
    }

    let mut best_offset = 0usize;
    let mut best_score = f64::MIN;

    for offset in 0..=(haystack.len() - needle.len()) {
        let window = &haystack[offset..offset + needle.len()];
        let dot: f64 = window
            .iter()
            .zip(needle.iter())
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum();
        let window_energy: f64 = window.iter().map(|&s| (s as f64).powi(2)).sum();
        if window_energy == 0.0 {
            continue;
        }
        let score = dot / (window_energy.sqrt() * needle_energy.sqrt());
        if score > best_score {
            best_score = score;
            best_offset = offset;
        }
    }

    Some(best_offset)
}

fn locate_tone_secs(samples: &[f32], tone: &SyncTone, sample_rate_hz: u32) -> Option<f64> {
    let needle = reference_tone(tone, sample_rate_hz);
    let offset = find_best_correlation_offset(samples, &needle)?;
    Some(offset as f64 / sample_rate_hz as f64)
}

/// Computes `{ audioToneTime, videoToneTime }` by cross-correlating the known
/// tone waveform against the decoded audio of both tracks (§4.3).
pub async fn compute_offset(audio_path: &Path, video_path: &Path) -> Result<ToneOffsets> {
    let tone = SyncTone::default();

    let audio_samples = audio_utils::decode_mono_f32(audio_path, CORRELATION_SAMPLE_RATE_HZ).await?;
    let video_samples = audio_utils::decode_mono_f32(video_path, CORRELATION_SAMPLE_RATE_HZ).await?;

    let audio_tone_time_secs = locate_tone_secs(&audio_samples, &tone, CORRELATION_SAMPLE_RATE_HZ)
        .ok_or_else(|| EngineError::SyncFailure("tone not found in raw audio track".to_string()))?;
    let video_tone_time_secs = locate_tone_secs(&video_samples, &tone, CORRELATION_SAMPLE_RATE_HZ)
        .ok_or_else(|| EngineError::SyncFailure("tone not found in raw video track's audio".to_string()))?;

    if audio_tone_time_secs < 0.0 || video_tone_time_secs < 0.0 {
        return Err(EngineError::SyncFailure(
            "tone offsets must be non-negative".to_string(),
        ));
    }

    Ok(ToneOffsets {
        audio_tone_time_secs,
        video_tone_time_secs,
    })
}

/// Resolves the effective meeting start time, applying the meeting-time
/// fallback (§4.3) when the caller never observed a "meeting started" event.
///
/// `now_ms` and `recording_duration_ms` are both wall-clock derived; passed in
/// explicitly so this function stays pure and unit-testable.
pub fn resolve_meeting_start_ms(
    meeting_start_ms: i64,
    recording_duration_ms: i64,
    now_ms: i64,
) -> Result<i64> {
    if meeting_start_ms != 0 {
        return Ok(meeting_start_ms);
    }

    if recording_duration_ms <= MIN_RECORDING_DURATION_FOR_FALLBACK_MS {
        return Err(EngineError::BotRemovedTooEarly {
            duration_ms: recording_duration_ms,
        });
    }

    Ok(now_ms - FALLBACK_TRAILING_WINDOW_MS)
}

/// Validates a computed [`ToneOffsets`] against the expected residual
/// tolerance before it is used to build a [`TrimPlan`]. The tolerance check
/// here is against self-consistency (both times must be finite and
/// non-negative); the ±50ms tolerance against ground truth is an external
/// correctness property, not something this function can check on its own.
fn validate_offsets(offsets: &ToneOffsets) -> Result<()> {
    if !offsets.audio_tone_time_secs.is_finite() || !offsets.video_tone_time_secs.is_finite() {
        return Err(EngineError::SyncFailure("tone offsets are not finite".to_string()));
    }
    Ok(())
}

/// Builds the full trim plan from raw capture artifacts (§4.3). `recording_start_ms`
/// and `meeting_start_ms` are wall-clock milliseconds since the Unix epoch;
/// `now_ms` is the current wall clock, used only by the fallback path.
pub async fn plan_trim(
    audio_path: &Path,
    video_path: &Path,
    recording_start_ms: i64,
    meeting_start_ms: i64,
    now_ms: i64,
) -> Result<TrimPlan> {
    let recording_duration_ms = now_ms - recording_start_ms;
    let meeting_start_ms = resolve_meeting_start_ms(meeting_start_ms, recording_duration_ms, now_ms)?;

    let offsets = compute_offset(audio_path, video_path).await?;
    validate_offsets(&offsets)?;

    let plan = TrimPlan::from_offsets(offsets, recording_start_ms, meeting_start_ms);

    let video_duration = audio_utils::duration_secs(video_path).await;
    let audio_duration = audio_utils::duration_secs(audio_path).await;

    Ok(plan.with_final_duration(video_duration, audio_duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_finds_exact_offset_for_synthetic_tone() {
        let tone = SyncTone::default();
        let needle = reference_tone(&tone, CORRELATION_SAMPLE_RATE_HZ);

        let lead_in_samples = (2.5 * CORRELATION_SAMPLE_RATE_HZ as f64) as usize;
        let mut haystack = vec![0.0f32; lead_in_samples];
        haystack.extend_from_slice(&needle);
        haystack.extend(vec![0.0f32; 1000]);

        let found = locate_tone_secs(&haystack, &tone, CORRELATION_SAMPLE_RATE_HZ).unwrap();
        let expected = lead_in_samples as f64 / CORRELATION_SAMPLE_RATE_HZ as f64;
        assert!(
            (found - expected).abs() <= TONE_RESIDUAL_TOLERANCE_SECS,
            "found {found}, expected {expected}"
        );
    }

    #[test]
    fn correlation_returns_none_for_degenerate_input() {
        let tone = SyncTone::default();
        assert!(find_best_correlation_offset(&[], &reference_tone(&tone, 8000)).is_none());
        assert!(find_best_correlation_offset(&[0.0; 10], &[]).is_none());
    }

    #[test]
    fn meeting_time_fallback_kicks_in_only_when_zero() {
        assert_eq!(resolve_meeting_start_ms(1_010_000, 30_000, 2_000_000).unwrap(), 1_010_000);
    }

    #[test]
    fn meeting_time_fallback_applies_trailing_window_scenario_4() {
        // Scenario 4: premature shutdown, meetingStart=0, duration=25000ms.
        let now_ms = 1_025_000;
        let resolved = resolve_meeting_start_ms(0, 25_000, now_ms).unwrap();
        assert_eq!(resolved, now_ms - FALLBACK_TRAILING_WINDOW_MS);
    }

    #[test]
    fn meeting_time_fallback_errors_when_recording_too_short() {
        let result = resolve_meeting_start_ms(0, 5_000, 1_005_000);
        assert!(matches!(result, Err(EngineError::BotRemovedTooEarly { duration_ms: 5_000 })));
    }

    #[test]
    fn meeting_time_fallback_boundary_at_exactly_ten_seconds_is_an_error() {
        // "recordingDuration <= 10s" -> error, per the boundary-behaviors table.
        let result = resolve_meeting_start_ms(0, MIN_RECORDING_DURATION_FOR_FALLBACK_MS, 1_010_000);
        assert!(matches!(result, Err(EngineError::BotRemovedTooEarly { .. })));
    }

    #[test]
    fn flash_screen_constant_is_folded_into_trim_start() {
        let offsets = ToneOffsets {
            audio_tone_time_secs: 7.05,
            video_tone_time_secs: 7.20,
        };
        let plan = TrimPlan::from_offsets(offsets, 1_000_000, 1_000_000 + FLASH_SCREEN_SLEEP_MS);
        // meetingStart - recordingStart - FLASH == 0, so trimStart == videoToneTime.
        assert!((plan.trim_start_secs - 7.20).abs() < 1e-9);
    }
}
