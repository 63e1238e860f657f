//! Typed value models shared across the capture-and-sync core.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether the capture subprocess records video in addition to audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureMode {
    AudioOnly,
    AudioVideo,
}

impl CaptureMode {
    pub fn is_video(self) -> bool {
        matches!(self, CaptureMode::AudioVideo)
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::AudioOnly => write!(f, "audio-only"),
            CaptureMode::AudioVideo => write!(f, "audio+video"),
        }
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "audio-only" | "audio_only" | "audio" => Ok(CaptureMode::AudioOnly),
            "audio+video" | "audio-video" | "video" => Ok(CaptureMode::AudioVideo),
            other => Err(format!("unknown capture mode: {other}")),
        }
    }
}

/// Identifies a bot/session; also used as the stem for artifact filenames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotId(String);

impl BotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a [`crate::capture_session::CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    WaitingForDevices,
    Running,
    Stopping,
    StoppedSuccess,
    StoppedFailure,
}

/// The embedded sync tone's acoustic parameters.
#[derive(Debug, Clone, Copy)]
pub struct SyncTone {
    pub duration: Duration,
    pub frequency_hz: f64,
    pub amplitude: f64,
}

impl Default for SyncTone {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(800),
            frequency_hz: 1000.0,
            amplitude: 0.95,
        }
    }
}

/// Milliseconds the capture waits after spawn before requesting the sync tone.
pub const FLASH_SCREEN_SLEEP_MS: i64 = 6_000;

/// How long `stop()` waits after the grace flag is set before sending the
/// graceful termination signal.
pub const GRACE_PERIOD_SECONDS: u64 = 3;

/// Hard-kill fallback armed once the graceful termination signal is sent.
pub const HARD_KILL_FALLBACK_SECONDS: u64 = 8;

/// Below this recording duration, a zero meeting-start time cannot be
/// recovered via the fallback and is a hard failure instead.
pub const MIN_RECORDING_DURATION_FOR_FALLBACK_MS: i64 = 10_000;

/// How much trailing pre-meeting audio/video the fallback keeps, to hide the
/// "joining" phase of a premature shutdown.
pub const FALLBACK_TRAILING_WINDOW_MS: i64 = 5_000;

/// Longest single chunk, in seconds.
pub const MAX_CHUNK_DURATION_SECS: f64 = 3600.0;

/// The raw cross-correlation output: where the tone was located in each track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneOffsets {
    pub audio_tone_time_secs: f64,
    pub video_tone_time_secs: f64,
}

/// The fully resolved trim plan (§3 of the specification).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimPlan {
    pub video_tone_time_secs: f64,
    pub audio_tone_time_secs: f64,
    pub audio_padding_secs: f64,
    pub trim_start_secs: f64,
    pub final_duration_secs: f64,
}

impl TrimPlan {
    /// Builds the padding/trim-start portion of the plan from tone offsets and
    /// meeting timing. `final_duration_secs` is filled in separately once
    /// track durations are known (see [`TrimPlan::with_final_duration`]),
    /// because that step depends on probing the (possibly just-padded) audio
    /// file.
    pub fn from_offsets(
        offsets: ToneOffsets,
        recording_start_ms: i64,
        meeting_start_ms: i64,
    ) -> Self {
        let audio_padding_secs = offsets.video_tone_time_secs - offsets.audio_tone_time_secs;
        let trim_start_secs = offsets.video_tone_time_secs
            + (meeting_start_ms - recording_start_ms - FLASH_SCREEN_SLEEP_MS) as f64 / 1000.0;

        Self {
            video_tone_time_secs: offsets.video_tone_time_secs,
            audio_tone_time_secs: offsets.audio_tone_time_secs,
            audio_padding_secs,
            trim_start_secs,
            final_duration_secs: 0.0,
        }
    }

    /// Resolves `finalDuration = min(videoDuration - trimStart, audioDuration)`.
    pub fn with_final_duration(mut self, video_duration_secs: f64, audio_duration_secs: f64) -> Self {
        let video_bound = video_duration_secs - self.trim_start_secs;
        self.final_duration_secs = video_bound.min(audio_duration_secs);
        self
    }
}

/// Per-session output paths, content-addressed by [`BotId`].
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub bot_id: BotId,
    pub final_video: Option<std::path::PathBuf>,
    pub final_audio: std::path::PathBuf,
    pub chunks: Vec<std::path::PathBuf>,
    pub screenshots: Vec<std::path::PathBuf>,
}

impl ArtifactSet {
    pub fn chunk_filename(bot_id: &BotId, index: usize) -> String {
        format!("{bot_id}-{index}.wav")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_mode_round_trips_through_display_and_from_str() {
        assert_eq!(CaptureMode::from_str("audio-only").unwrap(), CaptureMode::AudioOnly);
        assert_eq!(CaptureMode::from_str("audio+video").unwrap(), CaptureMode::AudioVideo);
        assert!(CaptureMode::from_str("bogus").is_err());
    }

    #[test]
    fn trim_plan_scenario_clean_video_session() {
        // Scenario 1 from the testable-properties section.
        let offsets = ToneOffsets {
            audio_tone_time_secs: 7.05,
            video_tone_time_secs: 7.20,
        };
        let plan = TrimPlan::from_offsets(offsets, 1_000_000, 1_010_000);

        assert!((plan.audio_padding_secs - 0.150).abs() < 1e-9);
        assert!((plan.trim_start_secs - 11.20).abs() < 1e-9);
    }

    #[test]
    fn trim_plan_scenario_video_slightly_behind() {
        // Scenario 2: audio ahead of video -> negative padding (trim audio head).
        let offsets = ToneOffsets {
            audio_tone_time_secs: 7.10,
            video_tone_time_secs: 6.90,
        };
        let plan = TrimPlan::from_offsets(offsets, 0, 0);
        assert!((plan.audio_padding_secs - (-0.200)).abs() < 1e-9);
    }

    #[test]
    fn final_duration_is_bounded_by_both_tracks() {
        let offsets = ToneOffsets {
            audio_tone_time_secs: 7.05,
            video_tone_time_secs: 7.20,
        };
        let plan = TrimPlan::from_offsets(offsets, 1_000_000, 1_010_000)
            .with_final_duration(100.0, 80.0);
        // video_bound = 100 - 11.20 = 88.80, audio = 80.0 -> min is 80.0
        assert!((plan.final_duration_secs - 80.0).abs() < 1e-9);
    }

    #[test]
    fn chunk_filename_matches_bot_id_index_pattern() {
        let bot = BotId::new("bot-42");
        assert_eq!(ArtifactSet::chunk_filename(&bot, 0), "bot-42-0.wav");
        assert_eq!(ArtifactSet::chunk_filename(&bot, 7), "bot-42-7.wav");
    }
}
