//! Capture Session (C2).
//!
//! Owns the single long-lived capture subprocess. Grounded on the teacher's
//! `commands/record.rs` worker loop (state progression, signal-based stop)
//! and `recorder.rs`'s `RecordingHandle` (elapsed-time bookkeeping, stop
//! finalization) — translated from file-based cross-process signaling to
//! in-process `Arc<AtomicBool>`/`tokio::sync::Notify`, since §5 specifies a
//! single-process, multi-task cooperative model with no cross-process IPC.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::time::{timeout, Duration};

use crate::config::EngineConfig;
use crate::domain::{BotId, CaptureMode, SessionState, GRACE_PERIOD_SECONDS, HARD_KILL_FALLBACK_SECONDS};
use crate::error::{EngineError, Result};
use crate::events::{EventSender, SessionEvent};
use crate::streaming_sink::{bytes_to_f32_samples, StreamingSink};

/// Requests that the live page emit the embedded sync tone. Out of scope per
/// the specification (the browser-automation layer); referenced only through
/// this contract.
#[async_trait]
pub trait SyncToneRequester: Send + Sync {
    async fn request_tone(&self);
}

/// A requester that does nothing — useful in tests and when the tone is
/// injected out-of-band.
pub struct NoopToneRequester;

#[async_trait]
impl SyncToneRequester for NoopToneRequester {
    async fn request_tone(&self) {}
}

const FLASH_SCREEN_SLEEP: Duration = Duration::from_millis(6_000);
const DEVICE_READY_RETRIES: u32 = 15;
const DEVICE_READY_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const DEVICE_READY_DRY_RUN_DURATION: Duration = Duration::from_millis(100);

/// How a subprocess exit code should be classified (§4.2 process monitoring).
/// Pure and unit-testable independent of any real subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    Failure,
}

pub fn classify_exit(code: Option<i32>, grace_period_active: bool) -> ExitClass {
    match code {
        Some(0) => ExitClass::Success,
        Some(255) | Some(143) if grace_period_active => ExitClass::Success,
        _ => ExitClass::Failure,
    }
}

/// Builds the deterministic capture subprocess argument vector (§6).
pub fn build_capture_args(config: &EngineConfig) -> Vec<String> {
    let cfg = config;
    let mut args: Vec<String> = Vec::new();

    args.extend(["-f".into(), "x11grab".into(), "-video_size".into(), "1280x880".into()]);
    args.extend(["-i".into(), cfg.display_id.clone()]);
    args.extend(["-f".into(), "pulse".into(), "-i".into(), cfg.audio_source_id.clone()]);

    if cfg.mode.is_video() {
        args.extend([
            "-map".into(), "0:v".into(),
            "-vf".into(), "crop=1280:720:0:160".into(),
            "-c:v".into(), "libx264".into(),
            "-profile:v".into(), "main".into(),
            "-level".into(), "4.0".into(),
            "-crf".into(), "23".into(),
            "-preset".into(), "fast".into(),
            "-pix_fmt".into(), "yuv420p".into(),
            "-g".into(), "30".into(),
            "-keyint_min".into(), "30".into(),
            "-bf".into(), "0".into(),
            "-refs".into(), "1".into(),
            // Also embeds an audio track from the same source so the sync
            // planner (§4.3) has an audio signal to cross-correlate the tone
            // against inside raw.mp4, not just raw.wav.
            "-map".into(), "1:a".into(),
            "-c:a".into(), "aac".into(),
            "-b:a".into(), "192k".into(),
            "-avoid_negative_ts".into(), "make_zero".into(),
            "-f".into(), "mp4".into(),
            "-y".into(), cfg.raw_video_path().to_string_lossy().into_owned(),
        ]);
    }

    args.extend([
        "-map".into(), "1:a".into(),
        "-f".into(), "wav".into(),
        "-c:a".into(), "pcm_s16le".into(),
        "-ac".into(), "1".into(),
        "-ar".into(), "44100".into(),
        "-avoid_negative_ts".into(), "make_zero".into(),
        "-y".into(), cfg.raw_audio_path().to_string_lossy().into_owned(),
    ]);

    let ts = chrono::Utc::now().timestamp();
    args.extend([
        "-map".into(), "0:v".into(),
        "-vf".into(), "fps=1/5,crop=1280:720:0:160,scale=480:270".into(),
        "-q:v".into(), "3".into(),
        cfg.screenshot_pattern(ts).to_string_lossy().into_owned(),
    ]);

    args.extend([
        "-map".into(), "1:a".into(),
        "-f".into(), "f32le".into(),
        "-ac".into(), "1".into(),
        "-ar".into(), "24000".into(),
        "pipe:1".into(),
    ]);

    args
}

async fn probe_source_listed(audio_source_id: &str) -> bool {
    let output = tokio::process::Command::new("pactl")
        .args(["list", "short", "sources"])
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(o) if o.status.success() => {
            String::from_utf8_lossy(&o.stdout).lines().any(|l| l.contains(audio_source_id))
        }
        _ => false,
    }
}

async fn probe_dry_run_capture(config: &EngineConfig) -> bool {
    let dry_run_path = config.temp_dir().join(".device_probe.wav");
    let result = Command::new("ffmpeg")
        .args([
            "-f", "pulse",
            "-i", &config.audio_source_id,
            "-t", &format!("{}", DEVICE_READY_DRY_RUN_DURATION.as_secs_f64()),
            "-y", &dry_run_path.to_string_lossy(),
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false);

    let _ = std::fs::remove_file(&dry_run_path);
    result
}

/// Device readiness probe (§4.2): up to 15 retries at 1s intervals, falling
/// back to a 100ms dry-run capture.
async fn wait_for_device_ready(config: &EngineConfig) -> Result<()> {
    for attempt in 0..DEVICE_READY_RETRIES {
        if probe_source_listed(&config.audio_source_id).await {
            return Ok(());
        }
        if attempt + 1 < DEVICE_READY_RETRIES {
            tokio::time::sleep(DEVICE_READY_RETRY_INTERVAL).await;
        }
    }

    if probe_dry_run_capture(config).await {
        return Ok(());
    }

    Err(EngineError::DeviceNotReady(config.audio_source_id.clone()))
}

/// Owns the single long-lived capture subprocess for one session. Only one
/// `start()` is ever expected per instance (§5: construction is lazy and
/// exactly-once, owned by the enclosing meeting controller as an explicit
/// handle rather than ambient global state).
pub struct CaptureSession {
    config: Arc<EngineConfig>,
    sink: Arc<dyn StreamingSink>,
    tone_requester: Arc<dyn SyncToneRequester>,
    events: EventSender,

    state: Arc<Mutex<SessionState>>,
    grace_period_active: Arc<AtomicBool>,
    recording_start_ms: AtomicI64,
    /// Shared with the exit monitor so a `set_meeting_start_ms` call made
    /// mid-meeting is visible at exit time, not just whatever value was live
    /// when the monitor task was spawned.
    meeting_start_ms: Arc<AtomicI64>,
    stopped_notify: Arc<Notify>,
    /// 0 means "no child spawned yet". The exit-monitor task owns the actual
    /// `Child` handle outright (moved in at spawn time) so it can `.wait()`
    /// on it without contending with `stop()`; `stop()` only ever needs the
    /// raw pid to signal it directly.
    child_pid: Arc<AtomicU32>,
}

impl CaptureSession {
    pub fn new(
        config: Arc<EngineConfig>,
        sink: Arc<dyn StreamingSink>,
        tone_requester: Arc<dyn SyncToneRequester>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            sink,
            tone_requester,
            events,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            grace_period_active: Arc::new(AtomicBool::new(false)),
            recording_start_ms: AtomicI64::new(0),
            meeting_start_ms: Arc::new(AtomicI64::new(0)),
            stopped_notify: Arc::new(Notify::new()),
            child_pid: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Called externally once the meeting-joining layer observes the meeting
    /// actually starting. May be called any time before `stop()`.
    pub fn set_meeting_start_ms(&self, ms: i64) {
        self.meeting_start_ms.store(ms, Ordering::SeqCst);
    }

    pub fn recording_start_ms(&self) -> i64 {
        self.recording_start_ms.load(Ordering::SeqCst)
    }

    pub fn meeting_start_ms(&self) -> i64 {
        self.meeting_start_ms.load(Ordering::SeqCst)
    }

    /// Starts the capture (§4.2). Requires `state == Idle`.
    pub async fn start(&self, bot_id: BotId) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Idle {
                return Err(EngineError::CaptureStartError("session is not idle".to_string()));
            }
            *state = SessionState::WaitingForDevices;
        }

        self.config.ensure_directories()?;

        if let Err(e) = wait_for_device_ready(&self.config).await {
            *self.state.lock().unwrap() = SessionState::StoppedFailure;
            let _ = self.events.send(SessionEvent::error(&e));
            return Err(e);
        }

        let args = build_capture_args(&self.config);
        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::CaptureStartError(format!("failed to spawn capture subprocess: {e}")))?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        self.recording_start_ms.store(now_ms, Ordering::SeqCst);
        *self.state.lock().unwrap() = SessionState::Running;

        if let Some(pid) = child.id() {
            self.child_pid.store(pid, Ordering::SeqCst);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(stdout) = stdout {
            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                fan_out_stream(stdout, sink).await;
            });
        }

        if let Some(mut stderr) = stderr {
            tokio::spawn(async move {
                use tokio::io::AsyncBufReadExt;
                let mut lines = tokio::io::BufReader::new(&mut stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.to_lowercase().contains("error") {
                        tracing::error!("capture stderr: {line}");
                    }
                }
            });
        }

        let output_path = if self.config.mode.is_video() {
            self.config.raw_video_path()
        } else {
            self.config.raw_audio_path()
        };
        let _ = self.events.send(SessionEvent::Started {
            output_path,
            is_audio_only: !self.config.mode.is_video(),
        });

        self.spawn_exit_monitor(child, bot_id);

        let tone_requester = Arc::clone(&self.tone_requester);
        tokio::spawn(async move {
            tokio::time::sleep(FLASH_SCREEN_SLEEP).await;
            tone_requester.request_tone().await;
        });

        Ok(())
    }

    fn spawn_exit_monitor(&self, mut child: tokio::process::Child, bot_id: BotId) {
        let grace_period_active = Arc::clone(&self.grace_period_active);
        let config = Arc::clone(&self.config);
        let events = self.events.clone();
        let stopped_notify = Arc::clone(&self.stopped_notify);
        let state = Arc::clone(&self.state);
        let recording_start_ms = self.recording_start_ms();
        let meeting_start_ms_cell = Arc::clone(&self.meeting_start_ms);

        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(_) => None,
            };

            let class = classify_exit(exit_code, grace_period_active.load(Ordering::SeqCst));

            match class {
                ExitClass::Success => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    let meeting_start_ms = meeting_start_ms_cell.load(Ordering::SeqCst);

                    let result = run_post_processing(
                        &config,
                        bot_id,
                        recording_start_ms,
                        meeting_start_ms,
                        now_ms,
                    )
                    .await;

                    let final_state = if result.is_ok() {
                        SessionState::StoppedSuccess
                    } else {
                        SessionState::StoppedFailure
                    };
                    *state.lock().unwrap() = final_state;

                    if let Err(e) = result {
                        let _ = events.send(SessionEvent::error(&e));
                    }
                }
                ExitClass::Failure => {
                    *state.lock().unwrap() = SessionState::StoppedFailure;
                    let err = EngineError::CaptureAbort { code: exit_code.unwrap_or(-1) };
                    let _ = events.send(SessionEvent::error(&err));
                }
            }

            let _ = events.send(SessionEvent::Stopped);
            stopped_notify.notify_waiters();
        });
    }

    /// Stops the capture (§4.2). Idempotent: a no-op when not running. Resolves
    /// only after `Stopped` has been emitted, i.e. after post-processing
    /// completes (or the failure is classified).
    pub async fn stop(&self) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if *state != SessionState::Running {
                return Ok(());
            }
        }
        *self.state.lock().unwrap() = SessionState::Stopping;
        self.grace_period_active.store(true, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(GRACE_PERIOD_SECONDS)).await;

        let pid = self.child_pid.load(Ordering::SeqCst);
        if pid != 0 {
            send_signal(pid, Signal::Term);
        }

        // Register as a waiter *before* issuing the hard kill: `notify_waiters`
        // only wakes futures already registered, so constructing this after
        // the kill would race the exit-monitor task's own `notify_waiters`
        // call and could hang forever.
        let hard_kill_deadline = Duration::from_secs(HARD_KILL_FALLBACK_SECONDS);
        let stopped = self.stopped_notify.notified();

        if timeout(hard_kill_deadline, stopped).await.is_err() {
            let post_kill_notified = self.stopped_notify.notified();
            if pid != 0 {
                send_signal(pid, Signal::Kill);
            }
            // The exit monitor task still owns `child.wait()` and will observe
            // the kill, classify it as abnormal, and notify `stopped_notify`
            // itself; we don't notify here to avoid double-emitting `Stopped`.
            post_kill_notified.await;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    unsafe {
        libc::kill(pid as i32, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) {}

async fn fan_out_stream(mut stdout: impl tokio::io::AsyncRead + Unpin, sink: Arc<dyn StreamingSink>) {
    let mut buf = vec![0u8; 16 * 1024];
    // Pipe reads aren't guaranteed to land on 4-byte sample boundaries, so a
    // trailing partial sample from one read is carried over and prepended to
    // the next rather than dropped, which would permanently misalign every
    // sample for the rest of the stream.
    let mut carry: Vec<u8> = Vec::new();
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                carry.extend_from_slice(&buf[..n]);
                let complete_len = carry.len() - (carry.len() % 4);
                let samples = bytes_to_f32_samples(&carry[..complete_len]);
                carry.drain(..complete_len);
                sink.push_samples(&samples).await;
            }
            Err(_) => break,
        }
    }
}

async fn run_post_processing(
    config: &EngineConfig,
    bot_id: BotId,
    recording_start_ms: i64,
    meeting_start_ms: i64,
    now_ms: i64,
) -> Result<()> {
    use crate::post_processor;
    use crate::sync_planner;
    use crate::upload::HttpUploader;

    let uploader = HttpUploader::new("http://object-storage.invalid");

    match config.mode {
        CaptureMode::AudioOnly => {
            post_processor::process(config, &bot_id, config.mode, None, &uploader).await?;
        }
        CaptureMode::AudioVideo => {
            let plan = sync_planner::plan_trim(
                &config.raw_audio_path(),
                &config.raw_video_path(),
                recording_start_ms,
                meeting_start_ms,
                now_ms,
            )
            .await?;
            post_processor::process(config, &bot_id, config.mode, Some(&plan), &uploader).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_zero_is_always_success() {
        assert_eq!(classify_exit(Some(0), false), ExitClass::Success);
        assert_eq!(classify_exit(Some(0), true), ExitClass::Success);
    }

    #[test]
    fn signal_terminated_codes_succeed_only_during_grace_period() {
        // Boundary: exit 143 with grace flag unset -> CaptureAbort (failure).
        assert_eq!(classify_exit(Some(143), false), ExitClass::Failure);
        assert_eq!(classify_exit(Some(143), true), ExitClass::Success);
        assert_eq!(classify_exit(Some(255), false), ExitClass::Failure);
        assert_eq!(classify_exit(Some(255), true), ExitClass::Success);
    }

    #[test]
    fn other_codes_always_fail() {
        assert_eq!(classify_exit(Some(1), true), ExitClass::Failure);
        assert_eq!(classify_exit(None, true), ExitClass::Failure);
    }

    #[test]
    fn audio_only_args_omit_raw_video_output() {
        let config = EngineConfig::new("/tmp/capture-args-test", CaptureMode::AudioOnly);
        let args = build_capture_args(&config);
        assert!(!args.iter().any(|a| a == "raw.mp4" || a.ends_with("raw.mp4")));
        assert!(args.iter().any(|a| a.ends_with("raw.wav")));
    }

    #[test]
    fn video_mode_args_include_all_four_outputs() {
        let config = EngineConfig::new("/tmp/capture-args-test-2", CaptureMode::AudioVideo);
        let args = build_capture_args(&config);
        assert!(args.iter().any(|a| a.ends_with("raw.mp4")));
        assert!(args.iter().any(|a| a.ends_with("raw.wav")));
        assert!(args.iter().any(|a| a == "pipe:1"));
    }

    #[test]
    fn raw_mp4_output_maps_an_audio_track_for_the_sync_planner() {
        let config = EngineConfig::new("/tmp/capture-args-test-3", CaptureMode::AudioVideo);
        let args = build_capture_args(&config);
        // Three distinct outputs map stream 1:a: the embedded raw.mp4 audio
        // track, the standalone raw.wav, and the f32le streaming pipe.
        let audio_maps = args.windows(2).filter(|w| w[0] == "-map" && w[1] == "1:a").count();
        assert_eq!(audio_maps, 3);

        // The video output's option block (terminated by the raw.mp4 filename)
        // must itself contain an audio codec, not just a bare video copy.
        let mp4_index = args.iter().position(|a| a.ends_with("raw.mp4")).unwrap();
        assert!(args[..mp4_index].iter().any(|a| a == "aac"));
    }

    struct ChunkedReader {
        chunks: std::collections::VecDeque<Vec<u8>>,
    }

    impl tokio::io::AsyncRead for ChunkedReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if let Some(chunk) = self.chunks.pop_front() {
                buf.put_slice(&chunk);
            }
            std::task::Poll::Ready(Ok(()))
        }
    }

    struct CollectingSink {
        samples: Mutex<Vec<f32>>,
    }

    #[async_trait]
    impl StreamingSink for CollectingSink {
        async fn push_samples(&self, samples: &[f32]) {
            self.samples.lock().unwrap().extend_from_slice(samples);
        }
    }

    #[tokio::test]
    async fn fan_out_stream_carries_partial_samples_across_reads() {
        // 1.5 and 2.5 samples' worth of bytes split across two reads; no byte
        // total is a multiple of 4 on its own, but the full stream is.
        let samples = [1.0f32, 2.0, 3.0, 4.0];
        let mut all_bytes = Vec::new();
        for s in samples {
            all_bytes.extend_from_slice(&s.to_le_bytes());
        }
        let mid = 6; // splits sample 1 in half
        let reader = ChunkedReader {
            chunks: std::collections::VecDeque::from([
                all_bytes[..mid].to_vec(),
                all_bytes[mid..].to_vec(),
                Vec::new(),
            ]),
        };

        let sink = Arc::new(CollectingSink { samples: Mutex::new(Vec::new()) });
        fan_out_stream(reader, sink.clone()).await;

        assert_eq!(*sink.samples.lock().unwrap(), samples);
    }
}
