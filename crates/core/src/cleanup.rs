//! Cleanup Coordinator (C5): §4.5 shutdown sequence.
//!
//! Grounded on the teacher's `commands/record.rs` cancel-signal handling
//! (swallowed `remove_file` errors, `tracing::warn!` on a timed-out wait
//! that "continues anyway" rather than failing the whole operation) —
//! generalized from one file-based signal check into a staged, timeout-
//! bounded shutdown of several independent collaborators.
//!
//! The dialog observer, speakers observer, HTML cleaner, branding
//! subprocess, in-process media contexts, and browser page/context are all
//! out of scope per the specification (browser-automation and UI layers);
//! each is represented here only through a small trait so the coordinator
//! can drive them without depending on their concrete implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::capture_session::CaptureSession;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::streaming_sink::StreamingSink;

/// A best-effort shutdown step with no return value worth inspecting: the
/// coordinator only cares whether it finished within its deadline.
#[async_trait]
pub trait ShutdownStep: Send + Sync {
    async fn stop(&self);
}

/// A step that does nothing — the default for any collaborator the caller
/// hasn't wired up.
pub struct NoopStep;

#[async_trait]
impl ShutdownStep for NoopStep {
    async fn stop(&self) {}
}

/// Everything the cleanup coordinator needs besides the capture session and
/// streaming sink, which the engine already owns directly.
pub struct CleanupCollaborators {
    pub dialog_observer: Arc<dyn ShutdownStep>,
    pub speakers_observer: Arc<dyn ShutdownStep>,
    pub html_cleaner: Arc<dyn ShutdownStep>,
    pub branding_process: Arc<dyn ShutdownStep>,
    pub media_contexts: Arc<dyn ShutdownStep>,
    pub browser_page: Arc<dyn ShutdownStep>,
    pub meeting_timers: Arc<dyn ShutdownStep>,
}

impl Default for CleanupCollaborators {
    fn default() -> Self {
        Self {
            dialog_observer: Arc::new(NoopStep),
            speakers_observer: Arc::new(NoopStep),
            html_cleaner: Arc::new(NoopStep),
            branding_process: Arc::new(NoopStep),
            media_contexts: Arc::new(NoopStep),
            browser_page: Arc::new(NoopStep),
            meeting_timers: Arc::new(NoopStep),
        }
    }
}

/// Runs a step under `config.cleanup_step_timeout`, logging and continuing
/// past a miss rather than failing the whole sequence (§4.5: "any failure
/// short-circuits to the terminal state; cleanup never loops" — a per-step
/// timeout is not treated as a failure, it's forced progress).
async fn run_step_bounded(name: &str, timeout: Duration, step: Arc<dyn ShutdownStep>) {
    if tokio::time::timeout(timeout, step.stop()).await.is_err() {
        let err = EngineError::CleanupStepTimeout { step: name.to_string() };
        tracing::warn!(error = %err, "forcing progress past timed-out cleanup step");
    }
}

/// Drives the full shutdown sequence (§4.5) under a single global timeout.
/// Never returns an error for an individual collaborator's failure or
/// slowness; only the overall deadline expiring is surfaced, and even then
/// the coordinator has already forced the terminal state.
pub async fn run(
    config: &EngineConfig,
    capture: &CaptureSession,
    sink: &Arc<dyn StreamingSink>,
    collaborators: &CleanupCollaborators,
) -> Result<()> {
    let _ = sink; // fanned-out stdout consumer stops itself when the capture subprocess exits

    let outcome = tokio::time::timeout(config.cleanup_timeout, async {
        // Step 0: best-effort, non-blocking. Its own timeout is short and
        // its failure is never allowed to delay step 1.
        run_step_bounded(
            "dialog_observer",
            config.cleanup_step_timeout,
            Arc::clone(&collaborators.dialog_observer),
        )
        .await;

        // Step 1: priority stop, awaited to completion. This is what drives
        // post-processing and uploads, so it gets the full remaining budget
        // rather than the per-step timeout.
        if let Err(e) = capture.stop().await {
            tracing::error!(error = %e, "capture session stop returned an error during cleanup");
        }

        // Step 2: parallel, best-effort, each under its own deadline.
        tokio::join!(
            run_step_bounded(
                "speakers_observer",
                config.cleanup_step_timeout,
                Arc::clone(&collaborators.speakers_observer),
            ),
            run_step_bounded(
                "html_cleaner",
                config.cleanup_step_timeout,
                Arc::clone(&collaborators.html_cleaner),
            ),
        );

        // Step 3: sequential, after the parallel steps complete.
        run_step_bounded(
            "branding_process",
            config.cleanup_step_timeout,
            Arc::clone(&collaborators.branding_process),
        )
        .await;
        run_step_bounded(
            "media_contexts",
            config.cleanup_step_timeout,
            Arc::clone(&collaborators.media_contexts),
        )
        .await;
        run_step_bounded(
            "browser_page",
            config.cleanup_step_timeout,
            Arc::clone(&collaborators.browser_page),
        )
        .await;
        run_step_bounded(
            "meeting_timers",
            config.cleanup_step_timeout,
            Arc::clone(&collaborators.meeting_timers),
        )
        .await;
    })
    .await;

    if outcome.is_err() {
        let elapsed_ms = config.cleanup_timeout.as_millis() as u64;
        tracing::error!(elapsed_ms, "cleanup sequence exceeded its global timeout");
        return Err(EngineError::CleanupTimeout { elapsed_ms });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStep {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl ShutdownStep for CountingStep {
        async fn stop(&self) {
            tokio::time::sleep(self.delay).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn a_slow_step_times_out_without_blocking_the_sequence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = Arc::new(CountingStep { calls: Arc::clone(&calls), delay: Duration::from_secs(10) });

        let started = std::time::Instant::now();
        run_step_bounded("slow", Duration::from_millis(20), slow).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_fast_step_completes_and_is_counted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fast = Arc::new(CountingStep { calls: Arc::clone(&calls), delay: Duration::from_millis(1) });

        run_step_bounded("fast", Duration::from_secs(1), fast).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_collaborators_are_all_noop() {
        let _ = CleanupCollaborators::default();
    }
}
