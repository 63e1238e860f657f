pub mod audio_utils;
pub mod capture_session;
pub mod cleanup;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod logging;
pub mod media_tool;
pub mod output;
pub mod post_processor;
pub mod streaming_sink;
pub mod sync_planner;
pub mod upload;

pub use error::Result;
pub use output::UserOutput;

use std::sync::Arc;

use capture_session::{CaptureSession, NoopToneRequester, SyncToneRequester};
use cleanup::CleanupCollaborators;
use config::EngineConfig;
use domain::BotId;
use events::EventReceiver;
use streaming_sink::{NullSink, StreamingSink};

/// Top-level facade: owns one [`CaptureSession`] and exposes the two
/// operations the enclosing meeting state machine needs, `start`/`stop`,
/// plus the shutdown sequence via [`cleanup::run`]. One `Engine` is created
/// per bot join; it is not reused across meetings.
pub struct Engine {
    config: Arc<EngineConfig>,
    session: CaptureSession,
    sink: Arc<dyn StreamingSink>,
    collaborators: CleanupCollaborators,
}

impl Engine {
    /// Builds an `Engine` with the given configuration and collaborators. Use
    /// [`events::channel`] to construct the event pair; the receiver is
    /// handed back to the caller so it can observe `Started`/`Stopped`/`Error`.
    pub fn new(
        config: EngineConfig,
        sink: Arc<dyn StreamingSink>,
        tone_requester: Arc<dyn SyncToneRequester>,
        collaborators: CleanupCollaborators,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = events::channel();
        let config = Arc::new(config);
        let session = CaptureSession::new(Arc::clone(&config), Arc::clone(&sink), tone_requester, events);
        (
            Self { config, session, sink, collaborators },
            receiver,
        )
    }

    /// Convenience constructor wiring a [`NullSink`] and a no-op tone
    /// requester — useful for manual testing and examples where the live
    /// streaming/browser-automation collaborators aren't available.
    pub fn with_defaults(config: EngineConfig) -> (Self, EventReceiver) {
        Self::new(config, Arc::new(NullSink), Arc::new(NoopToneRequester), CleanupCollaborators::default())
    }

    pub async fn start(&self, bot_id: BotId) -> Result<()> {
        self.session.start(bot_id).await
    }

    /// Notifies the session of the meeting's actual start time, used to
    /// resolve the trim plan once the capture stops (§4.3).
    pub fn set_meeting_start_ms(&self, ms: i64) {
        self.session.set_meeting_start_ms(ms);
    }

    pub fn state(&self) -> domain::SessionState {
        self.session.state()
    }

    /// Stops the capture and runs it through the post-processing pipeline.
    /// Does not drive the cleanup coordinator's other collaborators — call
    /// [`Engine::shutdown`] for the full sequence.
    pub async fn stop(&self) -> Result<()> {
        self.session.stop().await
    }

    /// Drives the full shutdown sequence (§4.5): priority-stops the capture,
    /// then best-effort stops every other collaborator under bounded
    /// timeouts. Never panics or propagates an individual collaborator's
    /// failure; only an overall deadline miss is surfaced as an error.
    pub async fn shutdown(&self) -> Result<()> {
        cleanup::run(&self.config, &self.session, &self.sink, &self.collaborators).await
    }
}
