//! The typed event channel replacing ad-hoc named events (§9 Design Notes).

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::EngineError;

/// Tagged events observable by the enclosing meeting state machine.
#[derive(Debug)]
pub enum SessionEvent {
    Started {
        output_path: PathBuf,
        is_audio_only: bool,
    },
    Stopped,
    Error {
        kind: &'static str,
        cause: String,
    },
}

impl SessionEvent {
    pub fn error(err: &EngineError) -> Self {
        SessionEvent::Error {
            kind: error_kind(err),
            cause: err.to_string(),
        }
    }
}

fn error_kind(err: &EngineError) -> &'static str {
    match err {
        EngineError::DeviceNotReady(_) => "DeviceNotReady",
        EngineError::CaptureStartError(_) => "CaptureStartError",
        EngineError::CaptureAbort { .. } => "CaptureAbort",
        EngineError::SyncFailure(_) => "SyncFailure",
        EngineError::BotRemovedTooEarly { .. } => "BotRemovedTooEarly",
        EngineError::PostProcessFailure { .. } => "PostProcessFailure",
        EngineError::ChunkUploadFailure { .. } => "UploadFailure",
        EngineError::FinalUploadFailure { .. } => "UploadFailure",
        EngineError::CleanupTimeout { .. } => "CleanupTimeout",
        EngineError::CleanupStepTimeout { .. } => "CleanupStepTimeout",
        EngineError::ToolUnavailable(_) => "ToolUnavailable",
        EngineError::Io(_) => "Io",
        EngineError::Json(_) => "Json",
        EngineError::Other(_) => "Other",
    }
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_event_carries_the_right_kind_tag() {
        let err = EngineError::BotRemovedTooEarly { duration_ms: 500 };
        let event = SessionEvent::error(&err);
        match event {
            SessionEvent::Error { kind, .. } => assert_eq!(kind, "BotRemovedTooEarly"),
            _ => panic!("expected Error variant"),
        }
    }

    #[tokio::test]
    async fn events_are_delivered_in_send_order() {
        let (tx, mut rx) = channel();
        tx.send(SessionEvent::Started {
            output_path: PathBuf::from("/tmp/out.mp4"),
            is_audio_only: false,
        })
        .unwrap();
        tx.send(SessionEvent::Stopped).unwrap();

        assert!(matches!(rx.recv().await, Some(SessionEvent::Started { .. })));
        assert!(matches!(rx.recv().await, Some(SessionEvent::Stopped)));
    }
}
