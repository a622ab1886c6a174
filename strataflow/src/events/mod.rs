//! Session lifecycle events.
//!
//! The orchestrator reports session and stage transitions to an injected
//! [`EventSink`]. Sinks observe only; they cannot influence execution.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::SessionStatus;
use serde::Serialize;

/// A lifecycle event emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A session was created.
    #[serde(rename = "session.started")]
    SessionStarted {
        /// Session id.
        session_id: String,
        /// Stages scheduled for the session.
        stages: Vec<String>,
        /// Number of phases in the plan.
        phases: usize,
    },
    /// A stage was launched.
    #[serde(rename = "stage.started")]
    StageStarted {
        /// Session id.
        session_id: String,
        /// Stage id.
        stage: String,
        /// Phase index of the stage.
        phase: usize,
    },
    /// A stage produced a result.
    #[serde(rename = "stage.completed")]
    StageCompleted {
        /// Session id.
        session_id: String,
        /// Stage id.
        stage: String,
        /// Wall-clock time of the stage.
        elapsed_ms: u64,
        /// Whether the reply needed repair.
        repaired: bool,
    },
    /// A stage ended in error.
    #[serde(rename = "stage.failed")]
    StageFailed {
        /// Session id.
        session_id: String,
        /// Stage id.
        stage: String,
        /// Error kind.
        error_type: String,
        /// Error message.
        error: String,
    },
    /// A session was finalized.
    #[serde(rename = "session.completed")]
    SessionCompleted {
        /// Session id.
        session_id: String,
        /// Final status.
        status: SessionStatus,
        /// Stages that ended in error.
        failed_stages: Vec<String>,
    },
}

impl PipelineEvent {
    /// Returns the dotted event type, e.g. `stage.completed`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageFailed { .. } => "stage.failed",
            Self::SessionCompleted { .. } => "session.completed",
        }
    }

    /// Returns the session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::StageStarted { session_id, .. }
            | Self::StageCompleted { session_id, .. }
            | Self::StageFailed { session_id, .. }
            | Self::SessionCompleted { session_id, .. } => session_id,
        }
    }

    /// Returns the stage the event is about, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageStarted { stage, .. }
            | Self::StageCompleted { stage, .. }
            | Self::StageFailed { stage, .. } => Some(stage),
            Self::SessionStarted { .. } | Self::SessionCompleted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_dotted_type() {
        let event = PipelineEvent::StageFailed {
            session_id: "s1".to_string(),
            stage: "BLOC3".to_string(),
            error_type: "StageTimeout".to_string(),
            error: "Stage 'BLOC3' timed out after 300s".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], json!("stage.failed"));
        assert_eq!(value["stage"], json!("BLOC3"));
        assert_eq!(event.event_type(), "stage.failed");
        assert_eq!(event.stage(), Some("BLOC3"));
    }

    #[test]
    fn test_session_events_have_no_stage() {
        let event = PipelineEvent::SessionCompleted {
            session_id: "s1".to_string(),
            status: SessionStatus::Completed,
            failed_stages: Vec::new(),
        };
        assert_eq!(event.stage(), None);
        assert_eq!(event.session_id(), "s1");
    }
}
