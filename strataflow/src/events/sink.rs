//! Event sink trait and implementations.

use super::PipelineEvent;
use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

/// Receives lifecycle events.
///
/// Emitting must never fail the pipeline; sinks swallow their own errors.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event: &PipelineEvent);
}

/// A sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &PipelineEvent) {}
}

/// A sink that logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        let event_type = event.event_type();
        let session_id = event.session_id();
        let stage = event.stage().unwrap_or("-");
        match (self.level, event) {
            (_, PipelineEvent::StageFailed { error, .. }) => {
                warn!(event_type, session_id, stage, error = %error, "Event: {}", event_type);
            }
            (Level::DEBUG | Level::TRACE, _) => {
                debug!(event_type, session_id, stage, event_data = ?event, "Event: {}", event_type);
            }
            _ => {
                info!(event_type, session_id, stage, "Event: {}", event_type);
            }
        }
    }
}

/// A sink that keeps every event, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SessionStatus;

    fn started(stage: &str) -> PipelineEvent {
        PipelineEvent::StageStarted {
            session_id: "s1".to_string(),
            stage: stage.to_string(),
            phase: 1,
        }
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit(&started("BLOC2")).await;
        LoggingEventSink::default().emit(&started("BLOC2")).await;
        LoggingEventSink::debug()
            .emit(&PipelineEvent::StageFailed {
                session_id: "s1".to_string(),
                stage: "BLOC2".to_string(),
                error_type: "StageFailed".to_string(),
                error: "boom".to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&started("BLOC2")).await;
        sink.emit(&started("BLOC3")).await;
        sink.emit(&PipelineEvent::SessionCompleted {
            session_id: "s1".to_string(),
            status: SessionStatus::Completed,
            failed_stages: Vec::new(),
        })
        .await;

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.events_of_type("session.").len(), 1);
        assert_eq!(sink.events()[0], started("BLOC2"));
    }
}
