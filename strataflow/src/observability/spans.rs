//! Spans carrying session and stage identifiers.

use std::time::Instant;
use tracing::Span;

/// Span wrapping all work of one session.
#[must_use]
pub fn session_span(session_id: &str) -> Span {
    tracing::info_span!("session", session_id = %session_id)
}

/// Span wrapping one stage execution.
#[must_use]
pub fn stage_span(session_id: &str, stage_id: &str, phase: usize) -> Span {
    tracing::info_span!("stage", session_id = %session_id, stage = %stage_id, phase)
}

/// Wall-clock timer for a stage or session.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in whole milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the timer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("BLOC1");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5);
        assert_eq!(timer.name(), "BLOC1");
    }
}
