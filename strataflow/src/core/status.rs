//! Stage and session status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The progress status of one stage within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not been launched.
    #[default]
    Pending,
    /// Stage is executing against the remote agent.
    Running,
    /// Stage produced a result.
    Completed,
    /// Stage failed, timed out or was cancelled.
    Error,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Returns true if moving from `self` to `next` keeps the status monotonic.
    ///
    /// `pending -> error` is allowed for stages that are abandoned before launch.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Error)
                | (Self::Running, Self::Completed | Self::Error)
        )
    }
}

/// The overall status of a pipeline session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Phases are still executing.
    #[default]
    Running,
    /// Every stage completed.
    Completed,
    /// All phases ran, at least one stage failed.
    CompletedWithErrors,
    /// The session was cancelled by its caller.
    Cancelled,
    /// The background run itself crashed.
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithErrors => write!(f, "completed_with_errors"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl SessionStatus {
    /// Returns true once the session will no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Pending.to_string(), "pending");
        assert_eq!(StageStatus::Running.to_string(), "running");
        assert_eq!(StageStatus::Completed.to_string(), "completed");
        assert_eq!(StageStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_stage_status_transitions_are_monotonic() {
        use StageStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Error));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Error));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Error));
        assert!(!Error.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Running));
    }

    #[test]
    fn test_session_status_serialize() {
        let json = serde_json::to_string(&SessionStatus::CompletedWithErrors).unwrap();
        assert_eq!(json, r#""completed_with_errors""#);

        let back: SessionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SessionStatus::CompletedWithErrors);
        assert!(back.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
    }
}
