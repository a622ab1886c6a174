//! Session progress tracking.
//!
//! The orchestrator writes every stage transition through a
//! [`ProgressStore`]; status callers read deep copies with
//! [`ProgressStore::snapshot`]. Stage statuses only move forward:
//! `pending -> running -> completed | error`, or `pending -> error` for
//! stages abandoned before launch.

mod memory;

pub use memory::InMemoryProgressStore;

use crate::core::{Questionnaire, SessionStatus, StageResult, StageStatus};
use crate::errors::ProgressError;
use crate::pipeline::FailureRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A status change for one stage.
#[derive(Debug, Clone)]
pub enum StageUpdate {
    /// The stage was launched.
    Running,
    /// The stage produced a result.
    Completed(Arc<StageResult>),
    /// The stage failed, timed out, was cancelled or never launched.
    Failed(FailureRecord),
}

impl StageUpdate {
    /// Returns the status this update moves the stage to.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        match self {
            Self::Running => StageStatus::Running,
            Self::Completed(_) => StageStatus::Completed,
            Self::Failed(_) => StageStatus::Error,
        }
    }
}

/// Recorded state of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageState {
    /// The stage identifier.
    pub stage_id: String,
    /// Current status.
    pub status: StageStatus,
    /// The result, present exactly when `status` is completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<StageResult>>,
    /// The failure, present exactly when `status` is error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureRecord>,
    /// When the stage was launched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageState {
    /// Creates a pending stage.
    #[must_use]
    pub fn pending(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Applies an update, rejecting backward or repeated transitions.
    pub fn apply(&mut self, update: StageUpdate) -> Result<(), ProgressError> {
        let next = update.status();
        if !self.status.can_transition_to(next) {
            return Err(ProgressError::InvalidTransition {
                stage: self.stage_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        match update {
            StageUpdate::Running => self.started_at = Some(now),
            StageUpdate::Completed(result) => {
                self.result = Some(result);
                self.finished_at = Some(now);
            }
            StageUpdate::Failed(record) => {
                self.error = Some(record);
                self.finished_at = Some(now);
            }
        }
        self.status = next;
        Ok(())
    }
}

/// Snapshot of one pipeline session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    /// The session identifier.
    pub session_id: String,
    /// The questionnaire the session was started with.
    pub questionnaire: Arc<Questionnaire>,
    /// Overall status.
    pub status: SessionStatus,
    /// Per-stage state, keyed by stage id.
    pub stages: BTreeMap<String, StageState>,
    /// Share of stages completed successfully, 0 to 100.
    pub progress_percent: f64,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was finalized.
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Creates a running session with every stage pending.
    #[must_use]
    pub fn new<S: AsRef<str>>(
        session_id: impl Into<String>,
        questionnaire: Arc<Questionnaire>,
        stage_ids: &[S],
    ) -> Self {
        Self {
            session_id: session_id.into(),
            questionnaire,
            status: SessionStatus::Running,
            stages: stage_ids
                .iter()
                .map(|id| (id.as_ref().to_string(), StageState::pending(id.as_ref())))
                .collect(),
            progress_percent: 0.0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Returns the status of a stage.
    #[must_use]
    pub fn stage_status(&self, stage_id: &str) -> Option<StageStatus> {
        self.stages.get(stage_id).map(|s| s.status)
    }

    /// Returns the results of every completed stage.
    #[must_use]
    pub fn completed_results(&self) -> BTreeMap<String, Arc<StageResult>> {
        self.stages
            .iter()
            .filter_map(|(id, s)| s.result.clone().map(|r| (id.clone(), r)))
            .collect()
    }

    /// Returns the failure of every stage in error.
    #[must_use]
    pub fn failures(&self) -> Vec<&FailureRecord> {
        self.stages.values().filter_map(|s| s.error.as_ref()).collect()
    }

    /// Returns true once the session has been finalized.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Recomputes `progress_percent` from the stage statuses.
    ///
    /// Only completed stages count; a stage in error never reaches 100%.
    pub fn refresh_progress(&mut self) {
        let total = self.stages.len();
        if total == 0 {
            self.progress_percent = 100.0;
            return;
        }
        let done = self
            .stages
            .values()
            .filter(|s| s.status == StageStatus::Completed)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let percent = (done as f64 / total as f64) * 100.0;
        self.progress_percent = (percent * 10.0).round() / 10.0;
    }
}

/// Storage for session state.
///
/// Implementations must be safe under concurrent `mark` calls from every
/// stage of a phase, and must hand out copies that later writes cannot
/// change.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Registers a new session with every stage pending.
    async fn create(
        &self,
        session_id: &str,
        questionnaire: Arc<Questionnaire>,
        stage_ids: &[String],
    ) -> Result<(), ProgressError>;

    /// Records a stage transition.
    async fn mark(
        &self,
        session_id: &str,
        stage_id: &str,
        update: StageUpdate,
    ) -> Result<(), ProgressError>;

    /// Returns an independent copy of the session.
    async fn snapshot(&self, session_id: &str) -> Result<SessionState, ProgressError>;

    /// Sets the final overall status.
    async fn finalize(&self, session_id: &str, status: SessionStatus) -> Result<(), ProgressError>;

    /// Drops a session and returns its last state.
    async fn remove(&self, session_id: &str) -> Option<SessionState>;

    /// Lists known session ids.
    async fn session_ids(&self) -> Vec<String>;
}
