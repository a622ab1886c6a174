//! Failure isolation for phased execution.
//!
//! A session always continues past a failed stage: the failure is recorded
//! here, siblings keep running, and dependents receive an unavailable marker.

use crate::core::SessionStatus;
use crate::errors::StageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Record of one stage failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage identifier.
    pub stage: String,
    /// Error message.
    pub error: String,
    /// Error kind (`StageFailed`, `StageTimeout`, `StageCancelled`).
    pub error_type: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// Additional context.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            error: error.into(),
            error_type: "StageFailed".to_string(),
            timestamp: Utc::now(),
            context: HashMap::new(),
        }
    }

    /// Builds a record from a stage error.
    #[must_use]
    pub fn from_stage_error(err: &StageError) -> Self {
        let record = Self::new(err.stage_id(), err.to_string()).with_error_type(err.kind());
        match err {
            StageError::Timeout { budget, .. } => {
                record.with_context("budget_secs", serde_json::json!(budget.as_secs()))
            }
            StageError::Failed { reason, .. } | StageError::Cancelled { reason, .. } => {
                record.with_context("reason", serde_json::json!(reason))
            }
        }
    }

    /// Sets the error type.
    #[must_use]
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    /// Adds context.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Returns true if the failure came from cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.error_type == "StageCancelled"
    }
}

/// Summary of failures for a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Total number of stages.
    pub total_stages: usize,
    /// Number of completed stages.
    pub completed_stages: usize,
    /// Number of failed stages.
    pub failed_stages: usize,
    /// Failure records in the order they happened.
    pub failures: Vec<FailureRecord>,
}

impl FailureSummary {
    /// Returns the identifiers of the failed stages.
    #[must_use]
    pub fn failed_stage_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.stage.as_str()).collect()
    }
}

/// Collects stage outcomes during one session run.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Vec<FailureRecord>,
    failed_stages: BTreeSet<String>,
    completed_stages: BTreeSet<String>,
}

impl FailureCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stage failure.
    pub fn record_failure(&mut self, record: FailureRecord) {
        if self.failed_stages.insert(record.stage.clone()) {
            self.failures.push(record);
        }
    }

    /// Records a stage completion.
    pub fn record_completion(&mut self, stage: &str) {
        self.completed_stages.insert(stage.to_string());
    }

    /// Returns true if the stage has failed.
    #[must_use]
    pub fn has_failed(&self, stage: &str) -> bool {
        self.failed_stages.contains(stage)
    }

    /// Returns true if the stage has completed.
    #[must_use]
    pub fn has_completed(&self, stage: &str) -> bool {
        self.completed_stages.contains(stage)
    }

    /// Returns all failures.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Creates a summary of the execution.
    #[must_use]
    pub fn summary(&self, total_stages: usize) -> FailureSummary {
        FailureSummary {
            total_stages,
            completed_stages: self.completed_stages.len(),
            failed_stages: self.failed_stages.len(),
            failures: self.failures.clone(),
        }
    }

    /// Returns the overall status once every phase has run.
    #[must_use]
    pub fn final_status(&self, cancelled: bool) -> SessionStatus {
        if cancelled {
            SessionStatus::Cancelled
        } else if self.failures.is_empty() {
            SessionStatus::Completed
        } else {
            SessionStatus::CompletedWithErrors
        }
    }
}
