//! Error types for the strataflow engine.
//!
//! Errors are layered the way they propagate: graph errors are fatal at
//! startup, repair and remote-agent errors are folded into [`StageError`] by
//! the executor, and stage errors are recorded per stage by the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The main error type for strataflow operations.
#[derive(Debug, Error)]
pub enum StrataflowError {
    /// The stage graph is invalid.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// A remote document could not be repaired.
    #[error("{0}")]
    Repair(#[from] RepairError),

    /// The remote agent service returned an error.
    #[error("{0}")]
    Assistant(#[from] AssistantError),

    /// A stage did not produce a result.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// The progress store rejected an operation.
    #[error("{0}")]
    Progress(#[from] ProgressError),

    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// An orchestrator-level operation failed.
    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Errors raised while validating the stage dependency graph.
///
/// These only ever occur when a graph is built, never while a session runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The dependency relation contains a cycle.
    #[error("Cyclic dependency between stages: {}", cycle_path.join(" -> "))]
    CyclicDependency {
        /// The path of stages forming the cycle, first stage repeated at the end.
        cycle_path: Vec<String>,
    },

    /// A stage depends on a stage that is not defined.
    #[error("Stage '{stage}' depends on undefined stage '{dependency}'")]
    UnknownDependency {
        /// The stage declaring the dependency.
        stage: String,
        /// The undefined dependency identifier.
        dependency: String,
    },

    /// Two definitions share the same identifier.
    #[error("Stage '{stage}' is defined more than once")]
    DuplicateStage {
        /// The duplicated identifier.
        stage: String,
    },

    /// The graph has no stages at all.
    #[error("Stage graph has no stages")]
    Empty,

    /// A stage was requested that the graph does not contain.
    #[error("Unknown stage '{stage}'")]
    UnknownStage {
        /// The requested identifier.
        stage: String,
    },
}

impl GraphError {
    /// Creates a cyclic dependency error.
    #[must_use]
    pub fn cyclic(cycle_path: Vec<String>) -> Self {
        Self::CyclicDependency { cycle_path }
    }

    /// Creates an unknown dependency error.
    #[must_use]
    pub fn unknown_dependency(stage: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            stage: stage.into(),
            dependency: dependency.into(),
        }
    }

    /// Returns the contract diagnostics for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::CyclicDependency { cycle_path } => ContractErrorInfo::new(
                "GRAPH-001-CYCLE",
                format!("Stage graph contains a dependency cycle: {}", cycle_path.join(" -> ")),
            )
            .with_fix_hint("Remove one of the dependencies in the cycle to break it."),
            Self::UnknownDependency { stage, dependency } => ContractErrorInfo::new(
                "GRAPH-002-MISSING_DEP",
                format!("Stage '{stage}' depends on '{dependency}', which is not defined"),
            )
            .with_fix_hint("Check the dependency list for typos or define the missing stage.")
            .with_context_entry("stage", stage.clone())
            .with_context_entry("dependency", dependency.clone()),
            Self::DuplicateStage { stage } => ContractErrorInfo::new(
                "GRAPH-003-DUPLICATE",
                format!("Stage '{stage}' is defined more than once"),
            )
            .with_context_entry("stage", stage.clone()),
            Self::Empty => ContractErrorInfo::new("GRAPH-004-EMPTY", "Stage graph has no stages")
                .with_fix_hint("Define at least one stage before building the graph."),
            Self::UnknownStage { stage } => {
                ContractErrorInfo::new("GRAPH-005-UNKNOWN", format!("Unknown stage '{stage}'"))
                    .with_context_entry("stage", stage.clone())
            }
        }
    }
}

/// Errors raised by the result repair pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepairError {
    /// The text contains no fenced block and no brace-delimited span.
    #[error("No structured payload found in response ({length} characters)")]
    NoPayloadFound {
        /// Length of the raw text in characters.
        length: usize,
    },

    /// The payload could not be parsed even after the aggressive pass.
    #[error("Unrepairable document at line {line}, column {column}: {message} (near: {window})")]
    UnrepairableDocument {
        /// Parser message.
        message: String,
        /// 1-based line of the parse failure.
        line: usize,
        /// 1-based column of the parse failure.
        column: usize,
        /// Byte offset of the parse failure in the repaired text.
        position: usize,
        /// Text surrounding the failure position.
        window: String,
    },

    /// The document parsed, but is not a mapping.
    #[error("Document is a {found}, expected an object")]
    MalformedDocument {
        /// The kind of value that was found.
        found: &'static str,
    },
}

/// Errors returned by a remote agent client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssistantError {
    /// The service could not be reached (connection, timeout, 429/5xx).
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The service answered with a non-retryable error.
    #[error("Remote API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or message.
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("Failed to decode remote response: {0}")]
    Decode(String),

    /// The client is missing credentials or an agent identifier.
    #[error("Remote agent not configured: {0}")]
    NotConfigured(String),
}

impl AssistantError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Per-stage failures. Recoverable at the pipeline level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// The remote run ended unsuccessfully or its output was unusable.
    #[error("Stage '{stage_id}' failed: {reason}")]
    Failed {
        /// The failed stage.
        stage_id: String,
        /// Remote-reported or local reason.
        reason: String,
    },

    /// The stage exceeded its wall-clock budget.
    #[error("Stage '{stage_id}' timed out after {}s", budget.as_secs())]
    Timeout {
        /// The stage that timed out.
        stage_id: String,
        /// The budget that was exceeded.
        budget: Duration,
    },

    /// The stage was cancelled before reaching a terminal state.
    #[error("Stage '{stage_id}' cancelled: {reason}")]
    Cancelled {
        /// The cancelled stage.
        stage_id: String,
        /// The cancellation reason.
        reason: String,
    },
}

impl StageError {
    /// Creates a failure error.
    #[must_use]
    pub fn failed(stage_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            stage_id: stage_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(stage_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            stage_id: stage_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the stage the error belongs to.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        match self {
            Self::Failed { stage_id, .. }
            | Self::Timeout { stage_id, .. }
            | Self::Cancelled { stage_id, .. } => stage_id,
        }
    }

    /// Returns a short machine-readable kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "StageFailed",
            Self::Timeout { .. } => "StageTimeout",
            Self::Cancelled { .. } => "StageCancelled",
        }
    }
}

/// Errors raised by a progress store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgressError {
    /// No session exists with this id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A session with this id already exists.
    #[error("Session already exists: {0}")]
    SessionExists(String),

    /// The stage is not part of the session.
    #[error("Stage '{stage}' is not part of session {session_id}")]
    UnknownStage {
        /// The session.
        session_id: String,
        /// The stage.
        stage: String,
    },

    /// The requested status change would move a stage backwards.
    #[error("Invalid transition for stage '{stage}': {from} -> {to}")]
    InvalidTransition {
        /// The stage.
        stage: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The session was already finalized.
    #[error("Session {0} is already finalized")]
    AlreadyFinalized(String),
}

/// Configuration loading errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A source could not be read or extracted.
    #[error("Configuration error: {0}")]
    Load(String),

    /// A value is out of range.
    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid {
        /// The offending field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the pipeline orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The graph or a requested stage subset is invalid.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// The progress store rejected an operation.
    #[error("{0}")]
    Progress(#[from] ProgressError),

    /// A directly-run stage failed.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// The engine configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The session task ended before reporting phase 0.
    #[error("Session {0} ended before phase 0 was reported")]
    Aborted(String),
}
