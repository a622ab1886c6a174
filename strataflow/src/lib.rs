//! # Strataflow
//!
//! Dependency-phased orchestration of remote analysis agents.
//!
//! A fixed set of analysis stages, each backed by a remote conversational
//! agent, runs against one questionnaire. Strataflow provides:
//!
//! - **Stage graph**: validated dependencies grouped into parallel phases
//! - **Result repair**: recovery of a JSON object from noisy agent output
//! - **Stage executor**: thread, message and run lifecycle with polling,
//!   tool acknowledgment, timeouts and cancellation
//! - **Progress store**: monotonic per-stage and per-session state
//! - **Orchestrator**: background phases with phase 0 reported to the
//!   caller, bounded concurrency and failure isolation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strataflow::prelude::*;
//!
//! let config = ConfigLoader::load(None)?;
//! let client = Arc::new(OpenAiAssistantClient::new(&config.assistant)?);
//! let store = Arc::new(InMemoryProgressStore::new());
//! let orchestrator = PipelineOrchestrator::from_config(&config, client, store)?;
//!
//! let started = orchestrator.start(questionnaire).await?;
//! let state = orchestrator.wait_for_completion(&started.session_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod assistant;
pub mod cancellation;
pub mod catalog;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod repair;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    #[cfg(feature = "http")]
    pub use crate::assistant::OpenAiAssistantClient;
    pub use crate::assistant::{AssistantClient, RunStatus};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ConfigLoader, EngineConfig};
    pub use crate::context::{StageContext, UpstreamResult};
    pub use crate::core::{Questionnaire, SessionStatus, StageResult, StageStatus};
    pub use crate::errors::{
        AssistantError, ConfigError, GraphError, OrchestratorError, ProgressError, RepairError,
        StageError, StrataflowError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::executor::StageExecutor;
    pub use crate::orchestrator::{PipelineOrchestrator, SessionResult, StageOutcome, StartOutcome};
    pub use crate::pipeline::{ExecutionPlan, FailureRecord, StageDefinition, StageGraph};
    pub use crate::progress::{InMemoryProgressStore, ProgressStore, SessionState};
    pub use crate::repair::{RepairReport, ResultRepairer};
    pub use std::sync::Arc;
}
