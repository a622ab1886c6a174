//! Stage graph and phase planning.
//!
//! This module provides:
//! - Stage definitions
//! - Graph validation and the layered execution plan
//! - Failure isolation records
//! - Backoff for transient remote errors

mod dag;
mod failure_tolerance;
mod retry;
mod spec;

pub use dag::{ExecutionPlan, StageGraph};
pub use failure_tolerance::{FailureCollector, FailureRecord, FailureSummary};
pub use retry::{with_retry_if, BackoffStrategy, JitterStrategy, RetryConfig, RetryState};
pub use spec::StageDefinition;
