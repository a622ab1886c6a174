//! Testing utilities for strataflow pipelines.
//!
//! This module provides:
//! - [`ScriptedAssistant`], an in-memory remote agent service
//! - Questionnaire and graph fixtures

mod fixtures;
mod scripted;

pub use fixtures::{
    branching_stages, fast_executor_config, sample_questionnaire, scripted_orchestrator, TestHarness,
};
pub use scripted::{ScriptStep, ScriptedAssistant, StageCalls, StageScript};
