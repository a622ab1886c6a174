//! Core domain model types for strataflow.
//!
//! This module contains the fundamental types shared by every component:
//! - Stage and session status enums
//! - The questionnaire payload
//! - Repaired stage results with provenance

mod questionnaire;
mod result;
mod status;

pub use questionnaire::{render_value, Questionnaire};
pub use result::{Provenance, StageResult};
pub use status::{SessionStatus, StageStatus};
