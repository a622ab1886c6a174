//! Per-stage input context.
//!
//! A [`StageContext`] is built fresh for every stage invocation from the
//! session questionnaire and the outcome of each declared dependency. It is
//! read-only once built and cheap to clone: the questionnaire and upstream
//! results are shared behind `Arc`s.

use crate::core::{Questionnaire, StageResult};
use crate::pipeline::StageDefinition;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reason given for dependencies that are not part of the current run.
pub const NOT_SELECTED_REASON: &str = "not selected for this run";

/// The outcome of one dependency as seen by a downstream stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpstreamResult {
    /// The dependency completed.
    Available {
        /// Its repaired result.
        result: Arc<StageResult>,
    },
    /// The dependency failed, was cancelled, or was not run at all.
    Unavailable {
        /// Why the result is missing.
        reason: String,
    },
}

impl UpstreamResult {
    /// Wraps a completed result.
    #[must_use]
    pub fn available(result: Arc<StageResult>) -> Self {
        Self::Available { result }
    }

    /// Creates an unavailable marker.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Returns the result if available.
    #[must_use]
    pub fn result(&self) -> Option<&StageResult> {
        match self {
            Self::Available { result } => Some(result),
            Self::Unavailable { .. } => None,
        }
    }

    /// Returns true if the dependency result is present.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// Input of one stage invocation.
#[derive(Debug, Clone, Serialize)]
pub struct StageContext {
    stage_id: String,
    questionnaire: Arc<Questionnaire>,
    upstream: BTreeMap<String, UpstreamResult>,
}

impl StageContext {
    /// Creates a context without upstream results.
    #[must_use]
    pub fn new(stage_id: impl Into<String>, questionnaire: Arc<Questionnaire>) -> Self {
        Self {
            stage_id: stage_id.into(),
            questionnaire,
            upstream: BTreeMap::new(),
        }
    }

    /// Builds the context of `definition`, asking `lookup` for the outcome of
    /// each declared dependency. Every dependency gets an entry.
    #[must_use]
    pub fn for_stage<F>(definition: &StageDefinition, questionnaire: Arc<Questionnaire>, lookup: F) -> Self
    where
        F: Fn(&str) -> UpstreamResult,
    {
        let upstream = definition
            .dependencies
            .iter()
            .map(|dep| (dep.clone(), lookup(dep)))
            .collect();
        Self {
            stage_id: definition.id.clone(),
            questionnaire,
            upstream,
        }
    }

    /// Adds a completed dependency.
    #[must_use]
    pub fn with_result(mut self, result: Arc<StageResult>) -> Self {
        self.upstream
            .insert(result.stage_id.clone(), UpstreamResult::available(result));
        self
    }

    /// Adds an unavailable dependency.
    #[must_use]
    pub fn with_unavailable(mut self, stage_id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.upstream
            .insert(stage_id.into(), UpstreamResult::unavailable(reason));
        self
    }

    /// Returns the stage this context was built for.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    /// Returns the session questionnaire.
    #[must_use]
    pub fn questionnaire(&self) -> &Questionnaire {
        &self.questionnaire
    }

    /// Returns every dependency outcome, keyed by stage id.
    #[must_use]
    pub fn upstream(&self) -> &BTreeMap<String, UpstreamResult> {
        &self.upstream
    }

    /// Returns the outcome of one dependency.
    #[must_use]
    pub fn dependency(&self, stage_id: &str) -> Option<&UpstreamResult> {
        self.upstream.get(stage_id)
    }

    /// Returns the completed dependency results.
    pub fn available(&self) -> impl Iterator<Item = &StageResult> {
        self.upstream.values().filter_map(UpstreamResult::result)
    }

    /// Returns `(stage_id, reason)` for every missing dependency.
    pub fn unavailable(&self) -> impl Iterator<Item = (&str, &str)> {
        self.upstream.iter().filter_map(|(id, up)| match up {
            UpstreamResult::Unavailable { reason } => Some((id.as_str(), reason.as_str())),
            UpstreamResult::Available { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Provenance;
    use chrono::Utc;
    use serde_json::json;

    fn result(stage: &str) -> Arc<StageResult> {
        let data = json!({"indice_global": 55}).as_object().cloned().unwrap();
        Arc::new(StageResult::new(
            data,
            Provenance {
                stage_id: stage.to_string(),
                assistant_id: "asst".into(),
                thread_id: format!("thread_{stage}"),
                run_id: format!("run_{stage}"),
                completed_at: Utc::now(),
                poll_count: 1,
                tool_submissions: 0,
                repaired: false,
            },
        ))
    }

    #[test]
    fn test_for_stage_covers_every_dependency() {
        let def = StageDefinition::new("BLOC5", "ODD").with_dependencies(["BLOC1", "BLOC2"]);
        let questionnaire = Arc::new(Questionnaire::default().with_field("secteur", json!("agro")));

        let ctx = StageContext::for_stage(&def, questionnaire, |dep| {
            if dep == "BLOC1" {
                UpstreamResult::available(result("BLOC1"))
            } else {
                UpstreamResult::unavailable("stage failed: run expired")
            }
        });

        assert_eq!(ctx.stage_id(), "BLOC5");
        assert_eq!(ctx.upstream().len(), 2);
        assert!(ctx.dependency("BLOC1").unwrap().is_available());
        assert_eq!(ctx.available().count(), 1);
        assert_eq!(
            ctx.unavailable().collect::<Vec<_>>(),
            vec![("BLOC2", "stage failed: run expired")]
        );
        assert_eq!(ctx.questionnaire().get("secteur"), Some(&json!("agro")));
    }

    #[test]
    fn test_builder_methods() {
        let ctx = StageContext::new("S4", Arc::new(Questionnaire::default()))
            .with_result(result("S1"))
            .with_unavailable("S2", NOT_SELECTED_REASON);

        assert_eq!(ctx.available().next().unwrap().stage_id, "S1");
        assert!(!ctx.dependency("S2").unwrap().is_available());
        assert!(ctx.dependency("S3").is_none());
    }

    #[test]
    fn test_clones_share_results() {
        let shared = result("S1");
        let ctx = StageContext::new("S2", Arc::new(Questionnaire::default())).with_result(shared.clone());
        let copy = ctx.clone();

        let UpstreamResult::Available { result } = copy.dependency("S1").unwrap() else {
            panic!("expected available");
        };
        assert!(Arc::ptr_eq(result, &shared));
    }
}
