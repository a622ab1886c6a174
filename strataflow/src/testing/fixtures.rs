//! Test fixtures for pipeline testing.

use super::ScriptedAssistant;
use crate::config::{ConcurrencyConfig, ExecutorConfig};
use crate::core::Questionnaire;
use crate::errors::GraphError;
use crate::events::CollectingEventSink;
use crate::executor::StageExecutor;
use crate::orchestrator::PipelineOrchestrator;
use crate::pipeline::{JitterStrategy, RetryConfig, StageDefinition, StageGraph};
use crate::progress::InMemoryProgressStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// A questionnaire shaped like a real submission.
#[must_use]
pub fn sample_questionnaire() -> Questionnaire {
    Questionnaire::default()
        .with_field("secteur", json!("Agro-industrie"))
        .with_field("zoneGeographique", json!("Afrique de l'Ouest"))
        .with_field("paysInstallation", json!("Senegal"))
        .with_field("profilOrganisation", json!("PME"))
        .with_field("biensServices", json!(["Transformation de mil", "Export"]))
        .with_field("objectifsDD", json!(["ODD 2", "ODD 8", "ODD 13"]))
        .with_field("visionOrganisation", json!(null))
}

/// `S1 -> []`, `S2 -> [S1]`, `S3 -> [S1]`, `S4 -> [S1, S2]`.
#[must_use]
pub fn branching_stages() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new("S1", "Context").with_indicators(["score"]),
        StageDefinition::new("S2", "Market").with_dependency("S1"),
        StageDefinition::new("S3", "Value chain").with_dependency("S1"),
        StageDefinition::new("S4", "Synthesis").with_dependencies(["S1", "S2"]),
    ]
}

/// Executor settings with millisecond polling and a one-second stage budget.
#[must_use]
pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        stage_timeout_secs: 1,
        single_stage_timeout_secs: 2,
        transport_retry: RetryConfig::new()
            .with_base_delay_ms(1)
            .with_max_delay_ms(5)
            .with_jitter(JitterStrategy::None),
        ..ExecutorConfig::default().with_poll_intervals(Duration::from_millis(1), Duration::from_millis(2))
    }
}

/// An orchestrator wired to a scripted agent service, with handles on every
/// collaborator.
#[derive(Debug)]
pub struct TestHarness {
    /// The scripted service.
    pub assistant: Arc<ScriptedAssistant>,
    /// The progress store.
    pub store: Arc<InMemoryProgressStore>,
    /// Every emitted event.
    pub events: Arc<CollectingEventSink>,
    /// The orchestrator under test.
    pub orchestrator: PipelineOrchestrator,
}

/// Builds a [`TestHarness`] over `stages`.
pub fn scripted_orchestrator(
    stages: Vec<StageDefinition>,
    assistant: ScriptedAssistant,
) -> Result<TestHarness, GraphError> {
    let graph = StageGraph::new(stages)?;
    let assistant = Arc::new(assistant);
    let store = Arc::new(InMemoryProgressStore::new());
    let events = Arc::new(CollectingEventSink::new());

    let executor = StageExecutor::new(assistant.clone(), fast_executor_config(), &assistant.routing())
        .with_indicator_catalog(graph.stages());
    let orchestrator = PipelineOrchestrator::new(graph, executor, store.clone())
        .with_concurrency(ConcurrencyConfig {
            max_concurrent_per_session: 4,
            max_concurrent_global: 8,
        })
        .with_event_sink(events.clone());

    Ok(TestHarness {
        assistant,
        store,
        events,
        orchestrator,
    })
}
