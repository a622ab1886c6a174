//! Pipeline orchestrator.
//!
//! Runs the execution plan of a session phase by phase on a background
//! task. [`PipelineOrchestrator::start`] returns as soon as phase 0 is
//! terminal; if the caller stops waiting before that, the session is
//! cancelled and still finalized. Within a phase every stage runs
//! concurrently and a failure never cancels its siblings; the next phase
//! starts only after the whole phase is terminal.

use crate::assistant::AssistantClient;
use crate::cancellation::CancellationToken;
use crate::catalog;
use crate::config::{ConcurrencyConfig, EngineConfig};
use crate::context::{StageContext, UpstreamResult, NOT_SELECTED_REASON};
use crate::core::{Questionnaire, SessionStatus, StageResult};
use crate::errors::{GraphError, OrchestratorError, ProgressError, StageError};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::executor::StageExecutor;
use crate::observability::{session_span, stage_span, SpanTimer};
use crate::pipeline::{FailureCollector, FailureRecord, StageDefinition, StageGraph};
use crate::progress::{ProgressStore, SessionState, StageUpdate};
use crate::utils::new_session_id;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};


/// Reason recorded for stages that never launched because the session was
/// cancelled.
pub const CANCELLED_BEFORE_LAUNCH: &str = "cancelled before launch";

/// Cancellation reason of a session whose caller stopped waiting for
/// phase 0.
pub const CALLER_WENT_AWAY: &str = "caller stopped waiting for phase 0";

/// Outcome of one stage as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage produced a result.
    Completed {
        /// The result.
        result: Arc<StageResult>,
    },
    /// The stage ended in error.
    Failed {
        /// Why it failed.
        failure: FailureRecord,
    },
}

impl StageOutcome {
    /// Returns the result of a completed stage.
    #[must_use]
    pub fn result(&self) -> Option<&Arc<StageResult>> {
        match self {
            Self::Completed { result } => Some(result),
            Self::Failed { .. } => None,
        }
    }

    /// Returns the failure of a failed stage.
    #[must_use]
    pub fn failure(&self) -> Option<&FailureRecord> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { failure } => Some(failure),
        }
    }
}

/// What [`PipelineOrchestrator::start`] returns.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    /// The new session.
    pub session_id: String,
    /// Outcome of every phase-0 stage.
    pub phase0: BTreeMap<String, StageOutcome>,
}

impl StartOutcome {
    /// Returns the phase-0 result of `stage_id`, if it completed.
    #[must_use]
    pub fn result(&self, stage_id: &str) -> Option<&Arc<StageResult>> {
        self.phase0.get(stage_id).and_then(StageOutcome::result)
    }
}

/// Completed results of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    /// The session.
    pub session_id: String,
    /// Overall status at the time of the call.
    pub status: SessionStatus,
    /// Results of the stages currently completed.
    pub stages: BTreeMap<String, Arc<StageResult>>,
}

/// Live bookkeeping of a session whose phases are still running.
struct SessionHandle {
    graph: Arc<StageGraph>,
    token: Arc<CancellationToken>,
    permits: Arc<Semaphore>,
    task: Option<JoinHandle<()>>,
}

/// Cancels a session if dropped while armed.
struct AbandonGuard {
    token: Option<Arc<CancellationToken>>,
}

impl AbandonGuard {
    fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel(CALLER_WENT_AWAY);
        }
    }
}

/// Runs sessions over a stage graph.
///
/// Cheap to clone; clones share the executor, store and session registry.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    graph: Arc<StageGraph>,
    executor: Arc<StageExecutor>,
    store: Arc<dyn ProgressStore>,
    events: Arc<dyn EventSink>,
    concurrency: ConcurrencyConfig,
    global_permits: Arc<Semaphore>,
    sessions: Arc<DashMap<String, SessionHandle>>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("stages", &self.graph.stage_ids())
            .field("concurrency", &self.concurrency)
            .field("active_sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator with default concurrency limits and no event
    /// sink.
    #[must_use]
    pub fn new(graph: StageGraph, executor: StageExecutor, store: Arc<dyn ProgressStore>) -> Self {
        let concurrency = ConcurrencyConfig::default();
        Self {
            graph: Arc::new(graph),
            executor: Arc::new(executor),
            store,
            events: Arc::new(NoOpEventSink),
            global_permits: Arc::new(Semaphore::new(concurrency.max_concurrent_global)),
            concurrency,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Builds the seven-block analysis pipeline from configuration.
    pub fn from_config(
        config: &EngineConfig,
        client: Arc<dyn AssistantClient>,
        store: Arc<dyn ProgressStore>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let graph = catalog::analysis_graph().inspect_err(log_graph_error)?;
        let executor = StageExecutor::new(client, config.executor.clone(), &config.assistant)
            .with_indicator_catalog(graph.stages());
        Ok(Self::new(graph, executor, store).with_concurrency(config.concurrency.clone()))
    }

    /// Sets the concurrency limits.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.global_permits = Arc::new(Semaphore::new(concurrency.max_concurrent_global));
        self.concurrency = concurrency;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the full stage graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Returns the stage executor.
    #[must_use]
    pub fn executor(&self) -> &StageExecutor {
        &self.executor
    }

    /// Starts a session over every stage.
    ///
    /// Returns once phase 0 is terminal. A failed phase-0 stage does not
    /// fail the call: its failure is in the outcome and later phases run
    /// with an unavailable marker for it. Dropping the returned future
    /// before then cancels the session.
    pub async fn start(&self, questionnaire: Questionnaire) -> Result<StartOutcome, OrchestratorError> {
        self.launch(self.graph.clone(), questionnaire).await
    }

    /// Starts a session over a subset of the stages.
    ///
    /// Dependencies outside the subset are reported to stages as not
    /// selected for this run.
    pub async fn start_with_stages<S: AsRef<str>>(
        &self,
        questionnaire: Questionnaire,
        stage_ids: &[S],
    ) -> Result<StartOutcome, OrchestratorError> {
        let graph = self.graph.restricted_to(stage_ids).inspect_err(log_graph_error)?;
        self.launch(Arc::new(graph), questionnaire).await
    }

    /// Runs every phase after phase 0 and finalizes the session.
    ///
    /// The session task runs this after phase 0. Once the
    /// session is finalized it is no longer tracked and this fails with
    /// [`ProgressError::SessionNotFound`].
    pub async fn run_remaining_phases(&self, session_id: &str) -> Result<SessionStatus, OrchestratorError> {
        let (graph, token, permits) = self.handle_parts(session_id)?;
        for phase in 1..graph.plan().len() {
            self.run_phase(session_id, &graph, phase, &token, &permits).await?;
        }
        self.finish(session_id, &token).await
    }

    /// Returns a snapshot of the session.
    pub async fn status(&self, session_id: &str) -> Result<SessionState, OrchestratorError> {
        Ok(self.store.snapshot(session_id).await?)
    }

    /// Returns the results of the stages completed so far.
    pub async fn result(&self, session_id: &str) -> Result<SessionResult, OrchestratorError> {
        let snapshot = self.store.snapshot(session_id).await?;
        Ok(SessionResult {
            stages: snapshot.completed_results(),
            status: snapshot.status,
            session_id: snapshot.session_id,
        })
    }

    /// Waits for the background phases of a session, then returns its final
    /// snapshot.
    pub async fn wait_for_completion(&self, session_id: &str) -> Result<SessionState, OrchestratorError> {
        let task = self
            .sessions
            .get_mut(session_id)
            .and_then(|mut handle| handle.task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(session_id, error = %e, "Background session task did not finish cleanly");
            }
        }
        self.status(session_id).await
    }

    /// Runs one stage outside any session.
    ///
    /// `previous_results` supplies the dependencies; missing ones are passed
    /// as unavailable. Uses the single-stage budget.
    pub async fn run_single_stage(
        &self,
        stage_id: &str,
        questionnaire: Questionnaire,
        previous_results: &BTreeMap<String, Arc<StageResult>>,
    ) -> Result<StageResult, OrchestratorError> {
        let definition = self.graph.stage(stage_id).ok_or_else(|| GraphError::UnknownStage {
            stage: stage_id.to_string(),
        })?;
        let context = StageContext::for_stage(definition, Arc::new(questionnaire), |dep| {
            previous_results.get(dep).map_or_else(
                || UpstreamResult::unavailable("no previous result provided"),
                |r| UpstreamResult::available(r.clone()),
            )
        });

        let _permit = self.global_permits.acquire().await.map_err(|_| {
            StageError::cancelled(stage_id, "orchestrator is shutting down")
        })?;
        let budget = self.executor.config().single_stage_timeout();
        let result = self
            .executor
            .execute(definition, &context, budget, &CancellationToken::new())
            .await?;
        Ok(result)
    }

    /// Cancels a running session.
    ///
    /// In-flight stages stop at their next suspension point, unstarted
    /// stages are marked as errors and the session ends `cancelled`.
    /// Returns `false` if the session had already finished.
    pub async fn cancel(&self, session_id: &str, reason: &str) -> Result<bool, OrchestratorError> {
        if let Some(handle) = self.sessions.get(session_id) {
            info!(session_id, reason, "Cancelling session");
            handle.token.cancel(reason);
            return Ok(true);
        }
        self.store.snapshot(session_id).await?;
        Ok(false)
    }

    async fn launch(
        &self,
        graph: Arc<StageGraph>,
        questionnaire: Questionnaire,
    ) -> Result<StartOutcome, OrchestratorError> {
        let session_id = new_session_id();
        let token = Arc::new(CancellationToken::new());
        self.sessions.insert(
            session_id.clone(),
            SessionHandle {
                graph,
                token: token.clone(),
                permits: Arc::new(Semaphore::new(self.concurrency.max_concurrent_per_session)),
                task: None,
            },
        );

        let (phase0_tx, phase0_rx) = oneshot::channel();
        let background = self.clone();
        let id = session_id.clone();
        let task = tokio::spawn(
            async move { background.run_session(&id, questionnaire, phase0_tx).await }
                .instrument(session_span(&session_id)),
        );
        if let Some(mut handle) = self.sessions.get_mut(&session_id) {
            handle.task = Some(task);
        }

        let guard = AbandonGuard { token: Some(token) };
        let started = phase0_rx
            .await
            .map_err(|_| OrchestratorError::Aborted(session_id.clone()))?;
        guard.disarm();
        started
    }

    /// Drives a whole session: phase 0, reported back to `start`, then the
    /// remaining phases.
    async fn run_session(
        &self,
        session_id: &str,
        questionnaire: Questionnaire,
        phase0_tx: oneshot::Sender<Result<StartOutcome, OrchestratorError>>,
    ) {
        match self.run_first_phase(session_id, questionnaire).await {
            Ok(phase0) => {
                let started = StartOutcome {
                    session_id: session_id.to_string(),
                    phase0,
                };
                if phase0_tx.send(Ok(started)).is_err() {
                    warn!(session_id, "Caller stopped waiting for phase 0");
                }
            }
            Err(e) => {
                self.abort(session_id).await;
                if let Err(Err(e)) = phase0_tx.send(Err(e)) {
                    error!(session_id, error = %e, "Session failed to start");
                }
                return;
            }
        }

        if let Err(e) = self.run_remaining_phases(session_id).await {
            error!(session_id, error = %e, "Session aborted");
            self.abort(session_id).await;
        }
    }

    async fn run_first_phase(
        &self,
        session_id: &str,
        questionnaire: Questionnaire,
    ) -> Result<BTreeMap<String, StageOutcome>, OrchestratorError> {
        let (graph, token, permits) = self.handle_parts(session_id)?;
        let stage_ids = graph.stage_ids();
        self.store
            .create(session_id, Arc::new(questionnaire), &stage_ids)
            .await?;

        info!(session_id, stages = stage_ids.len(), phases = graph.plan().len(), "Session started");
        self.events
            .emit(&PipelineEvent::SessionStarted {
                session_id: session_id.to_string(),
                stages: stage_ids,
                phases: graph.plan().len(),
            })
            .await;

        self.run_phase(session_id, &graph, 0, &token, &permits).await
    }

    fn handle_parts(
        &self,
        session_id: &str,
    ) -> Result<(Arc<StageGraph>, Arc<CancellationToken>, Arc<Semaphore>), OrchestratorError> {
        self.sessions
            .get(session_id)
            .map(|h| (h.graph.clone(), h.token.clone(), h.permits.clone()))
            .ok_or_else(|| ProgressError::SessionNotFound(session_id.to_string()).into())
    }

    /// Stops tracking a session and marks it as errored.
    async fn abort(&self, session_id: &str) {
        self.sessions.remove(session_id);
        if let Err(e) = self.store.finalize(session_id, SessionStatus::Error).await {
            warn!(session_id, error = %e, "Could not mark session as errored");
        }
    }

    /// Runs every stage of one phase and waits for all of them.
    async fn run_phase(
        &self,
        session_id: &str,
        graph: &StageGraph,
        phase: usize,
        token: &Arc<CancellationToken>,
        permits: &Arc<Semaphore>,
    ) -> Result<BTreeMap<String, StageOutcome>, OrchestratorError> {
        let Some(stage_ids) = graph.plan().phase(phase) else {
            return Ok(BTreeMap::new());
        };
        let snapshot = self.store.snapshot(session_id).await?;

        let mut running = FuturesUnordered::new();
        for stage_id in stage_ids {
            let Some(definition) = graph.stage(stage_id) else {
                continue;
            };
            let context = StageContext::for_stage(definition, snapshot.questionnaire.clone(), |dep| {
                upstream_of(graph, &snapshot, dep)
            });

            let this = self.clone();
            let session = session_id.to_string();
            let definition = definition.clone();
            let token = token.clone();
            let permits = permits.clone();
            let span = stage_span(session_id, stage_id, phase);
            let task = tokio::spawn(
                async move {
                    this.run_stage(&session, &definition, context, phase, &token, &permits)
                        .await
                }
                .instrument(span),
            );
            let id = stage_id.clone();
            running.push(async move { (id, task.await) });
        }

        let mut outcomes = BTreeMap::new();
        let mut store_error = None;
        while let Some((stage_id, joined)) = running.next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    outcomes.insert(stage_id, outcome);
                }
                Ok(Err(e)) => {
                    error!(session_id, stage = %stage_id, error = %e, "Could not record stage outcome");
                    if store_error.is_none() {
                        store_error = Some(e);
                    }
                }
                Err(e) => {
                    let failure = FailureRecord::new(&stage_id, format!("stage task aborted: {e}"));
                    error!(session_id, stage = %stage_id, error = %e, "Stage task aborted");
                    self.record_failure(session_id, &stage_id, failure.clone()).await;
                    outcomes.insert(stage_id, StageOutcome::Failed { failure });
                }
            }
        }

        match store_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// Runs one stage and records each transition.
    async fn run_stage(
        &self,
        session_id: &str,
        definition: &StageDefinition,
        context: StageContext,
        phase: usize,
        token: &CancellationToken,
        permits: &Semaphore,
    ) -> Result<StageOutcome, OrchestratorError> {
        let stage_id = definition.id.as_str();

        let permits = tokio::select! {
            biased;
            () = token.cancelled() => None,
            acquired = async {
                let session = permits.acquire().await.ok()?;
                let global = self.global_permits.acquire().await.ok()?;
                Some((session, global))
            } => acquired,
        };
        let Some(_permits) = permits.filter(|_| !token.is_cancelled()) else {
            let failure = FailureRecord::new(stage_id, CANCELLED_BEFORE_LAUNCH)
                .with_error_type("StageCancelled");
            self.store
                .mark(session_id, stage_id, StageUpdate::Failed(failure.clone()))
                .await?;
            self.emit_failure(session_id, &failure).await;
            return Ok(StageOutcome::Failed { failure });
        };

        self.store.mark(session_id, stage_id, StageUpdate::Running).await?;
        self.events
            .emit(&PipelineEvent::StageStarted {
                session_id: session_id.to_string(),
                stage: stage_id.to_string(),
                phase,
            })
            .await;

        let timer = SpanTimer::start(stage_id);
        let budget = self.executor.config().stage_timeout();
        match self.executor.execute(definition, &context, budget, token).await {
            Ok(result) => {
                let result = Arc::new(result);
                self.store
                    .mark(session_id, stage_id, StageUpdate::Completed(result.clone()))
                    .await?;
                self.events
                    .emit(&PipelineEvent::StageCompleted {
                        session_id: session_id.to_string(),
                        stage: stage_id.to_string(),
                        elapsed_ms: timer.elapsed_ms(),
                        repaired: result.provenance.repaired,
                    })
                    .await;
                Ok(StageOutcome::Completed { result })
            }
            Err(e) => {
                let failure = FailureRecord::from_stage_error(&e)
                    .with_context("elapsed_ms", serde_json::json!(timer.elapsed_ms()));
                self.store
                    .mark(session_id, stage_id, StageUpdate::Failed(failure.clone()))
                    .await?;
                self.emit_failure(session_id, &failure).await;
                Ok(StageOutcome::Failed { failure })
            }
        }
    }

    /// Finalizes the session from its recorded stage outcomes.
    async fn finish(
        &self,
        session_id: &str,
        token: &CancellationToken,
    ) -> Result<SessionStatus, OrchestratorError> {
        let snapshot = self.store.snapshot(session_id).await?;
        let mut collector = FailureCollector::new();
        for (stage_id, state) in &snapshot.stages {
            match (&state.result, &state.error) {
                (Some(_), _) => collector.record_completion(stage_id),
                (None, Some(failure)) => collector.record_failure(failure.clone()),
                (None, None) => {}
            }
        }

        let status = collector.final_status(token.is_cancelled());
        self.store.finalize(session_id, status).await?;
        self.sessions.remove(session_id);

        let summary = collector.summary(snapshot.stages.len());
        let failed_stages: Vec<String> = summary
            .failed_stage_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        info!(
            session_id,
            %status,
            completed = summary.completed_stages,
            failed = summary.failed_stages,
            "Session finished"
        );
        self.events
            .emit(&PipelineEvent::SessionCompleted {
                session_id: session_id.to_string(),
                status,
                failed_stages,
            })
            .await;
        Ok(status)
    }

    async fn record_failure(&self, session_id: &str, stage_id: &str, failure: FailureRecord) {
        if let Err(e) = self
            .store
            .mark(session_id, stage_id, StageUpdate::Failed(failure.clone()))
            .await
        {
            warn!(session_id, stage = stage_id, error = %e, "Could not record stage failure");
        }
        self.emit_failure(session_id, &failure).await;
    }

    async fn emit_failure(&self, session_id: &str, failure: &FailureRecord) {
        self.events
            .emit(&PipelineEvent::StageFailed {
                session_id: session_id.to_string(),
                stage: failure.stage.clone(),
                error_type: failure.error_type.clone(),
                error: failure.error.clone(),
            })
            .await;
    }
}

fn log_graph_error(err: &GraphError) {
    let info = err.error_info();
    error!(
        code = %info.code,
        fix_hint = info.fix_hint.as_deref().unwrap_or(""),
        context = ?info.context,
        "{}",
        info.summary
    );
}

/// How a dependency looks to a stage about to run.
fn upstream_of(graph: &StageGraph, snapshot: &SessionState, dependency: &str) -> UpstreamResult {
    if graph.is_excluded(dependency) {
        return UpstreamResult::unavailable(NOT_SELECTED_REASON);
    }
    match snapshot.stages.get(dependency) {
        Some(state) => match (&state.result, &state.error) {
            (Some(result), _) => UpstreamResult::available(result.clone()),
            (None, Some(failure)) => UpstreamResult::unavailable(failure.error.clone()),
            (None, None) => UpstreamResult::unavailable(format!("dependency {}", state.status)),
        },
        None => UpstreamResult::unavailable("dependency unknown to this session"),
    }
}
