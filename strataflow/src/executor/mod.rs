//! Stage executor.
//!
//! Drives one stage through its remote run:
//!
//! ```text
//! created -> submitted -> queued/in_progress <-> requires_action -> completed
//!                                                                 | failed/cancelled/expired
//! ```
//!
//! The executor owns the remote conversation it opens and nothing else. It
//! never writes progress; the orchestrator records the outcome.

mod message;

pub use message::{
    build_stage_message, MAX_SUMMARY_FIELDS, MAX_SUMMARY_VALUE_CHARS, OUTPUT_FORMAT_INSTRUCTIONS,
};

use crate::assistant::{AssistantClient, AssistantInfo, Run, RunStatus, ToolOutput};
use crate::cancellation::CancellationToken;
use crate::config::{AssistantConfig, ExecutorConfig};
use crate::context::StageContext;
use crate::core::{Provenance, StageResult};
use crate::errors::{AssistantError, StageError};
use crate::pipeline::{with_retry_if, RetryState, StageDefinition};
use crate::repair::ResultRepairer;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Counters gathered while polling one run.
#[derive(Debug, Default, Clone, Copy)]
struct RunCounters {
    polls: usize,
    tool_submissions: usize,
}

/// Runs single stages against the remote agent service.
pub struct StageExecutor {
    client: Arc<dyn AssistantClient>,
    config: ExecutorConfig,
    routing: AssistantConfig,
    repairer: ResultRepairer,
    indicators: HashMap<String, Vec<String>>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("config", &self.config)
            .field("routing", &self.routing)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor.
    ///
    /// Only the stage-to-agent routing of `routing` is kept; credentials
    /// belong to the client.
    #[must_use]
    pub fn new(
        client: Arc<dyn AssistantClient>,
        config: ExecutorConfig,
        routing: &AssistantConfig,
    ) -> Self {
        let mut routing = routing.clone();
        routing.api_key = None;
        Self {
            client,
            config,
            routing,
            repairer: ResultRepairer::new(),
            indicators: HashMap::new(),
        }
    }

    /// Registers the indicators each stage declares, used to summarize
    /// upstream results for downstream stages.
    #[must_use]
    pub fn with_indicator_catalog(mut self, stages: &[StageDefinition]) -> Self {
        self.indicators = stages
            .iter()
            .map(|s| (s.id.clone(), s.indicators.clone()))
            .collect();
        self
    }

    /// Replaces the result repairer.
    #[must_use]
    pub fn with_repairer(mut self, repairer: ResultRepairer) -> Self {
        self.repairer = repairer;
        self
    }

    /// Returns the executor settings.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Returns the repairer, for inspecting the last repair failure.
    #[must_use]
    pub fn repairer(&self) -> &ResultRepairer {
        &self.repairer
    }

    /// Returns the remote agent that runs `stage_id`.
    #[must_use]
    pub fn assistant_for(&self, stage_id: &str) -> Option<&str> {
        self.routing.assistant_for(stage_id)
    }

    /// Runs one stage to completion within `budget`.
    ///
    /// Polling stops as soon as the budget elapses or `cancel` fires.
    pub async fn execute(
        &self,
        definition: &StageDefinition,
        context: &StageContext,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<StageResult, StageError> {
        let stage_id = definition.id.as_str();
        let assistant_id = self.assistant_for(stage_id).ok_or_else(|| {
            StageError::failed(stage_id, "no remote agent configured for this stage")
        })?;

        if cancel.is_cancelled() {
            return Err(cancelled_error(stage_id, cancel));
        }

        let started = Instant::now();
        debug!(stage = stage_id, assistant_id, budget_secs = budget.as_secs(), "Executing stage");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(cancelled_error(stage_id, cancel)),
            driven = tokio::time::timeout(budget, self.drive(definition, context, assistant_id)) => {
                driven.unwrap_or_else(|_| {
                    Err(StageError::Timeout {
                        stage_id: stage_id.to_string(),
                        budget,
                    })
                })
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(result) => info!(
                stage = stage_id,
                elapsed_ms,
                polls = result.provenance.poll_count,
                tool_submissions = result.provenance.tool_submissions,
                repaired = result.provenance.repaired,
                "Stage completed"
            ),
            Err(e) => error!(stage = stage_id, elapsed_ms, kind = e.kind(), error = %e, "Stage failed"),
        }
        outcome
    }

    /// Checks that the remote agent for `stage_id` exists.
    pub async fn health_check(&self, stage_id: &str) -> Result<AssistantInfo, AssistantError> {
        let assistant_id = self.assistant_for(stage_id).ok_or_else(|| {
            AssistantError::NotConfigured(format!("no remote agent for stage {stage_id}"))
        })?;
        self.client.retrieve_assistant(assistant_id).await
    }

    async fn drive(
        &self,
        definition: &StageDefinition,
        context: &StageContext,
        assistant_id: &str,
    ) -> Result<StageResult, StageError> {
        let stage_id = definition.id.as_str();
        let client = self.client.as_ref();
        let submit = self.config.submit_retry();
        let content = build_stage_message(definition, context, &self.indicators);

        let thread_id = with_retry_if(
            &submit,
            "create_thread",
            move || client.create_thread(),
            AssistantError::is_transient,
        )
        .await
        .map_err(|e| remote_error(stage_id, "create thread", &e))?;

        let thread = thread_id.as_str();
        let body = content.as_str();
        with_retry_if(
            &submit,
            "post_message",
            move || client.post_message(thread, body),
            AssistantError::is_transient,
        )
        .await
        .map_err(|e| remote_error(stage_id, "post message", &e))?;

        let run = with_retry_if(
            &submit,
            "create_run",
            move || client.create_run(thread, assistant_id),
            AssistantError::is_transient,
        )
        .await
        .map_err(|e| remote_error(stage_id, "start run", &e))?;

        info!(stage = stage_id, thread_id = thread, run_id = %run.id, "Run submitted");

        let (run, counters) = self.poll_until_terminal(stage_id, thread, run).await?;
        if run.status != RunStatus::Completed {
            return Err(StageError::failed(stage_id, run.failure_reason()));
        }

        let messages = with_retry_if(
            &submit,
            "list_messages",
            move || client.list_messages(thread),
            AssistantError::is_transient,
        )
        .await
        .map_err(|e| remote_error(stage_id, "list messages", &e))?;

        let text = messages
            .iter()
            .rev()
            .filter(|m| m.is_assistant())
            .find_map(|m| m.first_text())
            .ok_or_else(|| StageError::failed(stage_id, "run completed without an assistant reply"))?;

        let (data, report) = self
            .repairer
            .repair_object(text)
            .map_err(|e| StageError::failed(stage_id, format!("unusable response: {e}")))?;

        let provenance = Provenance {
            stage_id: stage_id.to_string(),
            assistant_id: assistant_id.to_string(),
            thread_id: thread_id.clone(),
            run_id: run.id.clone(),
            completed_at: Utc::now(),
            poll_count: counters.polls,
            tool_submissions: counters.tool_submissions,
            repaired: report.was_repaired(),
        };
        Ok(StageResult::new(data, provenance))
    }

    /// Polls `run` until it reaches a terminal status.
    ///
    /// Transport failures back off and keep polling; the caller's timeout
    /// bounds the loop.
    async fn poll_until_terminal(
        &self,
        stage_id: &str,
        thread_id: &str,
        mut run: Run,
    ) -> Result<(Run, RunCounters), StageError> {
        let mut counters = RunCounters::default();
        let mut backoff = RetryState::new();
        let mut last_status = run.status;
        let mut wait = self.config.poll_interval();

        loop {
            tokio::time::sleep(wait).await;
            wait = self.config.poll_interval();

            counters.polls += 1;
            run = match self.client.retrieve_run(thread_id, &run.id).await {
                Ok(next) => {
                    backoff.reset();
                    next
                }
                Err(e) if e.is_transient() => {
                    wait = backoff.next_delay(&self.config.transport_retry);
                    warn!(
                        stage = stage_id,
                        run_id = %run.id,
                        attempt = backoff.attempt,
                        error = %e,
                        "Transient failure while polling run"
                    );
                    continue;
                }
                Err(e) => return Err(remote_error(stage_id, "poll run", &e)),
            };

            if run.status != last_status {
                info!(
                    stage = stage_id,
                    run_id = %run.id,
                    from = %last_status,
                    status = %run.status,
                    "Run status changed"
                );
                last_status = run.status;
            }

            match run.status {
                RunStatus::RequiresAction => {
                    let outputs: Vec<ToolOutput> = run
                        .required_action
                        .as_ref()
                        .map(|action| action.tool_calls().iter().map(ToolOutput::acknowledge).collect())
                        .unwrap_or_default();
                    if outputs.is_empty() {
                        warn!(stage = stage_id, run_id = %run.id, "Run requires action but lists no tool calls");
                        continue;
                    }

                    let count = outputs.len();
                    match self.client.submit_tool_outputs(thread_id, &run.id, outputs).await {
                        Ok(_) => {
                            counters.tool_submissions += 1;
                            info!(stage = stage_id, run_id = %run.id, tool_calls = count, "Acknowledged tool calls");
                            wait = self.config.post_tool_poll_interval();
                        }
                        Err(e) if e.is_transient() => {
                            wait = backoff.next_delay(&self.config.transport_retry);
                            warn!(stage = stage_id, run_id = %run.id, error = %e, "Tool output submission failed, will retry");
                        }
                        Err(e) => return Err(remote_error(stage_id, "submit tool outputs", &e)),
                    }
                }
                status if status.is_terminal() => return Ok((run, counters)),
                _ => {}
            }
        }
    }
}

fn remote_error(stage_id: &str, action: &str, err: &AssistantError) -> StageError {
    StageError::failed(stage_id, format!("failed to {action}: {err}"))
}

fn cancelled_error(stage_id: &str, cancel: &CancellationToken) -> StageError {
    StageError::cancelled(stage_id, cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{MockAssistantClient, RequiredAction, ThreadMessage, ToolCall};
    use crate::core::Questionnaire;
    use mockall::Sequence;
    use serde_json::json;

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig::default().with_poll_intervals(Duration::from_millis(1), Duration::from_millis(1))
    }

    fn routing() -> AssistantConfig {
        AssistantConfig::default().with_assistant("BLOC1", "asst_bloc1")
    }

    fn definition() -> StageDefinition {
        StageDefinition::new("BLOC1", "PESTEL").with_indicators(["score_global"])
    }

    fn context() -> StageContext {
        StageContext::new(
            "BLOC1",
            Arc::new(Questionnaire::default().with_field("secteur", json!("Energie"))),
        )
    }

    fn expect_submission(mock: &mut MockAssistantClient) {
        mock.expect_create_thread()
            .times(1)
            .returning(|| Ok("thread_1".to_string()));
        mock.expect_post_message()
            .withf(|thread, content| thread == "thread_1" && content.contains("- secteur: Energie"))
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_create_run()
            .withf(|thread, assistant| thread == "thread_1" && assistant == "asst_bloc1")
            .times(1)
            .returning(|thread, _| Ok(Run::new("run_1", thread, RunStatus::Queued)));
    }

    fn reply(
        text: &'static str,
    ) -> impl Fn(&str) -> Result<Vec<ThreadMessage>, AssistantError> + Send + 'static {
        move |_| {
            Ok(vec![
                ThreadMessage::text("msg_1", "user", "question"),
                ThreadMessage::text("msg_2", "assistant", text),
            ])
        }
    }

    async fn run(mock: MockAssistantClient, budget: Duration) -> Result<StageResult, StageError> {
        let executor = StageExecutor::new(Arc::new(mock), fast_config(), &routing());
        executor
            .execute(&definition(), &context(), budget, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_execute_completes_with_provenance() {
        let mut mock = MockAssistantClient::new();
        expect_submission(&mut mock);
        let mut seq = Sequence::new();
        mock.expect_retrieve_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|thread, id| Ok(Run::new(id, thread, RunStatus::InProgress)));
        mock.expect_retrieve_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|thread, id| Ok(Run::new(id, thread, RunStatus::Completed)));
        mock.expect_list_messages()
            .times(1)
            .returning(reply("```json\n{\"score_global\": 64, // note\n}\n```"));

        let result = run(mock, Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.stage_id, "BLOC1");
        assert_eq!(result.get("score_global"), Some(&json!(64)));
        assert_eq!(result.provenance.thread_id, "thread_1");
        assert_eq!(result.provenance.run_id, "run_1");
        assert_eq!(result.provenance.assistant_id, "asst_bloc1");
        assert_eq!(result.provenance.poll_count, 2);
        assert_eq!(result.provenance.tool_submissions, 0);
        assert!(result.provenance.repaired);
    }

    #[tokio::test]
    async fn test_requires_action_is_acknowledged() {
        let mut mock = MockAssistantClient::new();
        expect_submission(&mut mock);
        let mut seq = Sequence::new();
        mock.expect_retrieve_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|thread, id| {
                Ok(Run::new(id, thread, RunStatus::RequiresAction).with_required_action(
                    RequiredAction::tool_outputs(vec![
                        ToolCall::function("call_1", "file_search"),
                        ToolCall::function("call_2", "lookup"),
                    ]),
                ))
            });
        mock.expect_submit_tool_outputs()
            .withf(|_, run_id, outputs| {
                run_id == "run_1"
                    && outputs.len() == 2
                    && outputs[0].tool_call_id == "call_1"
                    && outputs[0].output.contains("Tool executed successfully")
                    && outputs[1].output == r#"{"status": "completed"}"#
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|thread, id, _| Ok(Run::new(id, thread, RunStatus::Queued)));
        mock.expect_retrieve_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|thread, id| Ok(Run::new(id, thread, RunStatus::Completed)));
        mock.expect_list_messages()
            .times(1)
            .returning(reply(r#"{"score_global": 1}"#));

        let result = run(mock, Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.provenance.tool_submissions, 1);
        assert_eq!(result.provenance.poll_count, result.provenance.tool_submissions + 1);
        assert!(!result.provenance.repaired);
    }

    #[tokio::test]
    async fn test_transport_errors_while_polling_are_retried() {
        let mut mock = MockAssistantClient::new();
        expect_submission(&mut mock);
        let mut seq = Sequence::new();
        mock.expect_retrieve_run()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(AssistantError::transport("connection reset")));
        mock.expect_retrieve_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|thread, id| Ok(Run::new(id, thread, RunStatus::Completed)));
        mock.expect_list_messages()
            .times(1)
            .returning(reply(r#"{"ok": true}"#));

        let executor = StageExecutor::new(
            Arc::new(mock),
            ExecutorConfig {
                transport_retry: crate::pipeline::RetryConfig::new()
                    .with_base_delay_ms(1)
                    .with_max_delay_ms(2),
                ..fast_config()
            },
            &routing(),
        );
        let result = executor
            .execute(&definition(), &context(), Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.provenance.poll_count, 3);
    }

    #[tokio::test]
    async fn test_failed_run_carries_remote_reason() {
        let mut mock = MockAssistantClient::new();
        expect_submission(&mut mock);
        mock.expect_retrieve_run().times(1).returning(|thread, id| {
            Ok(Run::new(id, thread, RunStatus::Failed).with_error("rate limit exceeded"))
        });

        let err = run(mock, Duration::from_secs(5)).await.unwrap_err();

        assert_eq!(err.kind(), "StageFailed");
        assert!(err.to_string().contains("rate limit exceeded"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_becomes_stage_failure() {
        let mut mock = MockAssistantClient::new();
        expect_submission(&mut mock);
        mock.expect_retrieve_run()
            .returning(|thread, id| Ok(Run::new(id, thread, RunStatus::Completed)));
        mock.expect_list_messages()
            .returning(reply("I could not complete the analysis."));

        let err = run(mock, Duration::from_secs(5)).await.unwrap_err();

        assert_eq!(err.kind(), "StageFailed");
        assert!(err.to_string().contains("No structured payload found"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_times_out() {
        let mut mock = MockAssistantClient::new();
        expect_submission(&mut mock);
        mock.expect_retrieve_run()
            .returning(|thread, id| Ok(Run::new(id, thread, RunStatus::InProgress)));

        let err = run(mock, Duration::from_millis(50)).await.unwrap_err();

        assert_eq!(
            err,
            StageError::Timeout {
                stage_id: "BLOC1".to_string(),
                budget: Duration::from_millis(50),
            }
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let mut mock = MockAssistantClient::new();
        expect_submission(&mut mock);
        mock.expect_retrieve_run()
            .returning(|thread, id| Ok(Run::new(id, thread, RunStatus::InProgress)));

        let executor = StageExecutor::new(Arc::new(mock), fast_config(), &routing());
        let token = Arc::new(CancellationToken::new());
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel("session abandoned");
            })
        };

        let err = executor
            .execute(&definition(), &context(), Duration::from_secs(5), &token)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, StageError::cancelled("BLOC1", "session abandoned"));
    }

    #[tokio::test]
    async fn test_missing_agent_fails_without_remote_calls() {
        let executor = StageExecutor::new(
            Arc::new(MockAssistantClient::new()),
            fast_config(),
            &AssistantConfig::default(),
        );
        let err = executor
            .execute(&definition(), &context(), Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "StageFailed");
    }

    #[tokio::test]
    async fn test_health_check_uses_routed_agent() {
        let mut mock = MockAssistantClient::new();
        mock.expect_retrieve_assistant()
            .withf(|id| id == "asst_bloc1")
            .returning(|id| {
                Ok(AssistantInfo {
                    id: id.to_string(),
                    name: Some("PESTEL".to_string()),
                    model: Some("gpt-4o".to_string()),
                    tools: Vec::new(),
                })
            });
        let executor = StageExecutor::new(Arc::new(mock), fast_config(), &routing());

        let info = executor.health_check("BLOC1").await.unwrap();
        assert_eq!(info.id, "asst_bloc1");
        assert!(executor.health_check("BLOC9").await.is_err());
    }
}
