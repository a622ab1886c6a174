//! A scripted stand-in for the remote agent service.

use crate::assistant::{
    AssistantClient, AssistantInfo, RequiredAction, Run, RunStatus, ThreadMessage, ToolCall,
    ToolOutput,
};
use crate::config::AssistantConfig;
use crate::errors::AssistantError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// One scripted answer to a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Report this status.
    Status(RunStatus),
    /// Pause the run on these tool calls.
    RequiresAction(Vec<ToolCall>),
    /// Fail the poll itself with a transport error.
    TransportError(String),
    /// End the run as failed with this remote message.
    Fail(String),
}

/// How the remote agent of one stage behaves.
#[derive(Debug, Clone)]
pub struct StageScript {
    steps: Vec<ScriptStep>,
    final_step: ScriptStep,
    reply: String,
    poll_delay: Duration,
}

impl StageScript {
    /// A run that completes on the first poll with `reply`.
    #[must_use]
    pub fn completing(reply: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            final_step: ScriptStep::Status(RunStatus::Completed),
            reply: reply.into(),
            poll_delay: Duration::ZERO,
        }
    }

    /// A run that ends as failed with `message` on the first poll.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::completing("").with_step(ScriptStep::Fail(message.into()))
    }

    /// A run that never leaves `in_progress`.
    #[must_use]
    pub fn hanging() -> Self {
        let mut script = Self::completing("");
        script.final_step = ScriptStep::Status(RunStatus::InProgress);
        script
    }

    /// A run whose every poll fails at the transport level.
    #[must_use]
    pub fn unreachable() -> Self {
        let mut script = Self::completing("");
        script.final_step = ScriptStep::TransportError("connection refused".to_string());
        script
    }

    /// Appends a poll answer. Once the steps run out, every poll gets the
    /// script's final answer.
    #[must_use]
    pub fn with_step(mut self, step: ScriptStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Pauses the run once on a single `file_search` call.
    #[must_use]
    pub fn requiring_action_once(self) -> Self {
        self.with_step(ScriptStep::RequiresAction(vec![ToolCall::function(
            "call_1",
            "file_search",
        )]))
    }

    /// Fails the next `count` polls at the transport level.
    #[must_use]
    pub fn with_transport_failures(mut self, count: usize) -> Self {
        for attempt in 0..count {
            self = self.with_step(ScriptStep::TransportError(format!(
                "connection reset (attempt {attempt})"
            )));
        }
        self
    }

    /// Delays every poll answer.
    #[must_use]
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }
}

/// What one stage's agent observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCalls {
    /// Conversations opened for the stage.
    pub threads: Vec<String>,
    /// Messages posted to those conversations.
    pub messages: Vec<String>,
    /// Status polls answered.
    pub polls: usize,
    /// Tool output submissions received.
    pub submissions: usize,
    /// Tool outputs received, in order.
    pub tool_outputs: Vec<ToolOutput>,
}

#[derive(Debug)]
struct RunState {
    stage_id: String,
    thread_id: String,
    cursor: usize,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: usize,
    threads: HashMap<String, Vec<ThreadMessage>>,
    runs: HashMap<String, RunState>,
    calls: BTreeMap<String, StageCalls>,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }
}

/// An in-memory agent service driven by per-stage scripts.
///
/// Each stage gets the agent id `asst_<stage>`; [`Self::routing`] returns
/// the matching configuration.
#[derive(Debug, Default)]
pub struct ScriptedAssistant {
    scripts: BTreeMap<String, StageScript>,
    inner: Mutex<Inner>,
}

impl ScriptedAssistant {
    /// Creates a service with no stages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the script of a stage.
    #[must_use]
    pub fn with_stage(mut self, stage_id: impl Into<String>, script: StageScript) -> Self {
        self.scripts.insert(stage_id.into(), script);
        self
    }

    /// Returns the agent id assigned to a stage.
    #[must_use]
    pub fn assistant_id(stage_id: &str) -> String {
        format!("asst_{}", stage_id.to_lowercase())
    }

    /// Returns routing for every scripted stage.
    #[must_use]
    pub fn routing(&self) -> AssistantConfig {
        self.scripts
            .keys()
            .fold(AssistantConfig::default(), |config, stage| {
                config.with_assistant(stage.clone(), Self::assistant_id(stage))
            })
    }

    /// Returns what the agent of `stage_id` observed.
    #[must_use]
    pub fn calls(&self, stage_id: &str) -> StageCalls {
        self.inner.lock().calls.get(stage_id).cloned().unwrap_or_default()
    }

    /// Returns every conversation id handed out.
    #[must_use]
    pub fn thread_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().threads.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn stage_for(&self, assistant_id: &str) -> Option<&str> {
        self.scripts
            .keys()
            .find(|stage| Self::assistant_id(stage) == assistant_id)
            .map(String::as_str)
    }

    fn unknown_run(run_id: &str) -> AssistantError {
        AssistantError::Api {
            status: 404,
            message: format!("No run found with id '{run_id}'"),
        }
    }
}

#[async_trait]
impl AssistantClient for ScriptedAssistant {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        let mut inner = self.inner.lock();
        let thread_id = inner.next_id("thread");
        inner.threads.insert(thread_id.clone(), Vec::new());
        Ok(thread_id)
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError> {
        let mut inner = self.inner.lock();
        let message_id = inner.next_id("msg");
        let thread = inner.threads.get_mut(thread_id).ok_or_else(|| AssistantError::Api {
            status: 404,
            message: format!("No thread found with id '{thread_id}'"),
        })?;
        thread.push(ThreadMessage::text(message_id, "user", content));
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError> {
        let stage_id = self.stage_for(assistant_id).ok_or_else(|| AssistantError::Api {
            status: 404,
            message: format!("No assistant found with id '{assistant_id}'"),
        })?;

        let mut inner = self.inner.lock();
        let posted = inner
            .threads
            .get(thread_id)
            .and_then(|messages| messages.last())
            .and_then(ThreadMessage::first_text)
            .map(str::to_string)
            .unwrap_or_default();
        let run_id = inner.next_id("run");
        inner.runs.insert(
            run_id.clone(),
            RunState {
                stage_id: stage_id.to_string(),
                thread_id: thread_id.to_string(),
                cursor: 0,
            },
        );
        let calls = inner.calls.entry(stage_id.to_string()).or_default();
        calls.threads.push(thread_id.to_string());
        calls.messages.push(posted);

        Ok(Run::new(run_id, thread_id, RunStatus::Queued))
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let delay = {
            let inner = self.inner.lock();
            let run = inner.runs.get(run_id).ok_or_else(|| Self::unknown_run(run_id))?;
            self.scripts.get(&run.stage_id).map_or(Duration::ZERO, |s| s.poll_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        let (stage_id, step) = {
            let run = inner.runs.get_mut(run_id).ok_or_else(|| Self::unknown_run(run_id))?;
            let script = self.scripts.get(&run.stage_id).ok_or_else(|| Self::unknown_run(run_id))?;
            let step = script
                .steps
                .get(run.cursor)
                .cloned()
                .unwrap_or_else(|| script.final_step.clone());
            run.cursor += 1;
            (run.stage_id.clone(), step)
        };
        inner.calls.entry(stage_id.clone()).or_default().polls += 1;

        match step {
            ScriptStep::TransportError(message) => Err(AssistantError::transport(message)),
            ScriptStep::Fail(message) => {
                Ok(Run::new(run_id, thread_id, RunStatus::Failed).with_error(message))
            }
            ScriptStep::RequiresAction(tool_calls) => Ok(Run::new(
                run_id,
                thread_id,
                RunStatus::RequiresAction,
            )
            .with_required_action(RequiredAction::tool_outputs(tool_calls))),
            ScriptStep::Status(RunStatus::Completed) => {
                let reply = self
                    .scripts
                    .get(&stage_id)
                    .map(|s| s.reply.clone())
                    .unwrap_or_default();
                let message_id = inner.next_id("msg");
                if let Some(thread) = inner.threads.get_mut(thread_id) {
                    thread.push(ThreadMessage::text(message_id, "assistant", reply));
                }
                Ok(Run::new(run_id, thread_id, RunStatus::Completed))
            }
            ScriptStep::Status(status) => Ok(Run::new(run_id, thread_id, status)),
        }
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run, AssistantError> {
        let mut inner = self.inner.lock();
        let stage_id = inner
            .runs
            .get(run_id)
            .filter(|run| run.thread_id == thread_id)
            .map(|run| run.stage_id.clone())
            .ok_or_else(|| Self::unknown_run(run_id))?;
        let calls = inner.calls.entry(stage_id).or_default();
        calls.submissions += 1;
        calls.tool_outputs.extend(outputs);
        Ok(Run::new(run_id, thread_id, RunStatus::Queued))
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        self.inner
            .lock()
            .threads
            .get(thread_id)
            .cloned()
            .ok_or_else(|| AssistantError::Api {
                status: 404,
                message: format!("No thread found with id '{thread_id}'"),
            })
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<AssistantInfo, AssistantError> {
        let stage_id = self.stage_for(assistant_id).ok_or_else(|| AssistantError::Api {
            status: 404,
            message: format!("No assistant found with id '{assistant_id}'"),
        })?;
        Ok(AssistantInfo {
            id: assistant_id.to_string(),
            name: Some(stage_id.to_string()),
            model: Some("scripted".to_string()),
            tools: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_progression() {
        let service = ScriptedAssistant::new().with_stage(
            "S2",
            StageScript::completing(r#"{"ok": true}"#)
                .with_transport_failures(1)
                .requiring_action_once(),
        );
        let asst = ScriptedAssistant::assistant_id("S2");
        assert_eq!(service.routing().assistant_for("S2"), Some(asst.as_str()));

        let thread = service.create_thread().await.unwrap();
        service.post_message(&thread, "hello").await.unwrap();
        let run = service.create_run(&thread, &asst).await.unwrap();

        assert!(service.retrieve_run(&thread, &run.id).await.is_err());
        let paused = service.retrieve_run(&thread, &run.id).await.unwrap();
        assert_eq!(paused.status, RunStatus::RequiresAction);
        service
            .submit_tool_outputs(&thread, &run.id, vec![ToolOutput::acknowledge(&paused.required_action.unwrap().tool_calls()[0])])
            .await
            .unwrap();
        let done = service.retrieve_run(&thread, &run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);

        let messages = service.list_messages(&thread).await.unwrap();
        assert_eq!(messages.last().and_then(ThreadMessage::first_text), Some(r#"{"ok": true}"#));

        let calls = service.calls("S2");
        assert_eq!(calls.polls, 3);
        assert_eq!(calls.submissions, 1);
        assert_eq!(calls.messages, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_assistant_rejected() {
        let service = ScriptedAssistant::new();
        let thread = service.create_thread().await.unwrap();
        let err = service.create_run(&thread, "asst_missing").await.unwrap_err();
        assert!(matches!(err, AssistantError::Api { status: 404, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_script_never_answers() {
        let service = ScriptedAssistant::new().with_stage("S3", StageScript::unreachable());
        let thread = service.create_thread().await.unwrap();
        let run = service
            .create_run(&thread, &ScriptedAssistant::assistant_id("S3"))
            .await
            .unwrap();

        for _ in 0..5 {
            let err = service.retrieve_run(&thread, &run.id).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert_eq!(service.calls("S3").polls, 5);
    }
}
