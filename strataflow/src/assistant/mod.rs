//! Remote analysis agent client.
//!
//! The engine drives runs through [`AssistantClient`] only, so tests can swap
//! in a scripted or mocked service.

#[cfg(feature = "http")]
mod http;
mod types;

#[cfg(feature = "http")]
pub use http::OpenAiAssistantClient;
pub use types::{
    AssistantInfo, AssistantTool, FunctionCall, MessageContent, RequiredAction, Run, RunError,
    RunStatus, SubmitToolOutputs, TextContent, ThreadMessage, ToolCall, ToolOutput,
};

use crate::errors::AssistantError;
use async_trait::async_trait;

/// Operations of a conversational agent service modeled on the Assistants
/// protocol.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssistantClient: Send + Sync {
    /// Opens a new conversation and returns its id.
    async fn create_thread(&self) -> Result<String, AssistantError>;

    /// Posts a user message to a conversation.
    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError>;

    /// Starts a run of `assistant_id` on the conversation.
    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError>;

    /// Fetches the current state of a run.
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;

    /// Submits outputs for the tool calls a paused run is waiting on.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run, AssistantError>;

    /// Lists the messages of a conversation, oldest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError>;

    /// Fetches agent metadata.
    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<AssistantInfo, AssistantError>;
}
