//! Wire types of the remote agent protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting for a worker.
    Queued,
    /// Executing.
    InProgress,
    /// Paused until tool outputs are submitted.
    RequiresAction,
    /// Cancellation requested, not yet effective.
    Cancelling,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled.
    Cancelled,
    /// Ran out of time on the remote side.
    Expired,
    /// Stopped early, e.g. on a token limit.
    Incomplete,
    /// A status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Returns true if the run will not change status anymore.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired | Self::Incomplete
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Incomplete => "incomplete",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Error reported by the remote service for a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunError {
    /// Machine-readable code.
    #[serde(default)]
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// A named function invocation inside a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Raw argument text.
    #[serde(default)]
    pub arguments: String,
}

/// One tool invocation awaiting acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call identifier.
    pub id: String,
    /// Tool type, usually `function`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// The invoked function.
    #[serde(default)]
    pub function: Option<FunctionCall>,
}

impl ToolCall {
    /// Creates a function tool call.
    #[must_use]
    pub fn function(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: Some(FunctionCall {
                name: name.into(),
                arguments: String::new(),
            }),
        }
    }

    /// Returns the tool name: the function name if present, else the type.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        self.function
            .as_ref()
            .map_or(self.kind.as_str(), |f| f.name.as_str())
    }
}

/// Tool calls listed by a `submit_tool_outputs` action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    /// Pending tool calls.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// The action a paused run is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAction {
    /// Action type, `submit_tool_outputs` for tool acknowledgment.
    #[serde(rename = "type")]
    pub kind: String,
    /// Pending tool calls.
    #[serde(default)]
    pub submit_tool_outputs: Option<SubmitToolOutputs>,
}

impl RequiredAction {
    /// Creates a tool output action for the given calls.
    #[must_use]
    pub fn tool_outputs(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            kind: "submit_tool_outputs".to_string(),
            submit_tool_outputs: Some(SubmitToolOutputs { tool_calls }),
        }
    }

    /// Returns the pending tool calls, empty for other action types.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.submit_tool_outputs {
            Some(outputs) if self.kind == "submit_tool_outputs" => outputs.tool_calls.as_slice(),
            _ => &[],
        }
    }
}

/// A remote run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier.
    pub id: String,
    /// Conversation the run belongs to.
    pub thread_id: String,
    /// Current status.
    pub status: RunStatus,
    /// Pending action when `status` is `requires_action`.
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    /// Failure details when `status` is `failed`.
    #[serde(default)]
    pub last_error: Option<RunError>,
}

impl Run {
    /// Creates a run with the given status.
    #[must_use]
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            status,
            required_action: None,
            last_error: None,
        }
    }

    /// Attaches a required action.
    #[must_use]
    pub fn with_required_action(mut self, action: RequiredAction) -> Self {
        self.required_action = Some(action);
        self
    }

    /// Attaches a failure.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(RunError {
            code: "server_error".to_string(),
            message: message.into(),
        });
        self
    }

    /// Describes why the run ended unsuccessfully.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        match &self.last_error {
            Some(err) if !err.message.is_empty() => format!("run {}: {}", self.status, err.message),
            _ => format!("run {}", self.status),
        }
    }
}

/// Output submitted for one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The acknowledged tool call.
    pub tool_call_id: String,
    /// Output text.
    pub output: String,
}

impl ToolOutput {
    /// Builds the generic acknowledgment for a tool the service ran itself.
    ///
    /// The call is never interpreted; only the wording differs for the
    /// built-in retrieval and code tools.
    #[must_use]
    pub fn acknowledge(call: &ToolCall) -> Self {
        let output = match call.tool_name() {
            "file_search" | "code_interpreter" => {
                r#"{"status": "completed", "message": "Tool executed successfully"}"#
            }
            _ => r#"{"status": "completed"}"#,
        };
        Self {
            tool_call_id: call.id.clone(),
            output: output.to_string(),
        }
    }
}

/// Text part of a message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextContent {
    /// The text.
    pub value: String,
}

/// One content part of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Part type, `text` for text parts.
    #[serde(rename = "type")]
    pub kind: String,
    /// Text, for text parts.
    #[serde(default)]
    pub text: Option<TextContent>,
}

/// A conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Message identifier.
    pub id: String,
    /// `user` or `assistant`.
    pub role: String,
    /// Content parts.
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl ThreadMessage {
    /// Creates a single-part text message.
    #[must_use]
    pub fn text(id: impl Into<String>, role: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            content: vec![MessageContent {
                kind: "text".to_string(),
                text: Some(TextContent { value: value.into() }),
            }],
        }
    }

    /// Returns true for messages written by the agent.
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }

    /// Returns the first text part.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content
            .iter()
            .find_map(|part| part.text.as_ref().map(|t| t.value.as_str()))
    }
}

/// A remote agent tool declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantTool {
    /// Tool type.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Remote agent metadata, used for health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantInfo {
    /// Agent identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Backing model.
    #[serde(default)]
    pub model: Option<String>,
    /// Declared tools.
    #[serde(default)]
    pub tools: Vec<AssistantTool>,
}
