//! Assistant service contract and the data model it exchanges.
//!
//! The remote service owns threads, messages and runs; this crate only keeps
//! identifiers. `AssistantService` is the seam the driver, session and
//! gateway are generic over (`OpenAiAssistant` in production,
//! `ScriptedAssistant` in tests).

use std::fmt::{self, Display};
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServiceError;

/// Structured tool-call arguments (JSON object).
pub type ToolArguments = Map<String, Value>;

/// Run status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    NeedsToolOutput,
    Cancelling,
    Completed,
    Cancelled,
    Expired,
    Failed,
    Incomplete,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Cancelled
                | RunStatus::Expired
                | RunStatus::Failed
                | RunStatus::Incomplete
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::NeedsToolOutput => "needs_tool_output",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Failed => "failed",
            RunStatus::Incomplete => "incomplete",
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the remote assistant mid-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    /// Parsed arguments. When the payload is not valid JSON the raw text is kept
    /// as `Value::String` so the failure can be reported back to the model.
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self { call_id: call_id.into(), tool_name: tool_name.into(), arguments }
    }

    /// Build from the raw JSON argument string the service sends.
    pub fn from_raw(call_id: impl Into<String>, tool_name: impl Into<String>, raw: &str) -> Self {
        let arguments = if raw.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };
        Self::new(call_id, tool_name, arguments)
    }
}

/// Output for exactly one `ToolCallRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub output: String,
}

/// One execution of the assistant against a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    /// Pending requests, only populated while `status == NeedsToolOutput`.
    #[serde(default)]
    pub pending_tool_calls: Vec<ToolCallRequest>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Run {
    pub fn new(id: impl Into<String>, status: RunStatus) -> Self {
        Self { id: id.into(), status, pending_tool_calls: Vec::new(), last_error: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// assistant / system が書いたメッセージか
    pub fn is_reply(self) -> bool {
        matches!(self, MessageRole::Assistant | MessageRole::System)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: MessageRole,
    pub text: String,
}

/// Audit record of one resolved tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
    pub result: String,
}

impl Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} args={} result(len={})", self.tool_name, self.arguments, self.result.len())
    }
}

/// Remote assistant service operations consumed by the core.
pub trait AssistantService: Send + Sync + 'static {
    fn create_thread(&self) -> impl Future<Output = Result<String, ServiceError>> + Send;

    fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        text: &str,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> impl Future<Output = Result<Run, ServiceError>> + Send;

    fn get_run(&self, thread_id: &str, run_id: &str) -> impl Future<Output = Result<Run, ServiceError>> + Send;

    fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolCallResult>,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Messages of the thread, newest first.
    fn list_messages(&self, thread_id: &str) -> impl Future<Output = Result<Vec<ThreadMessage>, ServiceError>> + Send;

    fn delete_message(
        &self,
        thread_id: &str,
        message_id: &str,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;
}
