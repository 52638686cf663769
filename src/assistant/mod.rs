//! Assistant module aggregator.
//!
//! `service` (contract) → `driver` (run poll / tool dispatch) → `session` (one thread).

mod driver;
pub mod mock; // scripted in-memory service
mod openai; // Assistants API adapter
mod retry;
mod service;
mod session;

pub use driver::{CompletedRun, DriverPolicy, RunDriver};
pub use openai::OpenAiAssistant;
pub use retry::RetryPolicy;
pub use service::{
    AssistantService, MessageRole, Run, RunStatus, ThreadMessage, ToolArguments, ToolCallRequest, ToolCallResult,
    ToolInvocation,
};
pub use session::ConversationSession;
