//! `AssistantService` backed by the OpenAI Assistants API (`async-openai`).

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    self as oai, AssistantTools, AssistantToolsFunction, CreateMessageRequestArgs, CreateRunRequestArgs,
    CreateThreadRequestArgs, MessageContent, ModifyAssistantRequestArgs, SubmitToolOutputsRunRequest, ToolsOutputs,
};
use tracing::{debug, info, instrument, trace};

use crate::error::ServiceError;
use crate::plugins::PluginRegistry;

use super::service::{
    AssistantService, MessageRole, Run, RunStatus, ThreadMessage, ToolCallRequest, ToolCallResult,
};

/// list_messages で取得する最大件数 (API 上限)
const LIST_LIMIT: &str = "100";

#[derive(Clone)]
pub struct OpenAiAssistant {
    client: Client<OpenAIConfig>,
}

impl std::fmt::Debug for OpenAiAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAssistant").finish_non_exhaustive()
    }
}

impl OpenAiAssistant {
    pub fn new(api_key: &str) -> Self {
        Self::with_client(Client::with_config(OpenAIConfig::new().with_api_key(api_key)))
    }

    pub fn with_client(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    /// Replace the assistant's tool list with the registry's function definitions.
    #[instrument(skip(self, registry), fields(tools = registry.len()))]
    pub async fn register_tools(&self, assistant_id: &str, registry: &PluginRegistry) -> Result<(), ServiceError> {
        let tools: Vec<AssistantTools> = registry
            .function_objects()
            .into_iter()
            .map(|function| AssistantTools::Function(AssistantToolsFunction { function }))
            .collect();
        let request = ModifyAssistantRequestArgs::default().tools(tools).build().map_err(classify)?;
        self.client.assistants().update(assistant_id, request).await.map_err(classify)?;
        info!(target: "assistant", assistant_id, names = ?registry.names(), "assistant_tools_synced");
        Ok(())
    }
}

/// SDK のエラーを再試行可否で分類する。
/// `invalid_request_error` (スレッドに実行中 run がある等) のみ Rejected。
fn classify(err: OpenAIError) -> ServiceError {
    match &err {
        OpenAIError::ApiError(api) if api.r#type.as_deref() == Some("invalid_request_error") => {
            ServiceError::Rejected(api.message.clone())
        }
        _ => ServiceError::Other(err.to_string()),
    }
}

fn map_status(status: &oai::RunStatus) -> RunStatus {
    match status {
        oai::RunStatus::Queued => RunStatus::Queued,
        oai::RunStatus::InProgress => RunStatus::InProgress,
        oai::RunStatus::RequiresAction => RunStatus::NeedsToolOutput,
        oai::RunStatus::Cancelling => RunStatus::Cancelling,
        oai::RunStatus::Cancelled => RunStatus::Cancelled,
        oai::RunStatus::Failed => RunStatus::Failed,
        oai::RunStatus::Completed => RunStatus::Completed,
        oai::RunStatus::Incomplete => RunStatus::Incomplete,
        oai::RunStatus::Expired => RunStatus::Expired,
    }
}

fn map_run(run: oai::RunObject) -> Run {
    let pending_tool_calls = run
        .required_action
        .map(|action| {
            action
                .submit_tool_outputs
                .tool_calls
                .into_iter()
                .map(|call| ToolCallRequest::from_raw(call.id, call.function.name, &call.function.arguments))
                .collect()
        })
        .unwrap_or_default();
    Run {
        id: run.id,
        status: map_status(&run.status),
        pending_tool_calls,
        last_error: run.last_error.map(|e| e.message),
    }
}

fn map_message(msg: oai::MessageObject) -> ThreadMessage {
    let role = match msg.role {
        oai::MessageRole::User => MessageRole::User,
        oai::MessageRole::Assistant => MessageRole::Assistant,
    };
    let text = msg.content.into_iter().map(content_text).collect::<Vec<_>>().join("\n");
    ThreadMessage { id: msg.id, role, text }
}

/// 画像だけの返信も空にならないよう、画像は参照先を示すプレースホルダにする
fn content_text(content: MessageContent) -> String {
    match content {
        MessageContent::Text(t) => t.text.value,
        MessageContent::ImageFile(f) => format!("[image: {}]", f.image_file.file_id),
        MessageContent::ImageUrl(u) => format!("[image: {}]", u.image_url.url),
        MessageContent::Refusal(r) => r.refusal,
    }
}

impl AssistantService for OpenAiAssistant {
    async fn create_thread(&self) -> Result<String, ServiceError> {
        let request = CreateThreadRequestArgs::default().build().map_err(classify)?;
        let thread = self.client.threads().create(request).await.map_err(classify)?;
        Ok(thread.id)
    }

    async fn create_message(&self, thread_id: &str, role: MessageRole, text: &str) -> Result<(), ServiceError> {
        // API は user / assistant のみ受け付ける
        let role = match role {
            MessageRole::Assistant => oai::MessageRole::Assistant,
            MessageRole::User | MessageRole::System => oai::MessageRole::User,
        };
        let request = CreateMessageRequestArgs::default()
            .role(role)
            .content(text.to_string())
            .build()
            .map_err(classify)?;
        let msg = self.client.threads().messages(thread_id).create(request).await.map_err(classify)?;
        debug!(target: "assistant", thread_id, message_id = %msg.id, "message_created");
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, ServiceError> {
        let request = CreateRunRequestArgs::default().assistant_id(assistant_id).build().map_err(classify)?;
        let run = self.client.threads().runs(thread_id).create(request).await.map_err(classify)?;
        Ok(map_run(run))
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ServiceError> {
        let run = self.client.threads().runs(thread_id).retrieve(run_id).await.map_err(classify)?;
        Ok(map_run(run))
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolCallResult>,
    ) -> Result<(), ServiceError> {
        trace!(target: "assistant", run_id, count = outputs.len(), "submit_tool_outputs");
        let request = SubmitToolOutputsRunRequest {
            tool_outputs: outputs
                .into_iter()
                .map(|o| ToolsOutputs { tool_call_id: Some(o.call_id), output: Some(o.output) })
                .collect(),
            stream: None,
        };
        self.client
            .threads()
            .runs(thread_id)
            .submit_tool_outputs(run_id, request)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ServiceError> {
        // 既定の並び順は新しい順 (order=desc)
        let resp = self
            .client
            .threads()
            .messages(thread_id)
            .list(&[("limit", LIST_LIMIT)])
            .await
            .map_err(classify)?;
        Ok(resp.data.into_iter().map(map_message).collect())
    }

    async fn delete_message(&self, thread_id: &str, message_id: &str) -> Result<(), ServiceError> {
        self.client.threads().messages(thread_id).delete(message_id).await.map_err(classify)?;
        Ok(())
    }
}
