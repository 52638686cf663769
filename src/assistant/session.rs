//! ConversationSession: one remote conversation thread plus the turns sent to it.

use tracing::{debug, info, instrument, warn};

use crate::error::TurnError;

use super::driver::RunDriver;
use super::service::{AssistantService, MessageRole, ThreadMessage, ToolInvocation};

pub struct ConversationSession<S> {
    driver: RunDriver<S>,
    assistant_id: String,
    thread_id: String,
    /// 過去ターンを含むツール呼び出し履歴
    tool_calls: Vec<ToolInvocation>,
}

impl<S: AssistantService> ConversationSession<S> {
    /// Create a new remote thread and wrap it.
    pub async fn open(driver: RunDriver<S>, assistant_id: impl Into<String>) -> Result<Self, TurnError> {
        let thread_id = driver.service().create_thread().await?;
        info!(target: "assistant", %thread_id, "thread_created");
        Ok(Self::resume(driver, assistant_id, thread_id))
    }

    /// Wrap an existing remote thread.
    pub fn resume(driver: RunDriver<S>, assistant_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self { driver, assistant_id: assistant_id.into(), thread_id: thread_id.into(), tool_calls: Vec::new() }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    /// Tool calls answered by this session so far, oldest first.
    pub fn tool_calls(&self) -> &[ToolInvocation] {
        &self.tool_calls
    }

    /// Send one user turn and return the assistant's reply for it.
    ///
    /// The reply is the newest assistant- or system-authored message posted
    /// after the user message; a completed run that posted nothing yields
    /// `EmptyResponse`. Image content arrives as `[image: ...]` placeholders.
    #[instrument(name = "send_message", skip(self, text), fields(thread_id = %self.thread_id))]
    pub async fn send_message(&mut self, text: &str) -> Result<String, TurnError> {
        let completed = self.driver.drive(&self.thread_id, &self.assistant_id, text).await?;
        self.tool_calls.extend(completed.tool_calls);

        let messages = self.driver.service().list_messages(&self.thread_id).await?;
        match reply_for_latest_turn(&messages) {
            Some(reply) => {
                debug!(target: "assistant", run_id = %completed.run_id, len = reply.len(), "reply_received");
                Ok(reply.to_string())
            }
            None => {
                warn!(target: "assistant", run_id = %completed.run_id, "completed_without_reply");
                Err(TurnError::EmptyResponse { run_id: completed.run_id })
            }
        }
    }

    /// Most recent assistant- or system-authored message body, if any.
    pub async fn latest_response(&self) -> Result<Option<String>, TurnError> {
        let messages = self.driver.service().list_messages(&self.thread_id).await?;
        Ok(messages.into_iter().find(|m| m.role.is_reply()).map(|m| m.text))
    }

    /// Delete the newest message of the thread and return it.
    pub async fn remove_last_message(&self) -> Result<ThreadMessage, TurnError> {
        let service = self.driver.service();
        let newest = service
            .list_messages(&self.thread_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TurnError::EmptyThread { thread_id: self.thread_id.clone() })?;
        service.delete_message(&self.thread_id, &newest.id).await?;
        info!(target: "assistant", thread_id = %self.thread_id, message_id = %newest.id, "message_removed");
        Ok(newest)
    }
}

/// `messages` は新しい順。直近のユーザーメッセージより新しい返信だけを対象にする。
/// 中身が一つもないメッセージは返信とみなさない。
fn reply_for_latest_turn(messages: &[ThreadMessage]) -> Option<&str> {
    messages
        .iter()
        .take_while(|m| m.role != MessageRole::User)
        .find(|m| m.role.is_reply() && !m.text.is_empty())
        .map(|m| m.text.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::mock::{ScriptStep, ScriptedAssistant};
    use crate::assistant::RunStatus;
    use crate::plugins::PluginRegistry;
    use std::sync::Arc;

    fn session_driver(svc: &Arc<ScriptedAssistant>) -> RunDriver<ScriptedAssistant> {
        RunDriver::new(Arc::clone(svc), Arc::new(PluginRegistry::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn send_message_returns_reply() {
        let svc = Arc::new(ScriptedAssistant::new().with_default_reply("hi there"));
        let mut session = ConversationSession::open(session_driver(&svc), "asst").await.unwrap();
        assert_eq!(session.send_message("hello").await.unwrap(), "hi there");
        assert_eq!(session.latest_response().await.unwrap().as_deref(), Some("hi there"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reply_is_not_returned_for_a_silent_run() {
        let svc = Arc::new(ScriptedAssistant::new());
        svc.push_script(vec![ScriptStep::Complete("first".into())]);
        svc.push_script(vec![ScriptStep::Status(RunStatus::InProgress), ScriptStep::CompleteSilently]);
        let mut session = ConversationSession::open(session_driver(&svc), "asst").await.unwrap();

        session.send_message("one").await.unwrap();
        let err = session.send_message("two").await.unwrap_err();
        assert!(matches!(err, TurnError::EmptyResponse { .. }), "{err}");
        // latest_response still sees the earlier reply
        assert_eq!(session.latest_response().await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn latest_response_on_fresh_thread_is_none() {
        let svc = Arc::new(ScriptedAssistant::new());
        let session = ConversationSession::open(session_driver(&svc), "asst").await.unwrap();
        assert_eq!(session.latest_response().await.unwrap(), None);
    }

    #[tokio::test]
    async fn system_messages_count_as_responses() {
        let svc = Arc::new(ScriptedAssistant::new());
        let thread = svc.create_thread().await.unwrap();
        svc.seed_message(&thread, MessageRole::User, "q");
        svc.seed_message(&thread, MessageRole::System, "notice");
        let session = ConversationSession::resume(session_driver(&svc), "asst", thread);
        assert_eq!(session.latest_response().await.unwrap().as_deref(), Some("notice"));
    }

    #[test]
    fn reply_selection_stops_at_the_latest_user_message() {
        let msg = |id: &str, role, text: &str| ThreadMessage { id: id.into(), role, text: text.into() };
        // 新しい順
        let turn = vec![
            msg("m4", MessageRole::Assistant, "[image: file_abc]"),
            msg("m3", MessageRole::User, "draw a cat"),
            msg("m2", MessageRole::Assistant, "older reply"),
        ];
        assert_eq!(reply_for_latest_turn(&turn), Some("[image: file_abc]"));

        let system_only = vec![msg("m2", MessageRole::System, "notice"), msg("m1", MessageRole::User, "q")];
        assert_eq!(reply_for_latest_turn(&system_only), Some("notice"));

        let blank = vec![
            msg("m3", MessageRole::Assistant, ""),
            msg("m2", MessageRole::User, "q"),
            msg("m1", MessageRole::Assistant, "old"),
        ];
        assert_eq!(reply_for_latest_turn(&blank), None);
    }

    #[tokio::test]
    async fn remove_last_message_deletes_newest() {
        let svc = Arc::new(ScriptedAssistant::new());
        let thread = svc.create_thread().await.unwrap();
        svc.seed_message(&thread, MessageRole::User, "old");
        let newest = svc.seed_message(&thread, MessageRole::Assistant, "new");
        let session = ConversationSession::resume(session_driver(&svc), "asst", thread.clone());

        let removed = session.remove_last_message().await.unwrap();
        assert_eq!(removed.id, newest);
        let left: Vec<_> = svc.messages(&thread).into_iter().map(|m| m.text).collect();
        assert_eq!(left, vec!["old"]);
    }

    #[tokio::test]
    async fn remove_last_message_on_empty_thread_fails() {
        let svc = Arc::new(ScriptedAssistant::new());
        let session = ConversationSession::open(session_driver(&svc), "asst").await.unwrap();
        let err = session.remove_last_message().await.unwrap_err();
        assert!(matches!(err, TurnError::EmptyThread { .. }));
    }
}
