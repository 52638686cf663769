//! In-memory scripted assistant service.
//!
//! Every `create_run` consumes one queued script; each `get_run` advances the
//! run by one `ScriptStep`. While a run waits for tool outputs it keeps
//! reporting the same pending calls until all of them are answered in a single
//! submission, mirroring the real service.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::error::ServiceError;

use super::service::{
    AssistantService, MessageRole, Run, RunStatus, ThreadMessage, ToolCallRequest, ToolCallResult,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Report a plain status (queued / in_progress / cancelling ...).
    Status(RunStatus),
    /// Ask for tool outputs.
    ToolCalls(Vec<ToolCallRequest>),
    /// Post an assistant message and complete.
    Complete(String),
    /// Complete without posting anything.
    CompleteSilently,
    /// End abnormally with the given terminal status and optional reason.
    End(RunStatus, Option<String>),
}

/// Record of one service call, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    CreateThread,
    CreateMessage { thread_id: String, text: String },
    CreateRun { thread_id: String },
    GetRun { run_id: String },
    SubmitToolOutputs { run_id: String, outputs: Vec<ToolCallResult> },
    ListMessages { thread_id: String },
    DeleteMessage { thread_id: String, message_id: String },
}

struct RunState {
    steps: VecDeque<ScriptStep>,
    current: Run,
    thread_id: String,
    awaiting_outputs: bool,
}

#[derive(Default)]
struct State {
    next_id: u64,
    threads: HashMap<String, Vec<ThreadMessage>>,
    scripts: VecDeque<Vec<ScriptStep>>,
    default_reply: Option<String>,
    runs: HashMap<String, RunState>,
    reject_messages: usize,
    reject_runs: usize,
    fail_runs: usize,
    calls: Vec<ServiceCall>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }
}

#[derive(Default)]
pub struct ScriptedAssistant {
    state: Mutex<State>,
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs without a queued script go `in_progress` then complete with `reply`.
    pub fn with_default_reply(self, reply: impl Into<String>) -> Self {
        self.state().default_reply = Some(reply.into());
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queue the script for the next created run.
    pub fn push_script(&self, steps: Vec<ScriptStep>) -> &Self {
        self.state().scripts.push_back(steps);
        self
    }

    /// Reject the next `n` message creations as malformed requests.
    pub fn reject_next_messages(&self, n: usize) -> &Self {
        self.state().reject_messages = n;
        self
    }

    /// Reject the next `n` run creations as malformed requests.
    pub fn reject_next_runs(&self, n: usize) -> &Self {
        self.state().reject_runs = n;
        self
    }

    /// Fail the next `n` run creations with a non-retryable error.
    pub fn fail_next_runs(&self, n: usize) -> &Self {
        self.state().fail_runs = n;
        self
    }

    /// Seed a thread with a message (oldest-first order).
    pub fn seed_message(&self, thread_id: &str, role: MessageRole, text: &str) -> String {
        let mut st = self.state();
        let id = st.next_id("msg");
        st.threads.entry(thread_id.to_string()).or_default().push(ThreadMessage {
            id: id.clone(),
            role,
            text: text.to_string(),
        });
        id
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.state().calls.clone()
    }

    /// Thread messages, oldest first.
    pub fn messages(&self, thread_id: &str) -> Vec<ThreadMessage> {
        self.state().threads.get(thread_id).cloned().unwrap_or_default()
    }

    pub fn thread_count(&self) -> usize {
        self.state().threads.len()
    }

    /// Tool-output batches submitted so far.
    pub fn submissions(&self) -> Vec<Vec<ToolCallResult>> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                ServiceCall::SubmitToolOutputs { outputs, .. } => Some(outputs.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count_calls(&self, pred: impl Fn(&ServiceCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }
}

impl AssistantService for ScriptedAssistant {
    async fn create_thread(&self) -> Result<String, ServiceError> {
        let mut st = self.state();
        st.calls.push(ServiceCall::CreateThread);
        let id = st.next_id("thread");
        st.threads.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn create_message(&self, thread_id: &str, role: MessageRole, text: &str) -> Result<(), ServiceError> {
        let mut st = self.state();
        st.calls.push(ServiceCall::CreateMessage { thread_id: thread_id.to_string(), text: text.to_string() });
        if st.reject_messages > 0 {
            st.reject_messages -= 1;
            return Err(ServiceError::Rejected("thread is busy".into()));
        }
        if !st.threads.contains_key(thread_id) {
            return Err(ServiceError::Other(format!("no such thread: {thread_id}")));
        }
        let id = st.next_id("msg");
        if let Some(msgs) = st.threads.get_mut(thread_id) {
            msgs.push(ThreadMessage { id, role, text: text.to_string() });
        }
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, _assistant_id: &str) -> Result<Run, ServiceError> {
        let mut st = self.state();
        st.calls.push(ServiceCall::CreateRun { thread_id: thread_id.to_string() });
        if st.reject_runs > 0 {
            st.reject_runs -= 1;
            return Err(ServiceError::Rejected("thread already has an active run".into()));
        }
        if st.fail_runs > 0 {
            st.fail_runs -= 1;
            return Err(ServiceError::Other("internal server error".into()));
        }
        let steps = match st.scripts.pop_front() {
            Some(steps) => steps,
            None => match st.default_reply.clone() {
                Some(reply) => vec![ScriptStep::Status(RunStatus::InProgress), ScriptStep::Complete(reply)],
                None => Vec::new(),
            },
        };
        let id = st.next_id("run");
        let run = Run::new(id.clone(), RunStatus::Queued);
        st.runs.insert(
            id,
            RunState { steps: steps.into(), current: run.clone(), thread_id: thread_id.to_string(), awaiting_outputs: false },
        );
        Ok(run)
    }

    async fn get_run(&self, _thread_id: &str, run_id: &str) -> Result<Run, ServiceError> {
        let mut st = self.state();
        st.calls.push(ServiceCall::GetRun { run_id: run_id.to_string() });
        let mut posted: Option<(String, String)> = None;
        let run = {
            let Some(rs) = st.runs.get_mut(run_id) else {
                return Err(ServiceError::Other(format!("no such run: {run_id}")));
            };
            if !rs.awaiting_outputs && !rs.current.status.is_terminal() {
                match rs.steps.pop_front() {
                    Some(ScriptStep::Status(s)) => rs.current.status = s,
                    Some(ScriptStep::ToolCalls(calls)) => {
                        rs.awaiting_outputs = !calls.is_empty();
                        rs.current.status = RunStatus::NeedsToolOutput;
                        rs.current.pending_tool_calls = calls;
                    }
                    Some(ScriptStep::Complete(text)) => {
                        posted = Some((rs.thread_id.clone(), text));
                        rs.current.status = RunStatus::Completed;
                    }
                    Some(ScriptStep::CompleteSilently) => rs.current.status = RunStatus::Completed,
                    Some(ScriptStep::End(status, reason)) => {
                        rs.current.status = status;
                        rs.current.last_error = reason;
                    }
                    None => {}
                }
            }
            rs.current.clone()
        };
        if let Some((thread_id, text)) = posted {
            let id = st.next_id("msg");
            st.threads.entry(thread_id).or_default().push(ThreadMessage { id, role: MessageRole::Assistant, text });
        }
        Ok(run)
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolCallResult>,
    ) -> Result<(), ServiceError> {
        let mut st = self.state();
        st.calls.push(ServiceCall::SubmitToolOutputs { run_id: run_id.to_string(), outputs: outputs.clone() });
        let Some(rs) = st.runs.get_mut(run_id) else {
            return Err(ServiceError::Other(format!("no such run: {run_id}")));
        };
        if !rs.awaiting_outputs {
            return Err(ServiceError::Rejected(format!("run {run_id} is not waiting for tool outputs")));
        }
        let mut expected: Vec<&str> = rs.current.pending_tool_calls.iter().map(|c| c.call_id.as_str()).collect();
        let mut got: Vec<&str> = outputs.iter().map(|o| o.call_id.as_str()).collect();
        expected.sort_unstable();
        got.sort_unstable();
        if expected != got {
            return Err(ServiceError::Rejected(format!(
                "tool outputs {got:?} do not match pending calls {expected:?}"
            )));
        }
        rs.awaiting_outputs = false;
        rs.current.pending_tool_calls.clear();
        rs.current.status = RunStatus::InProgress;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ServiceError> {
        let mut st = self.state();
        st.calls.push(ServiceCall::ListMessages { thread_id: thread_id.to_string() });
        let msgs = st
            .threads
            .get(thread_id)
            .ok_or_else(|| ServiceError::Other(format!("no such thread: {thread_id}")))?;
        Ok(msgs.iter().rev().cloned().collect())
    }

    async fn delete_message(&self, thread_id: &str, message_id: &str) -> Result<(), ServiceError> {
        let mut st = self.state();
        st.calls.push(ServiceCall::DeleteMessage {
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
        });
        let msgs = st
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| ServiceError::Other(format!("no such thread: {thread_id}")))?;
        let before = msgs.len();
        msgs.retain(|m| m.id != message_id);
        if msgs.len() == before {
            return Err(ServiceError::Other(format!("no such message: {message_id}")));
        }
        Ok(())
    }
}
