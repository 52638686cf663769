//! Run driver: submits a user turn, polls the run to a terminal status and
//! answers every tool-output request on the way.
//!
//! 流れ:
//! 1. ユーザーメッセージを投稿し run を作成 (malformed-request のみバックオフ付きで再試行)
//! 2. run を取得。`completed` なら終了、その他の終端状態は `RunTerminatedAbnormally`
//! 3. `needs_tool_output` なら保留中の呼び出しを報告順にすべて解決し、1 回のバッチで提出
//! 4. `queued` / `in_progress` なら一定間隔待って再取得 (ポーリング自体にバックオフはしない)

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::TurnError;
use crate::plugins::PluginRegistry;

use super::retry::RetryPolicy;
use super::service::{
    AssistantService, MessageRole, Run, RunStatus, ToolCallRequest, ToolCallResult, ToolInvocation,
};

/// Timing knobs for one driver.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverPolicy {
    /// Wait between polls of a queued / in-progress run.
    pub poll_interval: Duration,
    /// Overall limit for the poll loop. `None` polls until the run ends.
    pub poll_timeout: Option<Duration>,
    /// Backoff for rejected submissions.
    pub retry: RetryPolicy,
}

impl Default for DriverPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Some(Duration::from_secs(600)),
            retry: RetryPolicy::default(),
        }
    }
}

/// A run that reached `completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRun {
    pub run_id: String,
    /// Audit trail of the tool calls answered during the run, in order.
    pub tool_calls: Vec<ToolInvocation>,
    pub polls: u32,
}

pub struct RunDriver<S> {
    service: Arc<S>,
    registry: Arc<PluginRegistry>,
    policy: DriverPolicy,
}

impl<S> Clone for RunDriver<S> {
    fn clone(&self) -> Self {
        Self { service: Arc::clone(&self.service), registry: Arc::clone(&self.registry), policy: self.policy.clone() }
    }
}

impl<S: AssistantService> RunDriver<S> {
    pub fn new(service: Arc<S>, registry: Arc<PluginRegistry>) -> Self {
        Self { service, registry, policy: DriverPolicy::default() }
    }

    pub fn with_policy(mut self, policy: DriverPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &DriverPolicy {
        &self.policy
    }

    /// Drive one user turn on `thread_id` to completion.
    #[instrument(name = "drive_turn", skip(self, text), fields(text_len = text.len()))]
    pub async fn drive(&self, thread_id: &str, assistant_id: &str, text: &str) -> Result<CompletedRun, TurnError> {
        let run = self.submit(thread_id, assistant_id, text).await?;
        let completed = self.poll_to_completion(thread_id, run).await?;
        info!(
            target: "driver",
            run_id = %completed.run_id,
            polls = completed.polls,
            tool_calls = completed.tool_calls.len(),
            "run_completed"
        );
        Ok(completed)
    }

    /// Post the user message and create the run.
    ///
    /// Rejected attempts are retried per `DriverPolicy::retry`; a retry repeats only
    /// the step that failed, so the message is never posted twice.
    pub async fn submit(&self, thread_id: &str, assistant_id: &str, text: &str) -> Result<Run, TurnError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut message_posted = false;
        loop {
            attempt += 1;
            let posted = if message_posted {
                Ok(())
            } else {
                self.service.create_message(thread_id, MessageRole::User, text).await
            };
            let outcome = match posted {
                Ok(()) => {
                    message_posted = true;
                    self.service.create_run(thread_id, assistant_id).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(run) => {
                    debug!(target: "driver", run_id = %run.id, status = %run.status, attempt, "run_created");
                    return Ok(run);
                }
                Err(e) if e.is_rejected() => {
                    let elapsed = started.elapsed();
                    match self.policy.retry.next_delay(attempt, elapsed) {
                        Some(delay) => {
                            warn!(target: "driver", attempt, ?delay, error = %e, message_posted, "submission_rejected_retrying");
                            sleep(delay).await;
                        }
                        None => {
                            error!(target: "driver", attempt, ?elapsed, error = %e, "submission_rejected_giving_up");
                            return Err(TurnError::SubmissionRejected { attempts: attempt, elapsed, source: e });
                        }
                    }
                }
                Err(e) => {
                    error!(target: "driver", attempt, error = %e, "submission_failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Poll `run` until it reaches a terminal status, answering tool-output requests.
    pub async fn poll_to_completion(&self, thread_id: &str, run: Run) -> Result<CompletedRun, TurnError> {
        let started = Instant::now();
        let run_id = run.id;
        let mut tool_calls = Vec::new();
        let mut polls: u32 = 0;

        loop {
            if let Some(timeout) = self.policy.poll_timeout {
                if started.elapsed() >= timeout {
                    error!(target: "driver", %run_id, ?timeout, polls, "poll_timed_out");
                    return Err(TurnError::PollTimedOut { run_id, timeout });
                }
            }

            let run = self.service.get_run(thread_id, &run_id).await?;
            polls += 1;
            trace!(target: "driver", %run_id, status = %run.status, polls, "run_polled");

            match run.status {
                RunStatus::Completed => return Ok(CompletedRun { run_id, tool_calls, polls }),
                status if status.is_terminal() => {
                    warn!(target: "driver", %run_id, %status, reason = ?run.last_error, "run_terminated_abnormally");
                    return Err(TurnError::RunTerminatedAbnormally { run_id, status, reason: run.last_error });
                }
                RunStatus::NeedsToolOutput => {
                    if run.pending_tool_calls.is_empty() {
                        warn!(target: "driver", %run_id, "needs_tool_output_without_calls");
                        sleep(self.policy.poll_interval).await;
                        continue;
                    }
                    let (outputs, invocations) = self.resolve_tool_calls(run.pending_tool_calls).await;
                    debug!(target: "driver", %run_id, count = outputs.len(), "submitting_tool_outputs");
                    self.service.submit_tool_outputs(thread_id, &run_id, outputs).await?;
                    tool_calls.extend(invocations);
                }
                _ => sleep(self.policy.poll_interval).await,
            }
        }
    }

    /// Resolve every request in reported order. Always yields one result per request.
    async fn resolve_tool_calls(&self, requests: Vec<ToolCallRequest>) -> (Vec<ToolCallResult>, Vec<ToolInvocation>) {
        let mut outputs = Vec::with_capacity(requests.len());
        let mut invocations = Vec::with_capacity(requests.len());

        for request in requests {
            debug!(target: "driver", call_id = %request.call_id, tool = %request.tool_name, "processing_tool_call");
            trace!(target: "driver", arguments = %request.arguments, "tool_call_params");

            // プラグインはブロッキング I/O を行うので専用スレッドで実行する
            let registry = Arc::clone(&self.registry);
            let call = request.clone();
            let output = match tokio::task::spawn_blocking(move || registry.resolve(&call)).await {
                Ok(resolution) => {
                    debug!(target: "driver", resolution = %resolution, "tool_resolution");
                    resolution.output()
                }
                Err(e) => {
                    error!(target: "driver", tool = %request.tool_name, error = %e, "tool_task_failed");
                    format!("An error occurred while running function '{}': {e}", request.tool_name)
                }
            };

            outputs.push(ToolCallResult { call_id: request.call_id, output: output.clone() });
            invocations.push(ToolInvocation { tool_name: request.tool_name, arguments: request.arguments, result: output });
        }
        (outputs, invocations)
    }
}
