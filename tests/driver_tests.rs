//! Run driver / session behavior against the scripted service.

use std::sync::Arc;
use std::time::Duration;

use assistant_bridge::assistant::mock::{ScriptStep, ScriptedAssistant, ServiceCall};
use assistant_bridge::assistant::{
    AssistantService, ConversationSession, RunStatus, ToolCallRequest, ToolCallResult,
};
use assistant_bridge::error::{ServiceError, TurnError};
use serde_json::json;
use tokio::time::Instant;
mod common;

#[ctor::ctor]
fn _init() {
    common::init();
}

async fn open_session(svc: &Arc<ScriptedAssistant>) -> ConversationSession<ScriptedAssistant> {
    ConversationSession::open(common::driver(svc), "asst_test").await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn abnormal_terminal_statuses_fail_the_turn() {
    for status in [RunStatus::Cancelled, RunStatus::Expired, RunStatus::Failed, RunStatus::Incomplete] {
        let svc = Arc::new(ScriptedAssistant::new());
        svc.push_script(vec![
            ScriptStep::Status(RunStatus::InProgress),
            ScriptStep::End(status, Some("rate limit".into())),
        ]);
        let mut session = open_session(&svc).await;

        match session.send_message("hello").await {
            Err(TurnError::RunTerminatedAbnormally { status: got, reason, .. }) => {
                assert_eq!(got, status);
                assert_eq!(reason.as_deref(), Some("rate limit"));
            }
            other => panic!("expected RunTerminatedAbnormally for {status}, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn dalle_tool_call_is_answered_and_run_completes() {
    let svc = Arc::new(ScriptedAssistant::new());
    svc.push_script(vec![
        ScriptStep::Status(RunStatus::InProgress),
        ScriptStep::ToolCalls(vec![ToolCallRequest::new("c1", "dalle", json!({"prompt": "a cat"}))]),
        ScriptStep::Status(RunStatus::InProgress),
        ScriptStep::Complete("Here is your cat.".into()),
    ]);
    let mut session = open_session(&svc).await;

    let reply = session.send_message("draw a cat").await.unwrap();
    assert_eq!(reply, "Here is your cat.");
    assert_eq!(
        svc.submissions(),
        vec![vec![ToolCallResult { call_id: "c1".into(), output: "https://images.example/a-cat.png".into() }]]
    );
    assert_eq!(session.tool_calls().len(), 1);
    assert_eq!(session.tool_calls()[0].tool_name, "dalle");
    assert_eq!(session.tool_calls()[0].result, "https://images.example/a-cat.png");
}

#[tokio::test(start_paused = true)]
async fn unknown_tool_gets_descriptive_output_and_polling_continues() {
    let svc = Arc::new(ScriptedAssistant::new());
    svc.push_script(vec![
        ScriptStep::ToolCalls(vec![ToolCallRequest::new("c1", "unknown_tool", json!({}))]),
        ScriptStep::Complete("done".into()),
    ]);
    let mut session = open_session(&svc).await;

    assert_eq!(session.send_message("hi").await.unwrap(), "done");
    assert_eq!(
        svc.submissions(),
        vec![vec![ToolCallResult {
            call_id: "c1".into(),
            output: "An error occurred: function 'unknown_tool' could not be found.".into(),
        }]]
    );
}

#[tokio::test(start_paused = true)]
async fn every_pending_call_is_answered_in_one_batch() {
    let svc = Arc::new(ScriptedAssistant::new());
    svc.push_script(vec![
        ScriptStep::ToolCalls(vec![
            ToolCallRequest::new("c1", "dalle", json!({"prompt": "dog"})),
            ToolCallRequest::new("c2", "broken", json!({})),
            ToolCallRequest::new("c3", "nope", json!({})),
            ToolCallRequest::from_raw("c4", "dalle", "{not json"),
        ]),
        ScriptStep::Complete("ok".into()),
    ]);
    let mut session = open_session(&svc).await;
    session.send_message("go").await.unwrap();

    let batches = svc.submissions();
    assert_eq!(batches.len(), 1, "all results go in a single submission");
    let batch = &batches[0];
    let ids: Vec<_> = batch.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3", "c4"], "reported order is kept");
    assert_eq!(batch[0].output, "https://images.example/dog.png");
    assert!(batch[1].output.starts_with("An error occurred while running function 'broken'"));
    assert!(batch[1].output.contains("upstream timed out"));
    assert!(batch[2].output.contains("'nope'"));
    assert!(batch[3].output.starts_with("An error occurred: arguments for function 'dalle' could not be parsed"));

    // a further poll happened only after the batch was submitted
    let calls = svc.calls();
    let submit_at = calls.iter().position(|c| matches!(c, ServiceCall::SubmitToolOutputs { .. })).unwrap();
    assert!(matches!(calls[submit_at + 1], ServiceCall::GetRun { .. }));
}

#[tokio::test(start_paused = true)]
async fn tool_round_trips_across_multiple_requests() {
    let svc = Arc::new(ScriptedAssistant::new());
    svc.push_script(vec![
        ScriptStep::ToolCalls(vec![ToolCallRequest::new("c1", "dalle", json!({"prompt": "one"}))]),
        ScriptStep::ToolCalls(vec![ToolCallRequest::new("c2", "dalle", json!({"prompt": "two"}))]),
        ScriptStep::Complete("both".into()),
    ]);
    let mut session = open_session(&svc).await;
    session.send_message("two images").await.unwrap();
    assert_eq!(svc.submissions().len(), 2);
    let names: Vec<_> = session.tool_calls().iter().map(|c| c.result.as_str()).collect();
    assert_eq!(names, vec!["https://images.example/one.png", "https://images.example/two.png"]);
}

#[tokio::test(start_paused = true)]
async fn submission_retry_stops_at_budget() {
    let svc = Arc::new(ScriptedAssistant::new());
    svc.reject_next_messages(usize::MAX);
    let mut session = open_session(&svc).await;

    let started = Instant::now();
    let err = session.send_message("hello").await.unwrap_err();
    match err {
        TurnError::SubmissionRejected { attempts, elapsed, source } => {
            // waits 1+2+4+8+16+32 then the last one clamped to the remaining 57s
            assert_eq!(attempts, 8);
            assert_eq!(elapsed, Duration::from_secs(120));
            assert!(source.is_rejected());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(started.elapsed(), Duration::from_secs(120));
    assert_eq!(svc.count_calls(|c| matches!(c, ServiceCall::CreateRun { .. })), 0);
}

#[tokio::test(start_paused = true)]
async fn other_submission_failures_are_not_retried() {
    let svc = Arc::new(ScriptedAssistant::new().with_default_reply("never"));
    svc.fail_next_runs(1);
    let mut session = open_session(&svc).await;

    let err = session.send_message("hello").await.unwrap_err();
    assert!(matches!(err, TurnError::Service(ServiceError::Other(_))), "{err}");
    assert_eq!(svc.count_calls(|c| matches!(c, ServiceCall::CreateRun { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_rejection_recovers_without_reposting() {
    let svc = Arc::new(ScriptedAssistant::new().with_default_reply("finally"));
    svc.reject_next_messages(1);
    svc.reject_next_runs(2);
    let thread = svc.create_thread().await.unwrap();
    let mut session = ConversationSession::resume(common::driver(&svc), "asst_test", thread.clone());

    assert_eq!(session.send_message("hello").await.unwrap(), "finally");
    let user_messages = svc.messages(&thread).into_iter().filter(|m| m.text == "hello").count();
    assert_eq!(user_messages, 1);
}

#[tokio::test(start_paused = true)]
async fn run_that_never_finishes_times_out() {
    let svc = Arc::new(ScriptedAssistant::new());
    svc.push_script(vec![ScriptStep::Status(RunStatus::Queued)]);
    let mut session = open_session(&svc).await;

    let started = Instant::now();
    let err = session.send_message("hello").await.unwrap_err();
    assert!(matches!(err, TurnError::PollTimedOut { .. }), "{err}");
    assert!(started.elapsed() >= Duration::from_secs(600));
}
