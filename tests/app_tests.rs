use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use assistant_bridge::app::{App, Speaker};
use assistant_bridge::assistant::mock::ScriptedAssistant;
use assistant_bridge::assistant::{DriverPolicy, RunDriver, ToolInvocation};
use assistant_bridge::event::handle_key;
use assistant_bridge::gateway::ChatGateway;
use assistant_bridge::store::ThreadStore;
use assistant_bridge::worker::{WorkerReply, WorkerRequest};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde_json::json;
mod common;

#[ctor::ctor]
fn _init() {
    common::init();
}

fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

fn ctrl(ch: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL)
}

#[test]
fn typing_and_submit_sends_request() {
    let (tx, rx_req) = channel();
    let (_tx_reply, rx) = channel();
    let mut app = App::new("cli:test", tx, rx);

    for ch in "hi".chars() {
        assert!(!handle_key(&mut app, key(KeyCode::Char(ch))).unwrap());
    }
    handle_key(&mut app, key(KeyCode::Backspace)).unwrap();
    handle_key(&mut app, key(KeyCode::Char('o'))).unwrap();
    handle_key(&mut app, key(KeyCode::Enter)).unwrap();

    assert_eq!(rx_req.try_recv().unwrap(), WorkerRequest::Send("ho".into()));
    assert!(app.pending);
    assert!(app.input.is_empty());
    assert_eq!(app.transcript.last().map(|e| e.speaker), Some(Speaker::User));

    // pending 中は送信しない
    handle_key(&mut app, key(KeyCode::Char('x'))).unwrap();
    handle_key(&mut app, key(KeyCode::Enter)).unwrap();
    assert!(rx_req.try_recv().is_err());
}

#[test]
fn blank_input_is_not_sent() {
    let (tx, rx_req) = channel();
    let (_tx_reply, rx) = channel();
    let mut app = App::new("cli:test", tx, rx);
    handle_key(&mut app, key(KeyCode::Char(' '))).unwrap();
    handle_key(&mut app, key(KeyCode::Enter)).unwrap();
    assert!(rx_req.try_recv().is_err());
    assert!(!app.pending);
}

#[test]
fn quit_and_remove_keys() {
    let (tx, rx_req) = channel();
    let (_tx_reply, rx) = channel();
    let mut app = App::new("cli:test", tx, rx);

    assert!(!handle_key(&mut app, ctrl('z')).unwrap());
    assert_eq!(rx_req.try_recv().unwrap(), WorkerRequest::RemoveLast);
    assert!(app.input.is_empty(), "control chars are not typed");

    assert!(handle_key(&mut app, ctrl('c')).unwrap());
    assert!(handle_key(&mut app, key(KeyCode::Esc)).unwrap());
}

#[test]
fn replies_update_transcript() {
    let (tx, _rx_req) = channel();
    let (tx_reply, rx) = channel();
    let mut app = App::new("cli:test", tx, rx);
    app.pending = true;

    tx_reply
        .send(WorkerReply::Answer {
            text: "a picture".into(),
            tool_calls: vec![ToolInvocation {
                tool_name: "dalle".into(),
                arguments: json!({"prompt": "cat"}),
                result: "https://images.example/cat.png".into(),
            }],
            failed: false,
        })
        .unwrap();
    app.check_worker_reply();
    assert!(!app.pending);
    let speakers: Vec<_> = app.transcript.iter().map(|e| e.speaker).collect();
    assert_eq!(speakers, vec![Speaker::Tool, Speaker::Assistant]);

    tx_reply.send(WorkerReply::Removed { text: "a picture".into() }).unwrap();
    app.check_worker_reply();
    assert!(app.transcript.iter().all(|e| e.text != "a picture"));
    assert_eq!(app.transcript.last().map(|e| e.speaker), Some(Speaker::Notice));
}

#[test]
fn worker_round_trip_through_gateway() {
    let svc = Arc::new(ScriptedAssistant::new().with_default_reply("pong"));
    let driver = RunDriver::new(Arc::clone(&svc), Arc::new(common::test_registry())).with_policy(DriverPolicy {
        poll_interval: Duration::from_millis(1),
        ..common::deterministic_policy()
    });
    let gateway = ChatGateway::new(driver, Arc::new(ThreadStore::in_memory().unwrap()), "asst_test");
    let mut app = App::with_gateway(Arc::new(gateway), "cli:test");

    app.input = "ping".into();
    app.submit_prompt().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while app.pending && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
        app.check_worker_reply();
    }
    assert!(!app.pending, "worker did not answer in time");
    let last = app.transcript.last().unwrap();
    assert_eq!((last.speaker, last.text.as_str()), (Speaker::Assistant, "pong"));
}
