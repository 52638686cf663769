//! アシスタントワーカー（TUIとは別スレッドで動く）
//!
//! UI スレッドから `WorkerRequest` を受け取り、専用の Tokio ランタイム上で
//! `ChatGateway` を呼び出して `WorkerReply` を返す。

use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

use tokio::runtime::Runtime;
use tracing::{error, info, instrument};

use crate::assistant::{AssistantService, ToolInvocation};
use crate::error::{GatewayError, TurnError};
use crate::gateway::{ChatGateway, FALLBACK_REPLY};

/// UI → ワーカー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRequest {
    /// ユーザー発話を 1 ターン送る
    Send(String),
    /// スレッドの最新メッセージを削除する
    RemoveLast,
}

/// ワーカー → UI
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    Answer { text: String, tool_calls: Vec<ToolInvocation>, failed: bool },
    Removed { text: String },
    /// 表示用の短い通知 (内部エラーの詳細は含めない)
    Notice(String),
}

/// ワーカーを開始
pub fn start_worker<S: AssistantService>(
    gateway: Arc<ChatGateway<S>>,
    external_id: String,
    rx_request: Receiver<WorkerRequest>,
    tx_reply: Sender<WorkerReply>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        // 専用スレッド内でTokioランタイムを構築
        let rt = match Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                error!(target: "app", "tokio_runtime_error: {e}");
                let _ = tx_reply.send(WorkerReply::Notice(FALLBACK_REPLY.to_string()));
                return;
            }
        };
        rt.block_on(async move {
            while let Ok(request) = rx_request.recv() {
                let reply = process_request(&gateway, &external_id, request).await;
                if tx_reply.send(reply).is_err() {
                    // UI 側が終了済み
                    break;
                }
            }
            info!(target: "app", "worker_stopped");
        });
    })
}

#[instrument(name = "process_request", skip(gateway))]
async fn process_request<S: AssistantService>(
    gateway: &ChatGateway<S>,
    external_id: &str,
    request: WorkerRequest,
) -> WorkerReply {
    match request {
        WorkerRequest::Send(text) => match gateway.handle_message(external_id, &text).await {
            Ok(reply) => WorkerReply::Answer { text: reply.text, tool_calls: reply.tool_calls, failed: reply.failed },
            Err(e) => {
                error!(target: "app", error = %e, "thread_store_error");
                WorkerReply::Answer { text: FALLBACK_REPLY.to_string(), tool_calls: Vec::new(), failed: true }
            }
        },
        WorkerRequest::RemoveLast => match gateway.remove_last(external_id).await {
            Ok(message) => WorkerReply::Removed { text: message.text },
            Err(GatewayError::NoThreadMapping { .. } | GatewayError::Turn(TurnError::EmptyThread { .. })) => {
                WorkerReply::Notice("Nothing to remove.".to_string())
            }
            Err(e) => {
                error!(target: "app", error = %e, "remove_last_error");
                WorkerReply::Notice(FALLBACK_REPLY.to_string())
            }
        },
    }
}
