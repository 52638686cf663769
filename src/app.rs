//! アプリケーション状態管理モジュール

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;

use color_eyre::{Result, eyre::eyre};
use tracing::{debug, info};

use crate::assistant::AssistantService;
use crate::gateway::ChatGateway;
use crate::worker::{WorkerReply, WorkerRequest, start_worker};

/// 発話者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
    Tool,
    Notice,
}

/// 会話ログ 1 行分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// アプリケーションの状態を管理する構造体
pub struct App {
    /// 現在の入力テキスト
    pub input: String,
    /// 会話ログ (古い順)
    pub transcript: Vec<TranscriptEntry>,
    /// ワーカー処理中フラグ
    pub pending: bool,
    /// 対応する外部スレッド ID
    pub external_id: String,
    /// アプリケーション開始時刻
    pub started: Instant,
    /// ワーカーへの送信チャンネル
    pub tx: Sender<WorkerRequest>,
    /// ワーカーからの受信チャンネル
    pub rx: Receiver<WorkerReply>,
}

impl App {
    /// チャンネルを指定してアプリケーションインスタンスを作成
    pub fn new(external_id: impl Into<String>, tx: Sender<WorkerRequest>, rx: Receiver<WorkerReply>) -> Self {
        Self {
            input: String::new(),
            transcript: Vec::new(),
            pending: false,
            external_id: external_id.into(),
            started: Instant::now(),
            tx,
            rx,
        }
    }

    /// ゲートウェイ用ワーカーをバックグラウンドで開始してインスタンスを作成
    pub fn with_gateway<S: AssistantService>(gateway: Arc<ChatGateway<S>>, external_id: impl Into<String>) -> Self {
        let external_id = external_id.into();
        let (tx_request, rx_request) = mpsc::channel::<WorkerRequest>();
        let (tx_reply, rx_reply) = mpsc::channel::<WorkerReply>();
        // ワーカーは送信側が drop されると終了する
        start_worker(gateway, external_id.clone(), rx_request, tx_reply);
        Self::new(external_id, tx_request, rx_reply)
    }

    /// 入力テキストをクリア
    pub fn clear_input(&mut self) {
        self.input.clear();
    }

    /// 入力テキストに文字を追加
    pub fn push_char(&mut self, ch: char) {
        self.input.push(ch);
    }

    /// 入力テキストから最後の文字を削除
    pub fn pop_char(&mut self) {
        self.input.pop();
    }

    fn push_entry(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript.push(TranscriptEntry { speaker, text: text.into() });
    }

    /// プロンプトを送信
    pub fn submit_prompt(&mut self) -> Result<()> {
        let text = self.input.trim().to_string();
        if text.is_empty() || self.pending {
            return Ok(());
        }
        self.clear_input();
        self.pending = true;
        info!(target: "app", len = text.len(), "submit_prompt");
        self.push_entry(Speaker::User, text.clone());
        self.tx.send(WorkerRequest::Send(text)).map_err(|_| eyre!("assistant worker has stopped"))?;
        Ok(())
    }

    /// スレッドの最新メッセージの削除を依頼
    pub fn request_remove_last(&mut self) -> Result<()> {
        if self.pending {
            return Ok(());
        }
        self.pending = true;
        info!(target: "app", "request_remove_last");
        self.tx.send(WorkerRequest::RemoveLast).map_err(|_| eyre!("assistant worker has stopped"))?;
        Ok(())
    }

    /// ワーカーの返信をチェックして更新
    pub fn check_worker_reply(&mut self) {
        while let Ok(reply) = self.rx.try_recv() {
            self.pending = false;
            match reply {
                WorkerReply::Answer { text, tool_calls, failed } => {
                    for call in &tool_calls {
                        self.push_entry(Speaker::Tool, format!("{} {}", call.tool_name, call.arguments));
                    }
                    debug!(target: "app", failed, tool_calls = tool_calls.len(), "answer_received");
                    let speaker = if failed { Speaker::Notice } else { Speaker::Assistant };
                    self.push_entry(speaker, text);
                }
                WorkerReply::Removed { text } => {
                    // 画面上の対応する行も消す
                    if let Some(pos) = self.transcript.iter().rposition(|e| e.text == text) {
                        self.transcript.remove(pos);
                    }
                    self.push_entry(Speaker::Notice, "Removed the last message.");
                }
                WorkerReply::Notice(text) => self.push_entry(Speaker::Notice, text),
            }
        }
    }

    /// アプリケーション開始からの経過時間を取得
    pub fn elapsed_time(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}
