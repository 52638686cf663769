//! エラー型
//!
//! ライブラリの境界では型付きエラー (`thiserror`) を返し、アプリ配線部分は
//! `color_eyre::Result` を使う。

use std::time::Duration;

use thiserror::Error;

use crate::assistant::RunStatus;

/// Failure reported by the remote assistant service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Malformed-request class. Sometimes transient (e.g. a previous run still settling).
    #[error("request rejected by assistant service: {0}")]
    Rejected(String),
    /// Any other transport or API failure.
    #[error("assistant service error: {0}")]
    Other(String),
}

impl ServiceError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ServiceError::Rejected(_))
    }
}

/// 1ターン (ユーザー発話 → 最終回答) の失敗
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("message submission rejected after {attempts} attempt(s) in {elapsed:?}: {source}")]
    SubmissionRejected {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: ServiceError,
    },

    #[error("run {run_id} ended with status: {status}{}", reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
    RunTerminatedAbnormally {
        run_id: String,
        status: RunStatus,
        reason: Option<String>,
    },

    #[error("run {run_id} did not reach a terminal status within {timeout:?}")]
    PollTimedOut { run_id: String, timeout: Duration },

    #[error("run {run_id} completed without an assistant message")]
    EmptyResponse { run_id: String },

    #[error("thread {thread_id} has no messages")]
    EmptyThread { thread_id: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// ThreadStore の失敗。呼び出し側では致命的エラーとして扱う。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("thread store database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("thread store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("thread store is corrupt: {0}")]
    Corrupt(String),
}

/// フロントエンド向けゲートウェイの失敗
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Turn(#[from] TurnError),

    #[error("no conversation thread is bound to {external_id}")]
    NoThreadMapping { external_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormal_termination_mentions_status_and_reason() {
        let err = TurnError::RunTerminatedAbnormally {
            run_id: "run_1".into(),
            status: RunStatus::Failed,
            reason: Some("rate limited".into()),
        };
        assert_eq!(err.to_string(), "run run_1 ended with status: failed (rate limited)");

        let err = TurnError::RunTerminatedAbnormally {
            run_id: "run_2".into(),
            status: RunStatus::Expired,
            reason: None,
        };
        assert_eq!(err.to_string(), "run run_2 ended with status: expired");
    }

    #[test]
    fn rejected_is_the_only_retryable_class() {
        assert!(ServiceError::Rejected("bad".into()).is_rejected());
        assert!(!ServiceError::Other("boom".into()).is_rejected());
    }

    #[test]
    fn missing_mapping_names_the_external_id() {
        let err = GatewayError::NoThreadMapping { external_id: "slack:C1/171.2".into() };
        assert_eq!(err.to_string(), "no conversation thread is bound to slack:C1/171.2");
    }
}
