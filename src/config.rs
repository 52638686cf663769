//! アプリケーション設定
//!
//! すべて環境変数 (`.env` 可) から読み込む。未設定のキーは既定値。

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::{Result, eyre::eyre};

use crate::assistant::{DriverPolicy, RetryPolicy};

/// アプリケーション設定
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// OpenAI API キー (未設定なら dalle プラグインを登録しない)
    pub openai_api_key: Option<String>,
    /// 対話に使うアシスタント ID
    pub assistant_id: Option<String>,
    /// Tavily 検索 API キー
    pub tavily_api_key: Option<String>,
    /// スレッド対応表 (SQLite) のパス
    pub thread_db_path: PathBuf,
    /// CLI フロントエンドの外部スレッド ID
    pub cli_thread_id: String,
    /// run ポーリング間隔（ミリ秒）
    pub poll_interval_ms: u64,
    /// ポーリング全体のタイムアウト（秒, 0 で無効）
    pub poll_timeout_secs: u64,
    /// 投稿リトライの総時間予算（秒）
    pub submission_budget_secs: u64,
    /// フロントエンドの試行回数
    pub frontend_max_attempts: u32,
    /// 起動時にプラグイン定義をアシスタントへ同期するか
    pub sync_assistant_tools: bool,
    /// UI イベントポーリング間隔（ミリ秒）
    pub ui_poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            assistant_id: None,
            tavily_api_key: None,
            thread_db_path: PathBuf::from("storage/threads.sqlite"),
            cli_thread_id: "cli:local".to_string(),
            // NOTE: Keep in sync with tests (tests/config_tests.rs) and design doc.
            poll_interval_ms: 1000,
            poll_timeout_secs: 600,
            submission_budget_secs: 120,
            frontend_max_attempts: 3,
            sync_assistant_tools: false,
            ui_poll_interval_ms: 100,
        }
    }
}

impl Config {
    /// 新しい設定インスタンスを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// プロセス環境変数から読み込む
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー参照関数から読み込む (テストでは HashMap を渡す)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let d = Self::default();
        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            assistant_id: get("ASSISTANT_ID"),
            tavily_api_key: get("TAVILY_API_KEY"),
            thread_db_path: get("THREAD_DB_PATH").map(PathBuf::from).unwrap_or(d.thread_db_path),
            cli_thread_id: get("CLI_THREAD_ID").unwrap_or(d.cli_thread_id),
            poll_interval_ms: parse_nonzero("POLL_INTERVAL_MS", get("POLL_INTERVAL_MS"), d.poll_interval_ms)?,
            poll_timeout_secs: parse_or("POLL_TIMEOUT_SECS", get("POLL_TIMEOUT_SECS"), d.poll_timeout_secs)?,
            submission_budget_secs: parse_or(
                "SUBMISSION_BUDGET_SECS",
                get("SUBMISSION_BUDGET_SECS"),
                d.submission_budget_secs,
            )?,
            frontend_max_attempts: parse_or(
                "FRONTEND_MAX_ATTEMPTS",
                get("FRONTEND_MAX_ATTEMPTS"),
                d.frontend_max_attempts,
            )?,
            sync_assistant_tools: parse_flag("SYNC_ASSISTANT_TOOLS", get("SYNC_ASSISTANT_TOOLS"), d.sync_assistant_tools)?,
            ui_poll_interval_ms: parse_nonzero("UI_POLL_INTERVAL_MS", get("UI_POLL_INTERVAL_MS"), d.ui_poll_interval_ms)?,
        })
    }

    /// ドライバ用のタイミング設定
    pub fn driver_policy(&self) -> DriverPolicy {
        DriverPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_timeout: (self.poll_timeout_secs > 0).then(|| Duration::from_secs(self.poll_timeout_secs)),
            retry: RetryPolicy::with_budget(Duration::from_secs(self.submission_budget_secs)),
        }
    }

    /// 対話に必要なキーが揃っているか
    pub fn require_assistant(&self) -> Result<(&str, &str)> {
        let key = self.openai_api_key.as_deref().ok_or_else(|| eyre!("OPENAI_API_KEY is not set"))?;
        let id = self.assistant_id.as_deref().ok_or_else(|| eyre!("ASSISTANT_ID is not set"))?;
        Ok((key, id))
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e| eyre!("invalid value for {key}: '{v}' ({e})")),
    }
}

/// 待ち間隔用。0 はポーリングが空回りするので受け付けない。
fn parse_nonzero(key: &str, raw: Option<String>, default: u64) -> Result<u64> {
    match parse_or(key, raw, default)? {
        0 => Err(eyre!("invalid value for {key}: must be greater than 0")),
        n => Ok(n),
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(eyre!("invalid value for {key}: '{other}'")),
    }
}
