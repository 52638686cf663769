// 同階層のファイルをモジュールとしてインポート
pub mod app;
pub mod assistant; // service contract, run driver, session
pub mod config;
pub mod error;
pub mod event;
pub mod gateway; // front-end adapter
pub mod plugins; // tool plugins + registry
pub mod store; // SQLite thread mapping
pub mod ui;
pub mod worker;

pub use assistant::{AssistantService, ConversationSession, OpenAiAssistant, RunDriver};
pub use config::Config;
pub use gateway::{ChatGateway, FALLBACK_REPLY};
pub use plugins::{PluginRegistry, default_registry};
pub use store::ThreadStore;

use app::App;
use color_eyre::Result;
use crossterm::event::{self as crossterm_event, Event, KeyEventKind};
use ratatui::DefaultTerminal;
use std::time::Duration;

/// アプリケーションのメインループを実行
pub fn run(mut terminal: DefaultTerminal, mut app: App, poll_interval: Duration) -> Result<()> {
    loop {
        // ワーカーの返信を反映
        app.check_worker_reply();

        // 画面を描画
        terminal.draw(|f| ui::render(f, &app))?;

        // poll_interval 以内にイベントが来たら処理
        if crossterm_event::poll(poll_interval)? {
            match crossterm_event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if event::handle_key(&mut app, key)? {
                        break;
                    }
                }
                Event::Resize(_, _) => {
                    // 次ループで再描画されるので特別な処理なし
                }
                _ => {}
            }
        }
    }
    Ok(())
}
