//! イベント処理モジュール

use crate::app::App;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// キーイベントを処理
///
/// # Returns
/// - `Ok(true)` - アプリケーションを終了
/// - `Ok(false)` - 処理を継続
/// - `Err(_)` - ワーカーが停止している
pub fn handle_key(app: &mut App, key: KeyEvent) -> Result<bool> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => return Ok(true),
        KeyCode::Char('c') if ctrl => return Ok(true),
        // 直前のメッセージを取り消す
        KeyCode::Char('z') if ctrl => app.request_remove_last()?,
        KeyCode::Enter => app.submit_prompt()?,
        KeyCode::Backspace => app.pop_char(),
        KeyCode::Char(_) if ctrl => {}
        KeyCode::Char(ch) => app.push_char(ch),
        _ => {}
    }
    Ok(false)
}
