//! UI描画モジュール

use crate::app::{App, Speaker};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style, Stylize};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

/// メインUI描画関数
pub fn render(f: &mut Frame, app: &App) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // ヘッダ
            Constraint::Min(5),    // 会話ログ
            Constraint::Length(3), // 入力欄
            Constraint::Length(1), // フッター
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_transcript(f, app, chunks[1]);
    render_input(f, app, chunks[2]);
    render_footer(f, app, chunks[3]);
}

/// ヘッダー/ガイド部分を描画
fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let guide = vec![
        Line::from(format!("Assistant chat [{}]", app.external_id).bold()),
        Line::from("Enter で送信 / Backspace で削除 / Ctrl+Z で直前のメッセージを取り消し / Esc or Ctrl+C で終了"),
    ];
    let guide_widget = Paragraph::new(guide).block(Block::default().borders(Borders::ALL).title("Guide"));
    f.render_widget(guide_widget, area);
}

fn speaker_label(speaker: Speaker) -> Span<'static> {
    match speaker {
        Speaker::User => Span::styled("you> ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Speaker::Assistant => Span::styled("assistant> ", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        Speaker::Tool => Span::styled("tool> ", Style::default().fg(Color::DarkGray)),
        Speaker::Notice => Span::styled("! ", Style::default().fg(Color::Yellow)),
    }
}

/// 会話ログを描画 (末尾が見えるようにスクロール)
fn render_transcript(f: &mut Frame, app: &App, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    for entry in &app.transcript {
        let mut text_lines = entry.text.lines();
        let first = text_lines.next().unwrap_or_default().to_string();
        lines.push(Line::from(vec![speaker_label(entry.speaker), Span::raw(first)]));
        lines.extend(text_lines.map(|l| Line::from(l.to_string())));
    }
    if app.pending {
        lines.push(Line::from("問い合わせ中...".italic()));
    }
    if lines.is_empty() {
        lines.push(Line::from("(まだ会話はありません)"));
    }

    // 折り返しは考慮しない概算
    let visible = area.height.saturating_sub(2) as usize;
    let offset = lines.len().saturating_sub(visible) as u16;
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .scroll((offset, 0))
        .block(Block::default().borders(Borders::ALL).title("Conversation"));
    f.render_widget(widget, area);
}

/// 入力欄を描画
fn render_input(f: &mut Frame, app: &App, area: Rect) {
    let mut current = app.input.clone();
    current.push('_'); // 簡易カーソル表示
    let input_widget = Paragraph::new(current).block(Block::default().borders(Borders::ALL).title("Input"));
    f.render_widget(input_widget, area);
}

/// フッター部分を描画
fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let elapsed = app.elapsed_time().as_secs_f32();
    let status = if app.pending { "busy" } else { "ready" };
    let footer = Paragraph::new(Line::from(vec![Span::raw(format!(
        "{status} | messages: {} | 経過: {elapsed:.1}s",
        app.transcript.len()
    ))]));
    f.render_widget(footer, area);
}
