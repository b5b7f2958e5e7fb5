use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Style, Modifier},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use puppet_core::control::RunStatus;
use puppet_core::types::OrchestratorState;
use crate::App;

/// Banner text and colour: the control handle overrides the orchestrator state.
pub fn banner(orch: OrchestratorState, status: RunStatus) -> (String, Color) {
    match (status, orch) {
        (RunStatus::Terminated, _) => ("TERMINATED".into(), Color::Magenta),
        (RunStatus::Paused, _) => ("PAUSED (Press P to resume)".into(), Color::Yellow),
        (RunStatus::OnBreak(left), _) => (format!("ON BREAK ({}s left)", left.as_secs()), Color::Blue),
        (RunStatus::Running, OrchestratorState::Running) => ("RUNNING (Press S to stop)".into(), Color::Green),
        (RunStatus::Running, OrchestratorState::Stopping) => ("STOPPING...".into(), Color::Yellow),
        (RunStatus::Running, OrchestratorState::Stopped) => ("STOPPED (Press S to start)".into(), Color::Red),
    }
}

pub fn draw(f: &mut Frame, app: &App) {
    let columns = if app.log_visible {
        Layout::horizontal([Constraint::Percentage(60), Constraint::Percentage(40)]).split(f.area())
    } else {
        Layout::horizontal([Constraint::Percentage(100)]).split(f.area())
    };
    let [banner_area, list_area] =
        Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(columns[0]);

    let orch = *app.orch_state.lock().unwrap_or_else(|e| e.into_inner());
    let (label, accent) = banner(orch, app.run_status());

    let bar = Paragraph::new(Line::from(Span::styled(
        label,
        Style::default().fg(Color::Black).bg(accent).add_modifier(Modifier::BOLD),
    )))
    .alignment(Alignment::Center)
    .style(Style::default().bg(accent));
    f.render_widget(bar, banner_area);

    let bots = Paragraph::new(bot_lines(app, accent)).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(bots, list_area);

    if let Some(&log_area) = columns.get(1) {
        draw_logs(f, app, log_area);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn key_help() -> Line<'static> {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    Line::from(vec![
        Span::raw(" "),
        key("j/k/space"),
        Span::raw(" select  "),
        key("r"),
        Span::raw(" reset  "),
        key("p"),
        Span::raw(" pause  "),
        key("x"),
        Span::raw(" terminate  "),
        key("l"),
        Span::raw(" logs"),
    ])
}

fn bot_lines(app: &App, accent: Color) -> Vec<Line<'static>> {
    let mut lines = vec![key_help(), Line::from("")];
    let entries = app.state.lock().unwrap_or_else(|e| e.into_inner());

    for (i, entry) in entries.iter().enumerate() {
        let cursor = if i == app.selected { "> " } else { "  " };
        let mark = if entry.enabled { "[●]" } else { "[ ]" };
        let mut header = vec![
            Span::raw(cursor),
            Span::styled(mark, Style::default().fg(accent)),
            Span::raw(" "),
            Span::styled(entry.name.clone(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        ];
        if !entry.description.is_empty() {
            header.push(Span::styled(format!("  {}", entry.description), Style::default().fg(Color::DarkGray)));
        }
        lines.push(Line::from(header));

        if !entry.enabled {
            continue;
        }
        for inst in &entry.instances {
            let (text, color) = match (&inst.error, inst.status.is_empty()) {
                (Some(e), _) => (format!(" err: {}", e), Color::Red),
                (None, false) => (format!(" {}", inst.status), Color::Cyan),
                (None, true) => (String::new(), Color::Cyan),
            };
            lines.push(Line::from(vec![
                Span::styled(format!("    {} ", inst.window_title), Style::default().fg(Color::Yellow)),
                Span::styled(format!("#{}", inst.window_id), Style::default().fg(Color::DarkGray)),
                Span::styled(text, Style::default().fg(color)),
            ]));
        }
    }
    lines
}

fn draw_logs(f: &mut Frame, app: &App, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let total = app.log_messages.len();
    let scroll = app.log_scroll.min(total.saturating_sub(height));
    let end = total - scroll;
    let start = end.saturating_sub(height);
    let lines: Vec<Line> = app.log_messages[start..end].iter().map(|m| parse_log_line(m)).collect();

    let title = if scroll > 0 { format!(" Logs (+{}) ", scroll) } else { " Logs ".to_string() };
    let panel = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(panel, area);
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }

    let level = parts[0];
    let prefix = parts[1];
    let color_idx: u8 = parts[2].parse().unwrap_or(0);
    let timestamp = parts[3];
    let message = parts[4];

    let color = match color_idx {
        1 => Color::DarkGray,
        2 => Color::LightBlue,
        3 => Color::LightGreen,
        4 => Color::LightMagenta,
        _ => Color::White,
    };

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];

    // only warn/error get a tag
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        "DEBUG" => spans.push(Span::styled("debug ", Style::default().fg(Color::DarkGray))),
        _ => {}
    }

    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(color)));

    Line::from(spans)
}
