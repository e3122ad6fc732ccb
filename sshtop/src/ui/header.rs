//! Top title line and bottom status bar.

use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use sshtop_engine::{ConnectionState, MetricsSnapshot};

use crate::config::DisplaySection;
use crate::ui::util::usage_color;

pub fn draw_header(f: &mut ratatui::Frame<'_>, area: Rect, servers: usize, demo: bool) {
    let mode = if demo { " [demo]" } else { "" };
    let title = format!(
        "sshtop{mode} — {servers} server(s)  (q quit, ↑/↓ select, r refresh, a add, d delete, c collapse)"
    );
    f.render_widget(Block::default().title(title).borders(Borders::BOTTOM), area);
}

/// Connected count, offline count, mean CPU of connected servers and the
/// snapshot time. A transient message replaces the right-hand side.
pub fn draw_status_bar(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    snapshot: Option<&MetricsSnapshot>,
    message: Option<&str>,
    display: &DisplaySection,
) {
    let Some(snap) = snapshot else {
        f.render_widget(Paragraph::new("Initializing..."), area);
        return;
    };
    let total = snap.targets.len();
    let connected = snap
        .targets
        .iter()
        .filter(|t| t.connection.state == ConnectionState::Connected)
        .count();
    let loads: Vec<f32> = snap
        .targets
        .iter()
        .filter(|t| t.connection.state == ConnectionState::Connected)
        .filter_map(|t| t.latest.as_ref()?.cpu.as_ref().map(|c| c.aggregate))
        .collect();
    let avg = if loads.is_empty() {
        0.0
    } else {
        loads.iter().sum::<f32>() / loads.len() as f32
    };

    let conn_color = if connected == total {
        Color::Green
    } else if connected == 0 {
        Color::Red
    } else {
        Color::Yellow
    };
    let mut spans = vec![
        Span::raw("Servers: "),
        Span::styled(connected.to_string(), Style::default().fg(conn_color)),
        Span::raw(format!("/{total} (")),
        Span::styled(
            (total - connected).to_string(),
            Style::default().fg(Color::Red),
        ),
        Span::raw(" offline) │ Avg CPU: "),
        Span::styled(
            format!("{avg:.1}%"),
            Style::default().fg(usage_color(avg, display)),
        ),
        Span::raw(" │ "),
    ];
    match message {
        Some(msg) => spans.push(Span::styled(
            msg.to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        None => spans.push(Span::styled(
            format!(
                "Updated: {}",
                snap.taken_at.with_timezone(&chrono::Local).format("%H:%M:%S")
            ),
            Style::default().add_modifier(Modifier::DIM),
        )),
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
