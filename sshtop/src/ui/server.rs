//! One bordered panel per server: title with connection state, then either
//! a two-row summary (collapsed) or per-core bars, memory and CPU history.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders},
};
use sshtop_engine::{ConnectionState, ConnectionStatus, TargetView};

use crate::config::DisplaySection;
use crate::ui::cpu::{draw_cpu_gauge, draw_cpu_history, draw_per_core_bars, CORE_ROWS};
use crate::ui::mem::draw_mem;
use crate::ui::util::truncate_middle;

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub struct PanelOpts<'a> {
    pub address: Option<&'a str>,
    pub selected: bool,
    pub collapsed: bool,
    pub spinner_tick: usize,
}

pub fn panel_height(view: &TargetView, collapsed: bool) -> u16 {
    if collapsed {
        return 4;
    }
    let cores = view
        .latest
        .as_ref()
        .and_then(|s| s.cpu.as_ref())
        .map_or(0, |c| c.per_core.len());
    2 + (cores.min(CORE_ROWS) as u16).max(7)
}

fn state_span(status: &ConnectionStatus, spinner_tick: usize) -> Span<'static> {
    match status.state {
        ConnectionState::Connected => {
            Span::styled("● connected", Style::default().fg(Color::Green))
        }
        ConnectionState::Connecting | ConnectionState::Reconnecting => Span::styled(
            format!(
                "{} {} ({}/{})",
                SPINNER[spinner_tick % SPINNER.len()],
                status.state.label(),
                status.attempts,
                status.max_attempts
            ),
            Style::default().fg(Color::Yellow),
        ),
        ConnectionState::Failed => Span::styled(
            "✖ failed, retrying after cooldown",
            Style::default().fg(Color::Red),
        ),
        ConnectionState::Disconnected => {
            Span::styled("○ disconnected", Style::default().fg(Color::DarkGray))
        }
    }
}

pub fn draw_server(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    view: &TargetView,
    opts: &PanelOpts<'_>,
    display: &DisplaySection,
) {
    let mut title = vec![
        Span::raw(if opts.selected { "▶ " } else { "  " }),
        Span::styled(
            view.name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ];
    if let Some(addr) = opts.address {
        title.push(Span::styled(
            format!(" {}", truncate_middle(addr, 40)),
            Style::default().add_modifier(Modifier::DIM),
        ));
    }
    title.push(Span::raw("  "));
    title.push(state_span(&view.connection, opts.spinner_tick));
    if view.latest.as_ref().is_some_and(|s| !s.is_fresh()) {
        title.push(Span::styled(" (stale)", Style::default().fg(Color::DarkGray)));
    }

    let mut block = Block::default()
        .borders(Borders::ALL)
        .title(Line::from(title));
    if opts.selected {
        block = block.border_style(Style::default().fg(Color::Cyan));
    }
    if view.connection.state != ConnectionState::Connected {
        if let Some(err) = view.connection.last_error.as_deref() {
            block = block.title_bottom(Line::from(Span::styled(
                format!(" {} ", truncate_middle(err, area.width.saturating_sub(4) as usize)),
                Style::default().fg(Color::Red),
            )));
        }
    }
    let inner = block.inner(area);
    f.render_widget(block, area);
    if inner.height == 0 {
        return;
    }

    let latest = view.latest.as_ref();
    let cpu = latest.and_then(|s| s.cpu.as_ref());
    let mem = latest.map(|s| &s.memory);

    if opts.collapsed {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Length(1)])
            .split(inner);
        draw_cpu_gauge(f, rows[0], cpu, display);
        draw_mem(f, rows[1], mem, display, false);
        return;
    }

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(inner);
    draw_per_core_bars(f, cols[0], cpu, &view.history, display);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3)])
        .split(cols[1]);
    draw_mem(f, right[0], mem, display, true);
    draw_cpu_history(f, right[1], &view.history, display);
}
