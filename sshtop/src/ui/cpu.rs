//! CPU history sparkline, per-core mini bars and the one-line summary gauge.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Sparkline},
};
use sshtop_engine::{CpuUsage, MetricsSample};

use crate::config::DisplaySection;
use crate::ui::util::usage_color;

// rows per column before per-core bars wrap into another column
pub const CORE_ROWS: usize = 8;

// how many samples back the trend arrow compares against
const TREND_LOOKBACK: usize = 5;

pub fn draw_cpu_history(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    history: &[MetricsSample],
    display: &DisplaySection,
) {
    let now = history
        .last()
        .and_then(|s| s.cpu.as_ref())
        .map(|c| c.aggregate);
    let title = match now {
        Some(v) => format!("CPU history (now: {v:>5.1}%)"),
        None => "CPU history".into(),
    };
    let max_points = area.width.saturating_sub(2) as usize;
    let start = history.len().saturating_sub(max_points);
    let data: Vec<u64> = history
        .iter()
        .skip(start)
        .filter_map(|s| s.cpu.as_ref())
        .map(|c| c.aggregate.clamp(0.0, 100.0).round() as u64)
        .collect();
    let spark = Sparkline::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .data(&data)
        .max(100)
        .style(Style::default().fg(usage_color(now.unwrap_or(0.0), display)));
    f.render_widget(spark, area);
}

/// Recent values for the core with id `core`, oldest first.
fn core_series(history: &[MetricsSample], core: u32) -> Vec<f32> {
    history
        .iter()
        .filter_map(|s| s.cpu.as_ref())
        .filter_map(|c| c.per_core.iter().find(|p| p.core == core))
        .map(|p| p.percent)
        .collect()
}

pub fn draw_per_core_bars(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    cpu: Option<&CpuUsage>,
    history: &[MetricsSample],
    display: &DisplaySection,
) {
    let Some(cpu) = cpu else {
        f.render_widget(Paragraph::new("no CPU sample yet"), area);
        return;
    };
    if area.height == 0 || cpu.per_core.is_empty() {
        return;
    }

    let rows = (area.height as usize).min(CORE_ROWS);
    let columns = cpu.per_core.len().div_ceil(rows);
    let col_areas = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(vec![Constraint::Ratio(1, columns as u32); columns])
        .split(area);

    for (i, core) in cpu.per_core.iter().enumerate() {
        let col = col_areas[i / rows];
        let rect = Rect {
            x: col.x,
            y: col.y + (i % rows) as u16,
            width: col.width,
            height: 1,
        };
        let hchunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(4), Constraint::Length(14)])
            .split(rect);

        let curr = core.percent.clamp(0.0, 100.0);
        let series = core_series(history, core.core);
        let older = series
            .iter()
            .rev()
            .nth(TREND_LOOKBACK)
            .copied()
            .unwrap_or(curr);
        let trend = if curr > older + 0.2 {
            "↑"
        } else if curr + 0.2 < older {
            "↓"
        } else {
            "╌"
        };
        let fg = usage_color(curr, display);

        let max_points = hchunks[0].width as usize;
        let start = series.len().saturating_sub(max_points);
        let data: Vec<u64> = series
            .iter()
            .skip(start)
            .map(|v| v.clamp(0.0, 100.0).round() as u64)
            .collect();
        let spark = Sparkline::default()
            .data(&data)
            .max(100)
            .style(Style::default().fg(fg));
        f.render_widget(spark, hchunks[0]);

        let label = format!("cpu{:<3}{}{:>5.1}%", core.core, trend, curr);
        let line = Line::from(Span::styled(
            label,
            Style::default().fg(fg).add_modifier(Modifier::BOLD),
        ));
        f.render_widget(Paragraph::new(line).right_aligned(), hchunks[1]);
    }
}

/// Single-row aggregate gauge for collapsed panels.
pub fn draw_cpu_gauge(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    cpu: Option<&CpuUsage>,
    display: &DisplaySection,
) {
    let (pct, label) = match cpu {
        Some(c) => (
            c.aggregate.clamp(0.0, 100.0),
            format!("CPU {:>5.1}% ({} cores)", c.aggregate, c.per_core.len()),
        ),
        None => (0.0, "CPU --".into()),
    };
    let g = Gauge::default()
        .gauge_style(Style::default().fg(usage_color(pct, display)))
        .percent(pct.round() as u16)
        .label(label);
    f.render_widget(g, area);
}
