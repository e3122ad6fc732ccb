//! Memory gauge.

use ratatui::{
    layout::Rect,
    style::Style,
    widgets::{Block, Borders, Gauge},
};
use sshtop_engine::MemoryUsage;

use crate::config::DisplaySection;
use crate::ui::util::{human, usage_color};

/// Bordered gauge when `boxed`, a bare single row otherwise.
pub fn draw_mem(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    mem: Option<&MemoryUsage>,
    display: &DisplaySection,
    boxed: bool,
) {
    let (used, total, pct) = match mem {
        Some(m) => (m.used, m.total, m.percent()),
        None => (0, 0, 0.0),
    };
    let mut g = Gauge::default()
        .gauge_style(Style::default().fg(usage_color(pct, display)))
        .percent(pct.clamp(0.0, 100.0).round() as u16)
        .label(format!("MEM {} / {} ({pct:.1}%)", human(used), human(total)));
    if boxed {
        g = g.block(Block::default().borders(Borders::ALL).title("Memory"));
    }
    f.render_widget(g, area);
}
