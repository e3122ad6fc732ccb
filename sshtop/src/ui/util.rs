//! Small UI helpers: human-readable sizes, truncation, threshold colors, popups.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::Color;

use crate::config::DisplaySection;

pub fn human(b: u64) -> String {
    const K: f64 = 1024.0;
    let b = b as f64;
    if b < K { return format!("{b:.0}B"); }
    let kb = b / K;
    if kb < K { return format!("{kb:.1}KB"); }
    let mb = kb / K;
    if mb < K { return format!("{mb:.1}MB"); }
    let gb = mb / K;
    if gb < K { return format!("{gb:.1}GB"); }
    let tb = gb / K;
    format!("{tb:.2}TB")
}

pub fn truncate_middle(s: &str, max: usize) -> String {
    let n = s.chars().count();
    if n <= max { return s.to_string(); }
    if max <= 3 { return "...".into(); }
    let keep = max - 3;
    let left: String = s.chars().take(keep / 2).collect();
    let right: String = s.chars().skip(n - (keep - keep / 2)).collect();
    format!("{left}...{right}")
}

/// Green below `low_threshold`, yellow below `medium_threshold`, red above.
pub fn usage_color(pct: f32, display: &DisplaySection) -> Color {
    if pct < display.low_threshold {
        Color::Green
    } else if pct < display.medium_threshold {
        Color::Yellow
    } else {
        Color::Red
    }
}

/// Rect of `width` x `height` centered in `area`, clipped to it.
pub fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(area.height.saturating_sub(h) / 2),
            Constraint::Length(h),
            Constraint::Min(0),
        ])
        .split(area);
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(area.width.saturating_sub(w) / 2),
            Constraint::Length(w),
            Constraint::Min(0),
        ])
        .split(rows[1]);
    cols[1]
}
