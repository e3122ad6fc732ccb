//! Delete confirmation dialog.

use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use crate::ui::util::centered;

pub fn draw_confirm_delete(f: &mut ratatui::Frame<'_>, screen: Rect, name: &str) {
    let area = centered(screen, 50, 7);
    f.render_widget(Clear, area);
    let lines = vec![
        Line::from(vec![
            Span::raw("Stop monitoring and delete "),
            Span::styled(name.to_string(), Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("?"),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "y / Enter: delete    n / Esc: keep",
            Style::default().add_modifier(Modifier::DIM),
        )),
    ];
    let p = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Delete server")
                .border_style(Style::default().fg(Color::Red)),
        );
    f.render_widget(p, area);
}
