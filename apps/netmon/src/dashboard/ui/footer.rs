use ratatui::Frame;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Clear, Paragraph};

use super::{COLOR_BRAND, COLOR_MUTED};

pub fn render(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled("Q/Esc", Style::default().fg(COLOR_BRAND).add_modifier(Modifier::BOLD)),
        Span::styled(": Quit (stops monitoring)", Style::default().fg(COLOR_MUTED)),
    ]);

    f.render_widget(Clear, area);
    f.render_widget(Paragraph::new(line).alignment(Alignment::Center), area);
}
