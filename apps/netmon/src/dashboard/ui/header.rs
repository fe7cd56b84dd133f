use chrono::Local;
use ratatui::Frame;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Clear, Paragraph};

use super::{COLOR_BRAND, COLOR_ERROR, COLOR_INFO, COLOR_LABEL, COLOR_MUTED, COLOR_SUCCESS};
use crate::dashboard::state::{DashboardState, StatusLevel};

pub fn render(f: &mut Frame, area: Rect, state: &DashboardState) {
    let window_minutes = state.window.as_secs() / 60;
    let title = Line::from(vec![
        Span::styled("netmon ", Style::default().fg(COLOR_BRAND).add_modifier(Modifier::BOLD)),
        Span::styled(
            format!("last {window_minutes} min, refresh {}s", state.refresh_interval.as_secs()),
            Style::default().fg(COLOR_LABEL),
        ),
    ]);

    let mut status_spans = Vec::new();
    match state.last_sample() {
        Some(timestamp) => status_spans.push(Span::styled(
            format!("Last sample {} ", timestamp.with_timezone(&Local).format("%H:%M:%S")),
            Style::default().fg(COLOR_LABEL),
        )),
        None => status_spans.push(Span::styled("No ping data yet ", Style::default().fg(COLOR_MUTED))),
    }

    let traces = state.latency_traces();
    let successes: usize = traces.values().map(|trace| trace.successes).sum();
    let total: usize = traces.values().map(|trace| trace.total).sum();
    let color = if successes == total { COLOR_SUCCESS } else { COLOR_ERROR };
    status_spans.push(Span::styled(format!("[{successes}/{total} ok] "), Style::default().fg(color)));

    if let Some((msg, _, level)) = &state.status_message {
        let color = match level {
            StatusLevel::Error => COLOR_ERROR,
            StatusLevel::Info => COLOR_INFO,
        };
        status_spans.push(Span::styled(
            format!(" -- {msg}"),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
    }

    f.render_widget(Clear, area);
    f.render_widget(Paragraph::new(vec![title, Line::from(status_spans)]), area);
}
