pub mod charts;
pub mod footer;
pub mod header;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::Color;

use crate::dashboard::state::DashboardState;

pub const COLOR_BRAND: Color = Color::Cyan;
pub const COLOR_LABEL: Color = Color::Gray;
pub const COLOR_MUTED: Color = Color::DarkGray;
pub const COLOR_SUCCESS: Color = Color::Green;
pub const COLOR_ERROR: Color = Color::Red;
pub const COLOR_INFO: Color = Color::Yellow;
pub const COLOR_UPLOAD: Color = Color::Magenta;

/// Render the entire UI
pub fn render(f: &mut Frame, state: &DashboardState) {
    let size = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Length(2), Constraint::Min(1), Constraint::Length(1)])
        .split(size);

    header::render(f, chunks[0], state);

    // One latency pane per target plus the throughput pane
    let panes = state.target_names.len() as u32 + 1;
    let constraints: Vec<Constraint> = (0..panes).map(|_| Constraint::Ratio(1, panes)).collect();
    let rows = Layout::default().direction(Direction::Vertical).constraints(constraints).split(chunks[1]);

    let traces = state.latency_traces();
    for (area, name) in rows.iter().zip(&state.target_names) {
        if let Some(trace) = traces.get(name.as_str()) {
            charts::render_latency(f, *area, state, name, trace);
        }
    }
    if let Some(area) = rows.last() {
        charts::render_throughput(f, *area, state, &state.throughput_trace());
    }

    footer::render(f, chunks[2]);
}
