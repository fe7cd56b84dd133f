use ratatui::Frame;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::Span;
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph};

use super::{COLOR_BRAND, COLOR_ERROR, COLOR_LABEL, COLOR_MUTED, COLOR_SUCCESS, COLOR_UPLOAD};
use crate::dashboard::state::{DashboardState, LatencyTrace, ThroughputTrace};

/// Upper y bound with some headroom, never below `floor`
fn y_max<'a>(series: impl IntoIterator<Item = &'a (f64, f64)>, floor: f64) -> f64 {
    let peak = series.into_iter().map(|(_, y)| *y).fold(0.0, f64::max);
    (peak * 1.2).max(floor)
}

fn x_axis(state: &DashboardState) -> Axis<'static> {
    let x_max = state.x_max();
    let start = state.window_start.with_timezone(&chrono::Local);
    let end = start + chrono::Duration::milliseconds((x_max * 1000.0) as i64);
    Axis::default()
        .style(Style::default().fg(COLOR_MUTED))
        .bounds([0.0, x_max])
        .labels(vec![
            Span::raw(start.format("%H:%M").to_string()),
            Span::raw(end.format("%H:%M").to_string()),
        ])
}

fn y_axis(title: &'static str, max: f64) -> Axis<'static> {
    Axis::default()
        .title(title)
        .style(Style::default().fg(COLOR_MUTED))
        .bounds([0.0, max])
        .labels(vec![Span::raw("0"), Span::raw(format!("{max:.0}"))])
}

fn empty_pane(f: &mut Frame, area: Rect, title: String, message: &str) {
    let widget = Paragraph::new(Span::styled(message.to_string(), Style::default().fg(COLOR_MUTED)))
        .block(Block::default().borders(Borders::ALL).title(title).border_style(Style::default().fg(COLOR_BRAND)));
    f.render_widget(widget, area);
}

/// Latency line for one target; failures sit on the baseline as red markers.
pub fn render_latency(f: &mut Frame, area: Rect, state: &DashboardState, name: &str, trace: &LatencyTrace) {
    let last = trace.last_latency_ms.map(|latency| format!("{latency:.1} ms")).unwrap_or_else(|| "-".into());
    let title = format!(" {name}  {last}  ({}/{} ok) ", trace.successes, trace.total);

    if trace.total == 0 {
        empty_pane(f, area, title, "No ping data yet");
        return;
    }

    let mut datasets = vec![
        Dataset::default()
            .name("latency")
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(COLOR_SUCCESS))
            .data(&trace.latencies),
    ];
    if !trace.failures.is_empty() {
        datasets.push(
            Dataset::default()
                .name("fail")
                .marker(Marker::Dot)
                .graph_type(GraphType::Scatter)
                .style(Style::default().fg(COLOR_ERROR).add_modifier(Modifier::BOLD))
                .data(&trace.failures),
        );
    }

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title).border_style(Style::default().fg(COLOR_BRAND)))
        .x_axis(x_axis(state))
        .y_axis(y_axis("ms", y_max(&trace.latencies, 10.0)));
    f.render_widget(chart, area);
}

/// Download and upload throughput
pub fn render_throughput(f: &mut Frame, area: Rect, state: &DashboardState, trace: &ThroughputTrace) {
    let title = match trace.last {
        Some((down, up, ping)) => format!(" Speedtest  down {down:.1} / up {up:.1} Mbps, ping {ping:.1} ms "),
        None => " Speedtest ".to_string(),
    };

    if trace.download.is_empty() {
        empty_pane(f, area, title, "No speedtest data yet");
        return;
    }

    let datasets = vec![
        Dataset::default()
            .name("down")
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(COLOR_LABEL))
            .data(&trace.download),
        Dataset::default()
            .name("up")
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(COLOR_UPLOAD))
            .data(&trace.upload),
    ];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title).border_style(Style::default().fg(COLOR_BRAND)))
        .x_axis(x_axis(state))
        .y_axis(y_axis("Mbps", y_max(trace.download.iter().chain(&trace.upload), 1.0)));
    f.render_widget(chart, area);
}
