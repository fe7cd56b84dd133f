mod state;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio_util::sync::CancellationToken;

use crate::database::MeasurementStore;
pub use state::DashboardState;
use state::{SPEEDTEST_LIMIT, StatusLevel};

/// Live view settings
#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub target_names: Vec<String>,
    pub refresh: Duration,
    pub window: Duration,
    /// Ping cadence of the monitor, used to size each fetch
    pub probe_interval: Duration,
}

/// Pull the newest records from the store into `state`.
async fn refresh(store: &dyn MeasurementStore, state: &mut DashboardState, probe_interval: Duration) -> Result<()> {
    let pings = store.fetch_recent_pings(state.ping_limit(probe_interval)).await?;
    let speedtests = store.fetch_recent_speedtests(SPEEDTEST_LIMIT).await?;
    state.apply(
        pings.into_iter().map(|stored| stored.record).collect(),
        speedtests.into_iter().map(|stored| stored.record).collect(),
        Utc::now(),
    );
    Ok(())
}

fn is_quit(event: &Event) -> bool {
    let Event::Key(key) = event else {
        return false;
    };
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Run the read-only dashboard until the user quits or `cancel` fires.
///
/// Quitting cancels `cancel`, which also stops the monitor loop.
pub async fn run_dashboard(
    store: Arc<dyn MeasurementStore>,
    options: DashboardOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let mut state = DashboardState::new(options.target_names.clone(), options.window, options.refresh);

    // Init terminal in alternate screen
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, Hide)?;
    let backend = CrosstermBackend::new(&mut stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = async {
        while !cancel.is_cancelled() {
            state.clear_expired_status();

            if state.refresh_due() {
                if let Err(e) = refresh(store.as_ref(), &mut state, options.probe_interval).await {
                    tracing::warn!("Dashboard refresh failed: {}", e);
                    state.set_status(format!("refresh failed: {e}"), StatusLevel::Error);
                    state.last_refresh = Some(std::time::Instant::now());
                }
            }

            terminal.draw(|f| ui::render(f, &state))?;

            // Poll for events
            if event::poll(Duration::from_millis(250))? {
                let ev = event::read()?;
                if is_quit(&ev) {
                    tracing::info!("Dashboard closed, stopping monitor");
                    state.set_status("stopping", StatusLevel::Info);
                    cancel.cancel();
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    // Cleanup terminal
    drop(terminal);
    let exec_result = execute!(stdout, Show, LeaveAlternateScreen);
    let raw_mode_result = disable_raw_mode();
    store.close();
    result?;
    exec_result.and(raw_mode_result)?;
    Ok(())
}
