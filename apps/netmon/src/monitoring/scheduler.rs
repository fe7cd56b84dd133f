use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::ping::Pinger;
use super::runner::CommandRunner;
use super::speedtest::SpeedTester;
use super::types::{PingResult, SpeedtestResult, Target};
use crate::config::Config;
use crate::database::{MeasurementStore, StoreError};

/// Conditions that end a monitoring run early
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("failed to record {kind} result: {source}")]
    Store {
        kind: &'static str,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    /// Cancellation observed, finishing the current step
    Stopping,
    Stopped,
}

/// Closes the store when the loop exits, including when its future is dropped.
struct CloseOnExit(Arc<dyn MeasurementStore>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Drives both probes on their cadences and appends every result to the store.
pub struct Monitor {
    targets: Vec<Target>,
    interval: Duration,
    speedtest_interval: Duration,
    store: Arc<dyn MeasurementStore>,
    pinger: Pinger,
    speedtester: Option<SpeedTester>,
    state: MonitorState,
}

impl Monitor {
    pub fn new(
        targets: Vec<Target>,
        interval: Duration,
        store: Arc<dyn MeasurementStore>,
        pinger: Pinger,
    ) -> Self {
        Self {
            targets,
            interval,
            speedtest_interval: Duration::MAX,
            store,
            pinger,
            speedtester: None,
            state: MonitorState::Idle,
        }
    }

    /// Enable throughput probing every `interval`.
    pub fn with_speedtester(mut self, speedtester: SpeedTester, interval: Duration) -> Self {
        self.speedtester = Some(speedtester);
        self.speedtest_interval = interval;
        self
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn MeasurementStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let pinger = Pinger::new(config.ping_timeout(), runner.clone());
        let monitor = Self::new(config.targets(), config.interval(), store, pinger);

        if config.enable_speedtest {
            let speedtester = SpeedTester::new(
                config.speedtest_timeout(),
                config.speedtest_server_id.clone(),
                runner,
            );
            monitor.with_speedtester(speedtester, config.speedtest_interval())
        } else {
            monitor
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Run probe cycles until `cancel` fires, or a single cycle when `run_once`.
    ///
    /// Probe failures are recorded as data. Only a failed store insert ends
    /// the run with an error. The store is closed before this returns.
    pub async fn run_loop(
        &mut self,
        cancel: CancellationToken,
        run_once: bool,
    ) -> Result<(), MonitorError> {
        self.state = MonitorState::Running;
        let close = CloseOnExit(self.store.clone());
        info!(targets = self.targets.len(), run_once, "Starting network monitor loop");

        let result = self.drive(&cancel, run_once).await;
        match &result {
            Ok(()) if cancel.is_cancelled() => info!("Stopping monitor (cancelled)"),
            Ok(()) => info!("Monitor loop finished"),
            Err(e) => error!("Monitor loop stopped: {}", e),
        }

        drop(close);
        self.state = MonitorState::Stopped;
        result
    }

    /// [`run_loop`](Self::run_loop), then cancel `cancel` however the loop ended.
    ///
    /// Everything sharing the token (the dashboard) stops with the monitor,
    /// including when a store failure ends the run.
    pub async fn run_shared(
        &mut self,
        cancel: CancellationToken,
        run_once: bool,
    ) -> Result<(), MonitorError> {
        let result = self.run_loop(cancel.clone(), run_once).await;
        cancel.cancel();
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken, run_once: bool) -> Result<(), MonitorError> {
        // Throughput is due on the very first cycle
        let mut next_speedtest = self.speedtester.as_ref().map(|_| Instant::now());

        while !cancel.is_cancelled() {
            let cycle_start = Instant::now();

            for target in &self.targets {
                let Some(result) = until_cancelled(cancel, self.pinger.ping(target)).await else {
                    self.state = MonitorState::Stopping;
                    return Ok(());
                };
                record_ping(self.store.as_ref(), target, &result).await?;
            }

            let speedtest_due = next_speedtest.is_some_and(|due| cycle_start >= due);
            if let (true, Some(speedtester)) = (speedtest_due, self.speedtester.as_mut()) {
                let Some(result) = until_cancelled(cancel, speedtester.run()).await else {
                    self.state = MonitorState::Stopping;
                    return Ok(());
                };
                record_speedtest(self.store.as_ref(), &result).await?;
                next_speedtest = cycle_start.checked_add(self.speedtest_interval);
            }

            if run_once {
                break;
            }

            let remaining = self.interval.saturating_sub(cycle_start.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state = MonitorState::Stopping;
                    break;
                }
                _ = sleep(remaining) => {}
            }
        }

        Ok(())
    }
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

fn route(target: &Target) -> &str {
    target.interface.as_deref().unwrap_or("default route")
}

async fn record_ping(
    store: &dyn MeasurementStore,
    target: &Target,
    result: &PingResult,
) -> Result<(), MonitorError> {
    store
        .insert_ping(result)
        .await
        .map_err(|source| MonitorError::Store { kind: "ping", source })?;

    if result.success {
        info!(
            target_name = %target.name,
            host = %target.host,
            latency_ms = ?result.latency_ms,
            "{} ({}) reachable: {}, latency={:.1} ms",
            target.name,
            route(target),
            target.host,
            result.latency_ms.unwrap_or(-1.0)
        );
    } else {
        warn!(
            target_name = %target.name,
            host = %target.host,
            "{} ({}) failed: {}, error={}",
            target.name,
            route(target),
            target.host,
            result.error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

async fn record_speedtest(store: &dyn MeasurementStore, result: &SpeedtestResult) -> Result<(), MonitorError> {
    store
        .insert_speedtest(result)
        .await
        .map_err(|source| MonitorError::Store { kind: "speedtest", source })?;

    match result.throughput() {
        Some(throughput) if result.success => info!(
            tool = result.tool.as_deref().unwrap_or("?"),
            "Speedtest ({}): down={:.2} Mbps up={:.2} Mbps ping={:.1} ms",
            result.tool.as_deref().unwrap_or("?"),
            throughput.download_mbps,
            throughput.upload_mbps,
            throughput.ping_ms
        ),
        _ => warn!(
            "Speedtest failed ({}): {}",
            result.tool.as_deref().unwrap_or("none"),
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }
    Ok(())
}
