use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::monitoring::types::{PingResult, SpeedtestResult};

/// Fewest ping records fetched per refresh, whatever the window
const MIN_PING_LIMIT: usize = 400;
pub const SPEEDTEST_LIMIT: usize = 200;

/// Status notification level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// Chart-ready samples of one target, x in seconds since the window start
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyTrace {
    pub latencies: Vec<(f64, f64)>,
    /// Failed probes, drawn on the baseline
    pub failures: Vec<(f64, f64)>,
    pub successes: usize,
    pub total: usize,
    pub last_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThroughputTrace {
    pub download: Vec<(f64, f64)>,
    pub upload: Vec<(f64, f64)>,
    pub last: Option<(f64, f64, f64)>,
}

/// Dashboard state
pub struct DashboardState {
    /// Targets in display order
    pub target_names: Vec<String>,
    pub window: Duration,
    pub refresh_interval: Duration,
    pub last_refresh: Option<Instant>,
    pub pings: Vec<PingResult>,
    pub speedtests: Vec<SpeedtestResult>,
    /// Start of the plotted window
    pub window_start: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub status_message: Option<(String, Instant, StatusLevel)>,
}

impl DashboardState {
    pub fn new(target_names: Vec<String>, window: Duration, refresh_interval: Duration) -> Self {
        let now = Utc::now();
        Self {
            target_names,
            window,
            refresh_interval,
            last_refresh: None,
            pings: Vec::new(),
            speedtests: Vec::new(),
            window_start: now,
            now,
            status_message: None,
        }
    }

    /// Recent ping records to request so a full window of every target fits
    pub fn ping_limit(&self, probe_interval: Duration) -> usize {
        let per_target = (self.window.as_secs_f64() / probe_interval.as_secs_f64().max(1.0)).ceil() as usize;
        (per_target + 1).saturating_mul(self.target_names.len().max(1)).max(MIN_PING_LIMIT)
    }

    pub fn refresh_due(&self) -> bool {
        self.last_refresh.is_none_or(|at| at.elapsed() >= self.refresh_interval)
    }

    /// Replace the plotted records with those inside the window ending at `now`.
    pub fn apply(&mut self, pings: Vec<PingResult>, speedtests: Vec<SpeedtestResult>, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::hours(1));
        let cutoff = now - window;

        self.pings = pings.into_iter().filter(|ping| ping.timestamp >= cutoff).collect();
        self.speedtests = speedtests.into_iter().filter(|st| st.timestamp >= cutoff).collect();
        self.now = now;
        self.window_start = self.pings.first().map(|ping| ping.timestamp.min(now)).unwrap_or(cutoff).max(cutoff);

        for ping in &self.pings {
            if !self.target_names.contains(&ping.target_name) {
                self.target_names.push(ping.target_name.clone());
            }
        }
        self.last_refresh = Some(Instant::now());
    }

    /// Seconds from the window start
    pub fn offset(&self, timestamp: DateTime<Utc>) -> f64 {
        (timestamp - self.window_start).num_milliseconds() as f64 / 1000.0
    }

    /// X axis end, leaving the newest point about 90% across
    pub fn x_max(&self) -> f64 {
        (self.offset(self.now).max(1.0)) / 0.9
    }

    pub fn latency_traces(&self) -> BTreeMap<&str, LatencyTrace> {
        let mut traces: BTreeMap<&str, LatencyTrace> =
            self.target_names.iter().map(|name| (name.as_str(), LatencyTrace::default())).collect();

        for ping in &self.pings {
            let trace = traces.entry(ping.target_name.as_str()).or_default();
            let x = self.offset(ping.timestamp);
            trace.total += 1;
            if ping.success {
                trace.successes += 1;
                if let Some(latency) = ping.latency_ms {
                    trace.latencies.push((x, latency));
                    trace.last_latency_ms = Some(latency);
                }
            } else {
                trace.failures.push((x, 0.0));
            }
        }
        traces
    }

    pub fn throughput_trace(&self) -> ThroughputTrace {
        let mut trace = ThroughputTrace::default();
        for speedtest in self.speedtests.iter().filter(|st| st.success) {
            if let Some(throughput) = speedtest.throughput() {
                let x = self.offset(speedtest.timestamp);
                trace.download.push((x, throughput.download_mbps));
                trace.upload.push((x, throughput.upload_mbps));
                trace.last = Some((throughput.download_mbps, throughput.upload_mbps, throughput.ping_ms));
            }
        }
        trace
    }

    pub fn last_sample(&self) -> Option<DateTime<Utc>> {
        self.pings.last().map(|ping| ping.timestamp)
    }

    /// Set a status notification (auto-clears after 5 seconds)
    pub fn set_status(&mut self, msg: impl Into<String>, level: StatusLevel) {
        self.status_message = Some((msg.into(), Instant::now(), level));
    }

    /// Clear expired status messages
    pub fn clear_expired_status(&mut self) {
        if let Some((_, created, _)) = &self.status_message {
            if created.elapsed() > Duration::from_secs(5) {
                self.status_message = None;
            }
        }
    }
}
