use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reachability endpoint, optionally bound to a network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub host: String,
    pub interface: Option<String>,
}

impl Target {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self { name: name.into(), host: host.into(), interface: None }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }
}

/// Result of one ping probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    /// When the probe was started
    pub timestamp: DateTime<Utc>,

    pub target_name: String,

    /// Interface the probe asked to bind to. Recorded even where binding is unsupported.
    pub interface: Option<String>,

    pub host: String,

    pub success: bool,

    /// Round-trip time; only ever set on success and may still be absent then
    pub latency_ms: Option<f64>,

    /// Failure reason; set iff `success` is false
    pub error: Option<String>,
}

impl PingResult {
    pub fn success(target: &Target, timestamp: DateTime<Utc>, latency_ms: Option<f64>) -> Self {
        Self {
            timestamp,
            target_name: target.name.clone(),
            interface: target.interface.clone(),
            host: target.host.clone(),
            success: true,
            latency_ms: latency_ms.filter(|latency| latency.is_finite() && *latency >= 0.0),
            error: None,
        }
    }

    pub fn failure(target: &Target, timestamp: DateTime<Utc>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            timestamp,
            target_name: target.name.clone(),
            interface: target.interface.clone(),
            host: target.host.clone(),
            success: false,
            latency_ms: None,
            error: Some(if error.is_empty() { "ping failed".to_string() } else { error }),
        }
    }
}

/// Download/upload/latency triple reported by a throughput tool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
}

impl Throughput {
    pub fn is_finite(&self) -> bool {
        self.download_mbps.is_finite() && self.upload_mbps.is_finite() && self.ping_ms.is_finite()
    }
}

/// Result of one throughput probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedtestResult {
    pub timestamp: DateTime<Utc>,

    /// Name of the external program used, absent when none was found
    pub tool: Option<String>,

    pub success: bool,

    pub download_mbps: Option<f64>,

    pub upload_mbps: Option<f64>,

    pub ping_ms: Option<f64>,

    pub error: Option<String>,
}

impl SpeedtestResult {
    pub fn success(timestamp: DateTime<Utc>, tool: &str, throughput: Throughput) -> Self {
        Self {
            timestamp,
            tool: Some(tool.to_string()),
            success: true,
            download_mbps: Some(throughput.download_mbps),
            upload_mbps: Some(throughput.upload_mbps),
            ping_ms: Some(throughput.ping_ms),
            error: None,
        }
    }

    pub fn failure(timestamp: DateTime<Utc>, tool: Option<&str>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            timestamp,
            tool: tool.map(str::to_string),
            success: false,
            download_mbps: None,
            upload_mbps: None,
            ping_ms: None,
            error: Some(if error.is_empty() { "speedtest failed".to_string() } else { error }),
        }
    }

    pub fn throughput(&self) -> Option<Throughput> {
        Some(Throughput {
            download_mbps: self.download_mbps?,
            upload_mbps: self.upload_mbps?,
            ping_ms: self.ping_ms?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_failure_never_carries_latency() {
        let target = Target::new("cf", "1.1.1.1").with_interface("eth0");
        let result = PingResult::failure(&target, Utc::now(), "");

        assert!(!result.success);
        assert_eq!(result.latency_ms, None);
        assert_eq!(result.error.as_deref(), Some("ping failed"));
        assert_eq!(result.interface.as_deref(), Some("eth0"));
    }

    #[test]
    fn test_ping_success_drops_negative_latency() {
        let target = Target::new("cf", "1.1.1.1");
        assert_eq!(PingResult::success(&target, Utc::now(), Some(-1.0)).latency_ms, None);
        assert_eq!(PingResult::success(&target, Utc::now(), Some(12.5)).latency_ms, Some(12.5));
    }

    #[test]
    fn test_speedtest_failure_clears_measurements() {
        let result = SpeedtestResult::failure(Utc::now(), None, "No speedtest CLI found");
        assert!(!result.success);
        assert!(result.throughput().is_none());
        assert!(result.tool.is_none());
    }
}
