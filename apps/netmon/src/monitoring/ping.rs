use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;

use super::runner::{CommandRunner, RunError};
use super::types::{PingResult, Target};

/// Extra time granted to the ping process on top of its own timeout so it
/// can report and exit before we give up on it.
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// Flavour of the system `ping` command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// `ping -n 1 -w <ms>`; no source interface binding
    Windows,
    /// `ping -c 1 -W <s> [-I <iface>]`
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) { Platform::Windows } else { Platform::Unix }
    }
}

fn latency_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"time[=<]([0-9.]+)\s*ms").expect("latency pattern is valid"))
}

/// First `time=<x>ms` / `time<<x>ms` figure in ping output
pub fn parse_latency(output: &str) -> Option<f64> {
    latency_pattern()
        .captures(output)
        .and_then(|captures| captures.get(1))
        .and_then(|value| value.as_str().parse::<f64>().ok())
}

/// Single-packet reachability probe using the platform ping utility
pub struct Pinger {
    timeout: Duration,
    platform: Platform,
    runner: Arc<dyn CommandRunner>,
}

impl Pinger {
    pub fn new(timeout: Duration, runner: Arc<dyn CommandRunner>) -> Self {
        Self { timeout, platform: Platform::current(), runner }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Command line for one echo request to `target`.
    ///
    /// The interface binding is best effort: Windows ping has no usable
    /// source-interface flag, so the interface is only recorded there.
    pub fn command(&self, target: &Target) -> Vec<String> {
        let mut argv = vec!["ping".to_string()];
        match self.platform {
            Platform::Windows => {
                argv.extend(["-n".into(), "1".into(), "-w".into(), self.timeout.as_millis().to_string()]);
            }
            Platform::Unix => {
                let seconds = self.timeout.as_secs().max(1);
                argv.extend(["-c".into(), "1".into(), "-W".into(), seconds.to_string()]);
                if let Some(interface) = &target.interface {
                    argv.extend(["-I".into(), interface.clone()]);
                }
            }
        }
        argv.push(target.host.clone());
        argv
    }

    /// Probe `target` once. Never fails: every problem becomes a failed result.
    ///
    /// The record is stamped when the command has finished.
    pub async fn ping(&self, target: &Target) -> PingResult {
        let argv = self.command(target);
        let outcome = self.runner.run(&argv, self.timeout + TEARDOWN_GRACE).await;
        let timestamp = Utc::now();

        match outcome {
            Ok(output) if output.success() => {
                PingResult::success(target, timestamp, parse_latency(&output.combined()))
            }
            Ok(output) => {
                let text = output.combined();
                let error = match text.trim() {
                    "" => format!("ping failed with code {}", output.code_label()),
                    trimmed => trimmed.to_string(),
                };
                PingResult::failure(target, timestamp, error)
            }
            Err(RunError::TimedOut(_)) => PingResult::failure(target, timestamp, "ping timed out"),
            Err(RunError::NotFound(_)) => {
                PingResult::failure(target, timestamp, "ping command not found")
            }
            Err(e) => PingResult::failure(target, timestamp, e.to_string()),
        }
    }
}
