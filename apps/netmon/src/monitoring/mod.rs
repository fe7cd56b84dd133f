//! Probes and the loop that drives them.
//!
//! Both probes shell out through a [`CommandRunner`] and never fail: every
//! problem with the external tool becomes a failed result record.

pub mod ping;
pub mod runner;
pub mod scheduler;
pub mod speedtest;
pub mod types;


pub use ping::Pinger;
pub use runner::{CommandRunner, ProcessRunner};
pub use scheduler::{Monitor, MonitorError, MonitorState};
pub use speedtest::SpeedTester;
pub use types::{PingResult, SpeedtestResult, Target, Throughput};
