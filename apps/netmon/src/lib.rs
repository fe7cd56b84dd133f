//! Periodic network health probe.
//!
//! A monitor loop pings a set of targets on a fast cadence and runs an
//! external speed test on a slow one, appending every outcome to a local
//! SQLite file. A live terminal dashboard and a JSON exporter read that file
//! through their own handles.

pub mod analysis;
pub mod config;
pub mod dashboard;
pub mod database;
pub mod monitoring;
pub mod pool;
