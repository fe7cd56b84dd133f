//! Durable measurement log.
//!
//! One SQLite file per monitoring deployment holds two append-only tables,
//! `results` for ping probes and `speedtests` for throughput probes. The
//! monitor owns the only writer handle; the dashboard and the exporter open
//! their own reader handles on the same file.

pub mod migrations;
pub mod models;
pub mod repository;

use std::path::PathBuf;

pub use models::Stored;
pub use repository::{AccessMode, MeasurementStore, Store};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open database {}: {source}", .path.display())]
    Open { path: PathBuf, source: libsql::Error },

    #[error("failed to create directory {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("measurement database {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("database {} has no {table} table", .path.display())]
    MissingTable { path: PathBuf, table: &'static str },

    #[error("failed to migrate database schema: {0}")]
    Migration(libsql::Error),

    #[error("failed to write record: {0}")]
    Write(libsql::Error),

    #[error("failed to read records: {0}")]
    Read(libsql::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("store handle is read-only")]
    ReadOnly,

    #[error("store is closed")]
    Closed,

    #[error("corrupt row {id} in {table}: {reason}")]
    Corrupt { table: &'static str, id: i64, reason: String },
}
