//! Read-side computations over one or more measurement files.
//!
//! Every `*.db` file in the data directory is one dataset (one monitored
//! circuit). Nothing here writes to a store.

pub mod dataset;
pub mod export;
pub mod outages;
pub mod series;
pub mod stats;

use std::path::PathBuf;

pub use dataset::{DataBundle, Dataset, load_data};
pub use export::{ExportDocument, build_export, write_export};
pub use outages::{Outage, ThroughputGap, find_outages, find_throughput_gaps};

use crate::database::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no measurement databases (*.db) found in {}", .0.display())]
    NoDatabases(PathBuf),

    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
}
