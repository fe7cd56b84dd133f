use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::Row;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::monitoring::types::{PingResult, SpeedtestResult};

pub(crate) const PING_COLUMNS: &str =
    "id, ts_utc, target_name, interface, host, success, latency_ms, error";
pub(crate) const SPEEDTEST_COLUMNS: &str =
    "id, ts_utc, tool, success, download_mbps, upload_mbps, ping_ms, error";

/// A record as persisted, with its insertion sequence id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: i64,
    pub record: T,
}

impl<T> std::ops::Deref for Stored<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

/// Timestamps are stored as RFC 3339 UTC text
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339 text and, for older files, offset-less ISO 8601 taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn read_timestamp(row: &Row, table: &'static str, id: i64) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row.get(1).map_err(StoreError::Read)?;
    parse_timestamp(&raw).ok_or_else(|| StoreError::Corrupt {
        table,
        id,
        reason: format!("invalid timestamp {raw:?}"),
    })
}

pub(crate) fn ping_from_row(row: &Row) -> Result<Stored<PingResult>, StoreError> {
    let id: i64 = row.get(0).map_err(StoreError::Read)?;
    let timestamp = read_timestamp(row, "results", id)?;

    Ok(Stored {
        id,
        record: PingResult {
            timestamp,
            target_name: row.get(2).map_err(StoreError::Read)?,
            interface: row.get(3).map_err(StoreError::Read)?,
            host: row.get(4).map_err(StoreError::Read)?,
            success: row.get::<i64>(5).map_err(StoreError::Read)? != 0,
            latency_ms: row.get(6).map_err(StoreError::Read)?,
            error: row.get(7).map_err(StoreError::Read)?,
        },
    })
}

pub(crate) fn speedtest_from_row(row: &Row) -> Result<Stored<SpeedtestResult>, StoreError> {
    let id: i64 = row.get(0).map_err(StoreError::Read)?;
    let timestamp = read_timestamp(row, "speedtests", id)?;

    Ok(Stored {
        id,
        record: SpeedtestResult {
            timestamp,
            tool: row.get(2).map_err(StoreError::Read)?,
            success: row.get::<i64>(3).map_err(StoreError::Read)? != 0,
            download_mbps: row.get(4).map_err(StoreError::Read)?,
            upload_mbps: row.get(5).map_err(StoreError::Read)?,
            ping_ms: row.get(6).map_err(StoreError::Read)?,
            error: row.get(7).map_err(StoreError::Read)?,
        },
    })
}
