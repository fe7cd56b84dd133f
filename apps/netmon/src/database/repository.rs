use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use deadpool::managed::{Object, PoolError};
use libsql::params;

use super::StoreError;
use super::migrations::{missing_table, run_migrations};
use super::models::{
    PING_COLUMNS, SPEEDTEST_COLUMNS, Stored, format_timestamp, ping_from_row, speedtest_from_row,
};
use crate::monitoring::types::{PingResult, SpeedtestResult};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Connections a read-only handle may hold at once
const READER_POOL_SIZE: usize = 4;

/// Append-only measurement log.
///
/// There are no update or delete operations: every record is written once
/// and readers only ever see whole records.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Append a ping result, returning its sequence id
    async fn insert_ping(&self, result: &PingResult) -> Result<i64, StoreError>;

    /// Append a speedtest result, returning its sequence id
    async fn insert_speedtest(&self, result: &SpeedtestResult) -> Result<i64, StoreError>;

    /// Up to `limit` most recent ping results, oldest first
    async fn fetch_recent_pings(&self, limit: usize) -> Result<Vec<Stored<PingResult>>, StoreError>;

    /// Up to `limit` most recent speedtest results, oldest first
    async fn fetch_recent_speedtests(
        &self,
        limit: usize,
    ) -> Result<Vec<Stored<SpeedtestResult>>, StoreError>;

    /// Every ping result in timestamp order
    async fn fetch_all_pings(&self) -> Result<Vec<Stored<PingResult>>, StoreError>;

    /// Every speedtest result in timestamp order
    async fn fetch_all_speedtests(&self) -> Result<Vec<Stored<SpeedtestResult>>, StoreError>;

    /// Release the underlying connections. Idempotent and infallible.
    fn close(&self);
}

/// Whether a handle is allowed to append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// The single writer; its pool holds one connection so inserts are serialized
    ReadWrite,
    ReadOnly,
}

/// libsql (SQLite file) implementation of [`MeasurementStore`]
pub struct Store {
    path: PathBuf,
    pool: LibsqlPool,
    mode: AccessMode,
    closed: AtomicBool,
}

impl Store {
    /// Open the writer handle, creating the file and schema if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_mode(path, AccessMode::ReadWrite).await
    }

    /// Open an independent reader handle next to a running writer.
    pub async fn open_reader(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_mode(path, AccessMode::ReadOnly).await
    }

    /// Open `path` as a writer or a reader.
    ///
    /// A writer creates the file and brings the schema up to date. A reader
    /// never writes: the file must exist and already hold both measurement
    /// tables.
    pub async fn open_with_mode(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        match mode {
            AccessMode::ReadWrite => {
                if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
                }
            }
            AccessMode::ReadOnly => {
                if !path.is_file() {
                    return Err(StoreError::NotFound(path));
                }
            }
        }

        let database = libsql::Builder::new_local(&path)
            .build()
            .await
            .map_err(|source| StoreError::Open { path: path.clone(), source })?;

        let max_size = match mode {
            AccessMode::ReadWrite => 1,
            AccessMode::ReadOnly => READER_POOL_SIZE,
        };
        let pool = LibsqlPool::builder(LibsqlManager::new(database))
            .max_size(max_size)
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let store = Self { path, pool, mode, closed: AtomicBool::new(false) };
        {
            let conn = store.conn().await?;
            match mode {
                AccessMode::ReadWrite => run_migrations(&conn).await.map_err(StoreError::Migration)?,
                AccessMode::ReadOnly => {
                    if let Some(table) = missing_table(&conn).await.map_err(StoreError::Read)? {
                        return Err(StoreError::MissingTable { path: store.path.clone(), table });
                    }
                }
            }
        }

        tracing::debug!(path = %store.path.display(), ?mode, "Opened measurement store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get a connection from the pool
    async fn conn(&self) -> Result<Object<LibsqlManager>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.pool.get().await.map_err(|e| match e {
            PoolError::Closed => StoreError::Closed,
            other => StoreError::Pool(other.to_string()),
        })
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            AccessMode::ReadWrite => Ok(()),
            AccessMode::ReadOnly => Err(StoreError::ReadOnly),
        }
    }

    async fn query_pings(
        &self,
        sql: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Stored<PingResult>>, StoreError> {
        let conn = self.conn().await?;
        let mut rows = match limit {
            Some(limit) => conn.query(sql, params![limit as i64]).await,
            None => conn.query(sql, ()).await,
        }
        .map_err(StoreError::Read)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Read)? {
            results.push(ping_from_row(&row)?);
        }
        Ok(results)
    }

    async fn query_speedtests(
        &self,
        sql: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Stored<SpeedtestResult>>, StoreError> {
        let conn = self.conn().await?;
        let mut rows = match limit {
            Some(limit) => conn.query(sql, params![limit as i64]).await,
            None => conn.query(sql, ()).await,
        }
        .map_err(StoreError::Read)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Read)? {
            results.push(speedtest_from_row(&row)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl MeasurementStore for Store {
    async fn insert_ping(&self, result: &PingResult) -> Result<i64, StoreError> {
        self.ensure_writable()?;
        let conn = self.conn().await?;

        conn.execute(
            "INSERT INTO results (ts_utc, target_name, interface, host, success, latency_ms, error) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                format_timestamp(result.timestamp),
                result.target_name.clone(),
                result.interface.clone(),
                result.host.clone(),
                if result.success { 1 } else { 0 },
                result.latency_ms,
                result.error.clone()
            ],
        )
        .await
        .map_err(StoreError::Write)?;

        Ok(conn.last_insert_rowid())
    }

    async fn insert_speedtest(&self, result: &SpeedtestResult) -> Result<i64, StoreError> {
        self.ensure_writable()?;
        let conn = self.conn().await?;

        conn.execute(
            "INSERT INTO speedtests (ts_utc, tool, success, download_mbps, upload_mbps, ping_ms, error) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                format_timestamp(result.timestamp),
                result.tool.clone(),
                if result.success { 1 } else { 0 },
                result.download_mbps,
                result.upload_mbps,
                result.ping_ms,
                result.error.clone()
            ],
        )
        .await
        .map_err(StoreError::Write)?;

        Ok(conn.last_insert_rowid())
    }

    async fn fetch_recent_pings(&self, limit: usize) -> Result<Vec<Stored<PingResult>>, StoreError> {
        let sql = format!("SELECT {PING_COLUMNS} FROM results ORDER BY id DESC LIMIT ?");
        let mut results = self.query_pings(&sql, Some(limit)).await?;
        results.reverse();
        Ok(results)
    }

    async fn fetch_recent_speedtests(
        &self,
        limit: usize,
    ) -> Result<Vec<Stored<SpeedtestResult>>, StoreError> {
        let sql = format!("SELECT {SPEEDTEST_COLUMNS} FROM speedtests ORDER BY id DESC LIMIT ?");
        let mut results = self.query_speedtests(&sql, Some(limit)).await?;
        results.reverse();
        Ok(results)
    }

    async fn fetch_all_pings(&self) -> Result<Vec<Stored<PingResult>>, StoreError> {
        let sql = format!("SELECT {PING_COLUMNS} FROM results ORDER BY ts_utc ASC, id ASC");
        self.query_pings(&sql, None).await
    }

    async fn fetch_all_speedtests(&self) -> Result<Vec<Stored<SpeedtestResult>>, StoreError> {
        let sql = format!("SELECT {SPEEDTEST_COLUMNS} FROM speedtests ORDER BY ts_utc ASC, id ASC");
        self.query_speedtests(&sql, None).await
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pool.close();
            tracing::debug!(path = %self.path.display(), "Closed measurement store");
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}
