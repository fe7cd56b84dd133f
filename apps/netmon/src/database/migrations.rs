use chrono::Utc;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// Safe to call from every process opening the file: each step is idempotent
/// and concurrent openers racing on the same version are ignored.
pub async fn run_migrations(conn: &Connection) -> libsql::Result<()> {
    // Readers must never block on the writer; WAL is persisted in the file.
    conn.query("PRAGMA journal_mode=WAL", ()).await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Ping results and speedtests tables").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Timestamp indexes for export queries").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> libsql::Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> libsql::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, Utc::now().to_rfc3339(), description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: the two append-only measurement tables.
///
/// Column layout matches databases written by earlier versions of the
/// monitor so old measurement files can be exported as they are.
async fn run_migration_v1(conn: &Connection) -> libsql::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts_utc TEXT NOT NULL,
            target_name TEXT NOT NULL,
            interface TEXT,
            host TEXT NOT NULL,
            success INTEGER NOT NULL,
            latency_ms REAL,
            error TEXT
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS speedtests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts_utc TEXT NOT NULL,
            tool TEXT,
            success INTEGER NOT NULL,
            download_mbps REAL,
            upload_mbps REAL,
            ping_ms REAL,
            error TEXT
        )",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: indexes for chronological scans
async fn run_migration_v2(conn: &Connection) -> libsql::Result<()> {
    conn.execute("CREATE INDEX IF NOT EXISTS idx_results_ts ON results(ts_utc)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_target_ts ON results(target_name, ts_utc)",
        (),
    )
    .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_speedtests_ts ON speedtests(ts_utc)", ()).await?;
    Ok(())
}

/// Tables every measurement database has, whatever version wrote it
const MEASUREMENT_TABLES: [&str; 2] = ["results", "speedtests"];

/// First measurement table missing from the schema, without changing it.
pub async fn missing_table(conn: &Connection) -> libsql::Result<Option<&'static str>> {
    for table in MEASUREMENT_TABLES {
        let mut rows = conn
            .query(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
                libsql::params![table],
            )
            .await?;
        if rows.next().await?.is_none() {
            return Ok(Some(table));
        }
    }
    Ok(None)
}
