use crate::error::IngestError;
use crate::types::{WalletRecord, WalletStats};
use anyhow::Result;
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

/// Async database wrapper around `tokio_rusqlite::Connection`.
///
/// Runs all SQLite operations on a dedicated background thread via
/// `tokio_rusqlite`, keeping the Tokio runtime cooperative. Clone is
/// cheap (shared mpsc sender to the background thread).
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open a database at `path`, set PRAGMAs (WAL, busy_timeout) and ensure
    /// the schema exists — all on the background thread.
    pub async fn open(path: &str) -> Result<Self, IngestError> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| IngestError::Connection(e.into()))?;

        // Schema setup needs a write lock. A concurrent sqlite3 session or a
        // readback command can hold it briefly; hard-failing here would make
        // the service crash-loop under systemd, so retry with backoff until
        // the lock clears. Keep the per-attempt busy_timeout short so the
        // backoff is handled here rather than inside SQLite.
        let mut backoff = std::time::Duration::from_secs(1);
        let max_backoff = std::time::Duration::from_secs(30);
        let max_total_wait = std::time::Duration::from_secs(10 * 60);
        let start = std::time::Instant::now();

        loop {
            let res = conn
                .call(|conn| -> std::result::Result<(), rusqlite::Error> {
                    conn.busy_timeout(std::time::Duration::from_secs(1))?;
                    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                    conn.execute_batch(SCHEMA)?;
                    conn.busy_timeout(std::time::Duration::from_secs(30))?;
                    Ok(())
                })
                .await;

            match res {
                Ok(()) => break,
                Err(tokio_rusqlite::Error::Error(err)) => {
                    let is_locked = matches!(
                        err,
                        rusqlite::Error::SqliteFailure(
                            rusqlite::ffi::Error {
                                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                                ..
                            },
                            _,
                        )
                    );
                    if !is_locked {
                        return Err(IngestError::Schema(err.into()));
                    }

                    if start.elapsed() >= max_total_wait {
                        return Err(IngestError::Schema(anyhow::Error::from(err).context(
                            "AsyncDb::open: database stayed locked too long",
                        )));
                    }

                    tracing::warn!(
                        wait_for = ?backoff,
                        "AsyncDb::open: database is locked; retrying schema setup"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(other) => {
                    return Err(IngestError::Connection(anyhow::anyhow!(
                        "AsyncDb::open: {other}"
                    )))
                }
            }
        }

        Ok(Self { conn })
    }

    /// Run a closure on the background SQLite thread and return the result.
    pub async fn call<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(move |conn| function(conn)).await.map_err(
            |e: tokio_rusqlite::Error<anyhow::Error>| match e {
                tokio_rusqlite::Error::ConnectionClosed => {
                    anyhow::anyhow!("database connection closed")
                }
                tokio_rusqlite::Error::Close((_, err)) => {
                    anyhow::anyhow!("database close error: {err}")
                }
                tokio_rusqlite::Error::Error(err) => err,
                other => anyhow::anyhow!("database error: {other}"),
            },
        )
    }

    /// Like [`Self::call`], but records Prometheus metrics for DB latency and errors.
    pub async fn call_named<F, R>(&self, op: &'static str, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = std::time::Instant::now();
        let res = self.call(function).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        match &res {
            Ok(_) => {
                metrics::histogram!(
                    "collector_db_query_latency_ms",
                    "op" => op,
                    "status" => "ok"
                )
                .record(ms);
            }
            Err(_) => {
                metrics::histogram!(
                    "collector_db_query_latency_ms",
                    "op" => op,
                    "status" => "err"
                )
                .record(ms);
                metrics::counter!("collector_db_query_errors_total", "op" => op).increment(1);
            }
        }

        res
    }

    /// Close the background connection. Safe to call on an already-closed
    /// handle; any pending error is logged, not propagated.
    pub async fn close(self) {
        if let Err(err) = self.conn.close().await {
            tracing::warn!(error = %err, "AsyncDb::close failed");
        }
    }
}

impl Database {
    pub fn open(path: &str) -> Result<Self, IngestError> {
        let conn = Connection::open(path).map_err(|e| IngestError::Connection(e.into()))?;
        // busy_timeout via the rusqlite API — makes SQLite retry for up to 30s
        // when the database is locked by another connection.
        conn.busy_timeout(std::time::Duration::from_secs(30))
            .map_err(|e| IngestError::Connection(e.into()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| IngestError::Connection(e.into()))?;
        Ok(Self { conn })
    }

    /// Idempotently create tables and indexes. Safe on every startup.
    pub fn ensure_schema(&self) -> Result<(), IngestError> {
        self.conn
            .execute_batch(SCHEMA)
            .map_err(|e| IngestError::Schema(e.into()))
    }
}

/// Insert-or-merge one record keyed by `(wallet_address, smart_tag)`.
///
/// The update path overwrites every mutable column and refreshes
/// `updated_at`; `created_at` is only ever written by the insert path.
pub fn upsert_wallet(conn: &Connection, w: &WalletRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO smart_money_wallets (
            wallet_address, smart_tag, sync_date, source, twitter_name,
            followers_count, active_days, swap_count, total_volume,
            smart_money_score, avg_volume_per_swap, efficiency_ratio,
            estimated_roi_percentage
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(wallet_address, smart_tag) DO UPDATE SET
            sync_date = excluded.sync_date,
            source = excluded.source,
            twitter_name = excluded.twitter_name,
            followers_count = excluded.followers_count,
            active_days = excluded.active_days,
            swap_count = excluded.swap_count,
            total_volume = excluded.total_volume,
            smart_money_score = excluded.smart_money_score,
            avg_volume_per_swap = excluded.avg_volume_per_swap,
            efficiency_ratio = excluded.efficiency_ratio,
            estimated_roi_percentage = excluded.estimated_roi_percentage,
            updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')",
        rusqlite::params![
            w.wallet_address,
            w.tag,
            w.sync_date,
            w.source,
            w.twitter_name,
            w.followers_count,
            w.active_days,
            w.swap_count,
            w.total_volume,
            w.smart_money_score,
            w.avg_volume_per_swap,
            w.efficiency_ratio,
            w.estimated_roi_percentage,
        ],
    )?;
    Ok(())
}

/// Stored row as read back for the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredWallet {
    pub wallet_address: String,
    pub tag: String,
    pub sync_date: Option<String>,
    pub swap_count: i64,
    pub total_volume: f64,
    pub efficiency_ratio: f64,
    pub updated_at: String,
}

/// Up to `limit` rows, newest merge first.
pub fn query_latest(conn: &Connection, limit: u32) -> rusqlite::Result<Vec<StoredWallet>> {
    let mut stmt = conn.prepare(
        "SELECT wallet_address, smart_tag, sync_date, swap_count, total_volume,
                efficiency_ratio, updated_at
         FROM smart_money_wallets
         ORDER BY updated_at DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(rusqlite::params![limit], |row| {
        Ok(StoredWallet {
            wallet_address: row.get(0)?,
            tag: row.get(1)?,
            sync_date: row.get(2)?,
            swap_count: row.get(3)?,
            total_volume: row.get(4)?,
            efficiency_ratio: row.get(5)?,
            updated_at: row.get(6)?,
        })
    })?;
    rows.collect()
}

/// Aggregates over non-deleted rows; an empty store reads as zeros.
pub fn query_stats(conn: &Connection) -> rusqlite::Result<WalletStats> {
    conn.query_row(
        "SELECT COUNT(*),
                COALESCE(AVG(smart_money_score), 0.0),
                COALESCE(AVG(efficiency_ratio), 0.0)
         FROM smart_money_wallets
         WHERE is_deleted = 0",
        [],
        |row| {
            Ok(WalletStats {
                total_wallets: row.get(0)?,
                avg_smart_money_score: row.get(1)?,
                avg_efficiency_ratio: row.get(2)?,
            })
        },
    )
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS smart_money_wallets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet_address TEXT NOT NULL,
    smart_tag TEXT NOT NULL,
    sync_date TEXT,                    -- YYYYMMDD at run time
    source TEXT,
    twitter_name TEXT,
    followers_count INTEGER,
    active_days INTEGER,
    swap_count INTEGER NOT NULL DEFAULT 0,
    total_volume REAL NOT NULL DEFAULT 0.0,
    smart_money_score REAL,
    avg_volume_per_swap REAL,
    efficiency_ratio REAL NOT NULL DEFAULT 0.0,
    estimated_roi_percentage REAL NOT NULL DEFAULT 0.0,
    is_deleted INTEGER NOT NULL DEFAULT 0,  -- administrative; ingestion never sets it
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
    UNIQUE(wallet_address, smart_tag)
);

CREATE TABLE IF NOT EXISTS ingest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    duration_ms INTEGER,
    attempted INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,              -- running, ok, failed
    last_error TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_smart_money_updated_at ON smart_money_wallets(updated_at);
CREATE INDEX IF NOT EXISTS idx_smart_money_deleted ON smart_money_wallets(is_deleted);
CREATE INDEX IF NOT EXISTS idx_ingest_runs_started_at ON ingest_runs(started_at);
"#;
