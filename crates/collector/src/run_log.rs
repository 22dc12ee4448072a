use crate::ingestion::RunReport;
use anyhow::Result;
use common::db::AsyncDb;
use std::time::Instant;

/// Durable per-run bookkeeping in the `ingest_runs` table.
pub struct RunLog {
    db: AsyncDb,
    run_id: i64,
    start_time: Instant,
}

impl RunLog {
    pub async fn start(db: &AsyncDb) -> Result<Self> {
        let run_id = db
            .call_named("run_log.start", |conn| {
                conn.execute(
                    "INSERT INTO ingest_runs (started_at, status)
                     VALUES (strftime('%Y-%m-%d %H:%M:%f', 'now'), 'running')",
                    [],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        Ok(Self {
            db: db.clone(),
            run_id,
            start_time: Instant::now(),
        })
    }

    pub async fn success(self, report: &RunReport) -> Result<()> {
        let duration_ms = self.start_time.elapsed().as_millis() as i64;
        let run_id = self.run_id;
        let (attempted, processed, failed) = (
            report.attempted as i64,
            report.processed as i64,
            report.failures.len() as i64,
        );

        self.db
            .call_named("run_log.success", move |conn| {
                conn.execute(
                    "UPDATE ingest_runs SET
                        status = 'ok',
                        duration_ms = ?2,
                        attempted = ?3,
                        processed = ?4,
                        failed = ?5,
                        updated_at = datetime('now')
                     WHERE id = ?1",
                    rusqlite::params![run_id, duration_ms, attempted, processed, failed],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn fail(self, error: &str) -> Result<()> {
        let duration_ms = self.start_time.elapsed().as_millis() as i64;
        let run_id = self.run_id;
        let error_msg = error.to_string();

        self.db
            .call_named("run_log.fail", move |conn| {
                conn.execute(
                    "UPDATE ingest_runs SET
                        status = 'failed',
                        duration_ms = ?2,
                        last_error = ?3,
                        updated_at = datetime('now')
                     WHERE id = ?1",
                    rusqlite::params![run_id, duration_ms, error_msg],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
