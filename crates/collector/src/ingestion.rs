use crate::run_log::RunLog;
use crate::scheduler::{IngestRunner, RunOutcome};
use anyhow::Result;
use common::db::{self, AsyncDb};
use common::error::IngestError;
use common::types::{coerce_f64, coerce_i64, RawWallet, WalletRecord, SOURCE_NAME};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Fetch seam for the rank snapshot, so tests can inject fakes.
pub trait RankFetcher {
    fn fetch_rank(
        &self,
    ) -> impl std::future::Future<Output = Result<(Vec<RawWallet>, Vec<u8>)>> + Send;
}

impl RankFetcher for common::gmgn::GmgnClient {
    async fn fetch_rank(&self) -> Result<(Vec<RawWallet>, Vec<u8>)> {
        let start = std::time::Instant::now();
        let res = common::gmgn::GmgnClient::fetch_rank(self).await;
        metrics::histogram!("collector_fetch_latency_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        res
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub wallet_address: String,
    pub tag: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub attempted: usize,
    pub processed: usize,
    pub failures: Vec<RecordFailure>,
}

/// Normalize one raw entry. `Err` carries the reason a record is not
/// ingestible at all (no identity); malformed numeric fields never error,
/// they fall back to 0 for counts/rates and NULL for scores.
pub fn normalize(raw: &RawWallet, sync_date: &str) -> std::result::Result<WalletRecord, String> {
    let address = raw
        .identity_address()
        .ok_or_else(|| "missing wallet address".to_string())?;

    Ok(WalletRecord {
        wallet_address: address.to_string(),
        tag: raw.identity_tag().to_string(),
        sync_date: sync_date.to_string(),
        source: SOURCE_NAME.to_string(),
        twitter_name: raw.twitter_name.clone().or_else(|| raw.username.clone()),
        followers_count: coerce_i64(raw.followers_count.as_ref()),
        active_days: coerce_i64(raw.active_days.as_ref()),
        swap_count: coerce_i64(raw.swap_count.as_ref())
            .or_else(|| coerce_i64(raw.total_trades.as_ref()))
            .unwrap_or(0),
        total_volume: coerce_f64(raw.total_bnb_volume.as_ref())
            .or_else(|| coerce_f64(raw.total_volume.as_ref()))
            .unwrap_or(0.0),
        smart_money_score: coerce_f64(raw.smart_money_score.as_ref()),
        avg_volume_per_swap: coerce_f64(raw.avg_bnb_per_swap.as_ref()),
        efficiency_ratio: coerce_f64(raw.efficiency_ratio.as_ref())
            .or_else(|| coerce_f64(raw.winrate.as_ref()))
            .unwrap_or(0.0),
        estimated_roi_percentage: coerce_f64(raw.estimated_roi_percentage.as_ref())
            .or_else(|| coerce_f64(raw.pnl_1d.as_ref()))
            .unwrap_or(0.0),
    })
}

/// One full ingestion pass: fetch → snapshot → normalize → upsert → stats.
///
/// Record-level failures are collected into the report and never abort the
/// batch; only fetch failures fail the whole run (no partial upsert happens
/// in that case, since nothing was fetched).
pub async fn run_ingestion_once<F: RankFetcher>(
    db: &AsyncDb,
    fetcher: &F,
    snapshot_dir: Option<&Path>,
    sync_date: &str,
) -> std::result::Result<RunReport, IngestError> {
    let (raw_wallets, raw_body) = fetcher.fetch_rank().await.map_err(IngestError::Fetch)?;

    if let Some(dir) = snapshot_dir {
        match crate::snapshot::persist_raw(dir, sync_date, &raw_body) {
            Ok(path) => tracing::debug!(path = %path.display(), "raw snapshot written"),
            Err(e) => tracing::warn!(error = %e, "raw snapshot write failed"),
        }
    }

    let mut report = RunReport {
        attempted: raw_wallets.len(),
        ..RunReport::default()
    };

    if raw_wallets.is_empty() {
        tracing::info!("rank snapshot empty; nothing to ingest");
        return Ok(report);
    }

    for raw in &raw_wallets {
        let record = match normalize(raw, sync_date) {
            Ok(r) => r,
            Err(reason) => {
                tracing::warn!(tag = raw.identity_tag(), reason = %reason, "record skipped");
                metrics::counter!("collector_record_failures_total").increment(1);
                report.failures.push(RecordFailure {
                    wallet_address: raw.identity_address().unwrap_or_default().to_string(),
                    tag: raw.identity_tag().to_string(),
                    reason,
                });
                continue;
            }
        };

        // One statement per record: a constraint violation on one row must
        // not take the rest of the batch down with it.
        let row = record.clone();
        let res = db
            .call_named("upsert_wallet", move |conn| {
                db::upsert_wallet(conn, &row)?;
                Ok(())
            })
            .await;

        match res {
            Ok(()) => {
                report.processed += 1;
                metrics::counter!("collector_records_upserted_total").increment(1);
            }
            Err(e) => {
                tracing::warn!(
                    wallet = %record.wallet_address,
                    tag = %record.tag,
                    error = %e,
                    "wallet upsert failed"
                );
                metrics::counter!("collector_record_failures_total").increment(1);
                report.failures.push(RecordFailure {
                    wallet_address: record.wallet_address,
                    tag: record.tag,
                    reason: e.to_string(),
                });
            }
        }
    }

    // Summary readback is observability only; its failure never fails a run
    // that already persisted its records.
    match db.call(|conn| Ok(db::query_stats(conn)?)).await {
        Ok(stats) => tracing::info!(
            total_wallets = stats.total_wallets,
            avg_smart_money_score = stats.avg_smart_money_score,
            avg_efficiency_ratio = stats.avg_efficiency_ratio,
            "store stats after run"
        ),
        Err(e) => tracing::warn!(error = %e, "stats readback failed"),
    }

    Ok(report)
}

/// Production runner: executes one full pipeline pass on its own task and
/// reports the outcome over the completion channel the scheduler awaits.
/// Each run also lands a row in `ingest_runs`; bookkeeping failures are
/// logged and never change the outcome.
pub struct PipelineRunner<F> {
    db: AsyncDb,
    fetcher: Arc<F>,
    snapshot_dir: Option<PathBuf>,
}

impl<F> PipelineRunner<F> {
    pub fn new(db: AsyncDb, fetcher: F, snapshot_dir: Option<PathBuf>) -> Self {
        Self {
            db,
            fetcher: Arc::new(fetcher),
            snapshot_dir,
        }
    }
}

impl<F> IngestRunner for PipelineRunner<F>
where
    F: RankFetcher + Send + Sync + 'static,
{
    fn spawn_run(&self) -> oneshot::Receiver<RunOutcome> {
        let (tx, rx) = oneshot::channel();
        let db = self.db.clone();
        let fetcher = self.fetcher.clone();
        let snapshot_dir = self.snapshot_dir.clone();

        tokio::spawn(async move {
            let sync_date = chrono::Local::now().format("%Y%m%d").to_string();
            let run_log = match RunLog::start(&db).await {
                Ok(log) => Some(log),
                Err(e) => {
                    tracing::warn!(error = %e, "run bookkeeping unavailable");
                    None
                }
            };

            let outcome = match run_ingestion_once(
                &db,
                fetcher.as_ref(),
                snapshot_dir.as_deref(),
                &sync_date,
            )
            .await
            {
                Ok(report) => {
                    if let Some(log) = run_log {
                        if let Err(e) = log.success(&report).await {
                            tracing::warn!(error = %e, "run bookkeeping update failed");
                        }
                    }
                    RunOutcome::Completed(report)
                }
                Err(e) => {
                    let reason = e.to_string();
                    if let Some(log) = run_log {
                        if let Err(e2) = log.fail(&reason).await {
                            tracing::warn!(error = %e2, "run bookkeeping update failed");
                        }
                    }
                    RunOutcome::Failed(reason)
                }
            };
            let _ = tx.send(outcome);
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeFetcher {
        result: std::result::Result<(Vec<RawWallet>, Vec<u8>), String>,
    }

    impl FakeFetcher {
        fn with_wallets(wallets: Vec<RawWallet>) -> Self {
            Self {
                result: Ok((wallets, br#"{"data":[]}"#.to_vec())),
            }
        }

        fn failing(reason: &str) -> Self {
            Self {
                result: Err(reason.to_string()),
            }
        }
    }

    impl RankFetcher for FakeFetcher {
        async fn fetch_rank(&self) -> Result<(Vec<RawWallet>, Vec<u8>)> {
            match &self.result {
                Ok(ok) => Ok(ok.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    fn raw(value: serde_json::Value) -> RawWallet {
        serde_json::from_value(value).unwrap()
    }

    async fn count_rows(db: &AsyncDb) -> i64 {
        db.call(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM smart_money_wallets", [], |row| {
                row.get(0)
            })?)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop_success() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let fetcher = FakeFetcher::with_wallets(vec![]);

        let report = run_ingestion_once(&db, &fetcher, None, "20260830")
            .await
            .unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.processed, 0);
        assert!(report.failures.is_empty());
        assert_eq!(count_rows(&db).await, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_run_without_partial_upsert() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let fetcher = FakeFetcher::failing("endpoint timed out");

        let err = run_ingestion_once(&db, &fetcher, None, "20260830")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Fetch(_)));
        assert_eq!(count_rows(&db).await, 0);
    }

    #[tokio::test]
    async fn test_one_bad_identity_does_not_abort_the_batch() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let fetcher = FakeFetcher::with_wallets(vec![
            raw(json!({"address": "0xA", "swap_count": 1})),
            raw(json!({"tags": ["renowned"], "swap_count": 2})), // no address
            raw(json!({"address": "0xB", "swap_count": 3})),
        ]);

        let report = run_ingestion_once(&db, &fetcher, None, "20260830")
            .await
            .unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].reason, "missing wallet address");
        assert_eq!(count_rows(&db).await, 2);
    }

    #[tokio::test]
    async fn test_last_write_wins_within_one_batch() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let fetcher = FakeFetcher::with_wallets(vec![
            raw(json!({"address": "0xA", "tags": ["renowned"], "swap_count": "5", "total_volume": "1.2"})),
            raw(json!({"address": "0xA", "tags": ["renowned"], "swap_count": "7", "total_volume": "2.4"})),
        ]);

        let report = run_ingestion_once(&db, &fetcher, None, "20260830")
            .await
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(count_rows(&db).await, 1);

        let (swaps, volume): (i64, f64) = db
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT swap_count, total_volume FROM smart_money_wallets
                     WHERE wallet_address = '0xA' AND smart_tag = 'renowned'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(swaps, 7);
        assert!((volume - 2.4).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_rerun_with_same_input_is_idempotent() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let wallets = vec![raw(
            json!({"address": "0xA", "tags": ["renowned"], "swap_count": 5}),
        )];

        let fetcher = FakeFetcher::with_wallets(wallets.clone());
        run_ingestion_once(&db, &fetcher, None, "20260830")
            .await
            .unwrap();
        run_ingestion_once(&db, &fetcher, None, "20260831")
            .await
            .unwrap();

        assert_eq!(count_rows(&db).await, 1);
        let sync_date: String = db
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT sync_date FROM smart_money_wallets",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(sync_date, "20260831"); // latest run's stamp wins
    }

    #[tokio::test]
    async fn test_snapshot_written_when_dir_given() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::with_wallets(vec![]);

        run_ingestion_once(&db, &fetcher, Some(dir.path()), "20260830")
            .await
            .unwrap();
        assert!(dir.path().join("gmgn_rank_20260830.json").exists());
    }

    #[test]
    fn test_normalize_applies_fallback_chains() {
        let w = raw(json!({
            "wallet_address": "0xC",
            "username": "trader_c",
            "total_trades": "12",
            "winrate": 0.61,
            "pnl_1d": "4.2"
        }));
        let rec = normalize(&w, "20260830").unwrap();
        assert_eq!(rec.wallet_address, "0xC");
        assert_eq!(rec.tag, "renowned");
        assert_eq!(rec.source, "gmgn.ai");
        assert_eq!(rec.twitter_name.as_deref(), Some("trader_c"));
        assert_eq!(rec.swap_count, 12);
        assert!((rec.efficiency_ratio - 0.61).abs() < f64::EPSILON);
        assert!((rec.estimated_roi_percentage - 4.2).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_pipeline_runner_reports_completion_and_books_the_run() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let fetcher =
            FakeFetcher::with_wallets(vec![raw(json!({"address": "0xA", "swap_count": 1}))]);
        let runner = PipelineRunner::new(db.clone(), fetcher, None);

        let outcome = runner.spawn_run().await.unwrap();
        match outcome {
            RunOutcome::Completed(report) => {
                assert_eq!(report.processed, 1);
                assert!(report.failures.is_empty());
            }
            RunOutcome::Failed(reason) => panic!("unexpected failure: {reason}"),
        }

        let status: String = db
            .call(|conn| {
                Ok(conn.query_row("SELECT status FROM ingest_runs", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(status, "ok");
    }

    #[tokio::test]
    async fn test_pipeline_runner_reports_fetch_failure() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let runner = PipelineRunner::new(db.clone(), FakeFetcher::failing("down"), None);

        let outcome = runner.spawn_run().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed(_)));

        let (status, last_error): (String, Option<String>) = db
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT status, last_error FROM ingest_runs",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(status, "failed");
        assert!(last_error.unwrap().contains("rank fetch failed"));
    }

    #[test]
    fn test_normalize_malformed_numbers_degrade_to_defaults() {
        let w = raw(json!({
            "address": "0xD",
            "swap_count": "lots",
            "total_volume": {"oops": 1},
            "smart_money_score": "n/a",
            "followers_count": "many"
        }));
        let rec = normalize(&w, "20260830").unwrap();
        assert_eq!(rec.swap_count, 0);
        assert!((rec.total_volume - 0.0).abs() < f64::EPSILON);
        assert_eq!(rec.smart_money_score, None);
        assert_eq!(rec.followers_count, None);
    }
}
