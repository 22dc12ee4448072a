use anyhow::Result;
use std::path::PathBuf;

mod cli;
mod ingestion;
mod metrics;
mod run_log;
mod scheduler;
mod snapshot;

#[tokio::main]
async fn main() -> Result<()> {
    let config = common::config::Config::load()?;

    let dispatch = common::observability::build_dispatch(&config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    tracing::info!("smart money collector starting");

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;

    // Readback commands use the sync Database — they print and exit.
    let (hour_arg, minute_arg, run_now) = match cmd {
        cli::Command::Run {
            hour,
            minute,
            run_now,
        } => (hour, minute, run_now),
        other => {
            let db = common::db::Database::open(&config.database.path)?;
            db.ensure_schema()?;
            cli::run_command(&db, other)?;
            return Ok(());
        }
    };

    metrics::install_prometheus(config.observability.prometheus_port)?;
    metrics::describe();

    let db = common::db::AsyncDb::open(&config.database.path).await?;

    let client = common::gmgn::GmgnClient::new(
        &config.source.rank_url,
        std::time::Duration::from_secs(config.source.timeout_secs),
    )?;

    let snapshot_dir = config
        .snapshot
        .enabled
        .then(|| PathBuf::from(&config.snapshot.dir));

    let hour = hour_arg.unwrap_or(config.schedule.hour);
    let minute = minute_arg.unwrap_or(config.schedule.minute);
    let run_immediately = run_now || config.schedule.run_on_start;

    tracing::info!(hour, minute, run_immediately, "daily schedule configured");

    let runner = ingestion::PipelineRunner::new(db.clone(), client, snapshot_dir);
    let handle = scheduler::Scheduler::new(runner, hour, minute).start(run_immediately);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down (force exit in 5s)");
    handle.stop();

    // An in-flight run may finish on its own task; give it a moment, then
    // force exit so a hung fetch cannot block shutdown.
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        tracing::warn!("force exit after timeout");
        std::process::exit(0);
    });

    handle.join.await?;
    Ok(())
}
