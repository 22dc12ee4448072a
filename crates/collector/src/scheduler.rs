use crate::ingestion::RunReport;
use chrono::{DateTime, TimeZone};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Next instant at `hour:minute` local to `now`'s timezone. If that
/// time-of-day is not strictly after `now` it rolls forward one day.
/// `None` only when the wall time cannot be represented at all (bad
/// hour/minute, or a DST gap on every candidate day).
pub fn compute_next_fire_time<Tz: TimeZone>(
    now: &DateTime<Tz>,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    // Two candidate days cover the passed-today roll-forward; the third
    // absorbs a DST gap swallowing the target wall time.
    for _ in 0..3 {
        if let Some(naive) = date.and_hms_opt(hour, minute, 0) {
            if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
                if candidate > *now {
                    return Some(candidate);
                }
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Outcome of one ingestion execution, reported over the completion channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunReport),
    Failed(String),
}

/// Execution abstraction the scheduler fires. `spawn_run` starts one
/// ingestion execution on its own task and hands back the channel that
/// will carry its outcome; the scheduler awaits the channel instead of
/// polling.
pub trait IngestRunner: Send + Sync + 'static {
    fn spawn_run(&self) -> oneshot::Receiver<RunOutcome>;
}

/// Daily scheduler: fires the runner once per configured local time-of-day,
/// forever. At most one execution is in flight; overlapping fires are
/// dropped, not queued. A failed run never stops the loop.
pub struct Scheduler<R> {
    runner: Arc<R>,
    hour: u32,
    minute: u32,
    in_flight: Arc<AtomicBool>,
}

impl<R> Clone for Scheduler<R> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            hour: self.hour,
            minute: self.minute,
            in_flight: self.in_flight.clone(),
        }
    }
}

/// Handle for stopping the scheduling loop. Cancels the pending wait; an
/// in-flight execution keeps running on its own task until it completes.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    pub join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

impl<R: IngestRunner> Scheduler<R> {
    pub fn new(runner: R, hour: u32, minute: u32) -> Self {
        Self {
            runner: Arc::new(runner),
            hour,
            minute,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arm the daily loop. With `run_immediately` an out-of-band first run
    /// starts right away; it shares the single-flight guard but never delays
    /// arming the first scheduled wait.
    pub fn start(self, run_immediately: bool) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);

        if run_immediately {
            let scheduler = self.clone();
            tokio::spawn(async move {
                tracing::info!("startup run requested");
                scheduler.on_fire().await;
            });
        }

        let join = tokio::spawn(async move {
            self.run_loop(stop_rx).await;
        });

        SchedulerHandle {
            stop: stop_tx,
            join,
        }
    }

    async fn run_loop(self, mut stop_rx: watch::Receiver<bool>) {
        loop {
            let now = chrono::Local::now();
            let sleep_for = match compute_next_fire_time(&now, self.hour, self.minute) {
                Some(next) => {
                    let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                    tracing::info!(
                        next_fire = %next.format("%Y-%m-%d %H:%M:%S"),
                        wait_secs = wait.as_secs(),
                        "daily run scheduled"
                    );
                    wait
                }
                None => {
                    // Timer math failure must never silently stop the loop;
                    // re-arm and recompute in a minute.
                    tracing::error!(
                        hour = self.hour,
                        minute = self.minute,
                        "could not compute next fire time; re-arming in 60s"
                    );
                    Duration::from_secs(60)
                }
            };

            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {
                    self.on_fire().await;
                }
                changed = stop_rx.changed() => {
                    // A dropped handle counts as stop; looping on a closed
                    // channel would spin.
                    if changed.is_err() || *stop_rx.borrow() {
                        tracing::info!("scheduler stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One fire: skip if a run is already in flight, otherwise execute the
    /// runner and wait for its completion channel. Execution failures are
    /// logged and counted; they never escape this method.
    async fn on_fire(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("previous run still in flight; skipping this fire");
            metrics::counter!("collector_fires_skipped_total").increment(1);
            return;
        }

        let started = std::time::Instant::now();
        tracing::info!("ingestion run starting");

        let outcome = self.runner.spawn_run().await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("collector_run_duration_ms").record(duration_ms);

        match outcome {
            Ok(RunOutcome::Completed(report)) => {
                metrics::counter!("collector_runs_total", "status" => "ok").increment(1);
                tracing::info!(
                    duration_ms,
                    attempted = report.attempted,
                    processed = report.processed,
                    failed = report.failures.len(),
                    "ingestion run finished"
                );
            }
            Ok(RunOutcome::Failed(reason)) => {
                metrics::counter!("collector_runs_total", "status" => "failed").increment(1);
                tracing::error!(duration_ms, reason = %reason, "ingestion run failed");
            }
            Err(_) => {
                metrics::counter!("collector_runs_total", "status" => "failed").increment(1);
                tracing::error!(duration_ms, "run task dropped without reporting an outcome");
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }
}
