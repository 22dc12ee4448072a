use anyhow::Result;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "collector_runs_total",
        "Ingestion runs, labelled by terminal status."
    );
    describe_counter!(
        "collector_fires_skipped_total",
        "Scheduler fires dropped because a run was still in flight."
    );
    describe_counter!(
        "collector_records_upserted_total",
        "Wallet records merged into the store."
    );
    describe_counter!(
        "collector_record_failures_total",
        "Records skipped or rejected during a run."
    );
    describe_histogram!(
        "collector_run_duration_ms",
        "Wall-clock duration of one ingestion run in milliseconds."
    );
    describe_histogram!(
        "collector_fetch_latency_ms",
        "Rank endpoint request latency in milliseconds."
    );
    describe_histogram!(
        "collector_db_query_latency_ms",
        "SQLite operation latency in milliseconds."
    );
    describe_counter!(
        "collector_db_query_errors_total",
        "SQLite operations that returned an error."
    );
}

pub fn install_prometheus(port: u16) -> Result<PrometheusHandle> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    Ok(PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_handle_renders_metric_names() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        describe();

        metrics::with_local_recorder(&recorder, || {
            let c = metrics::counter!("collector_records_upserted_total");
            c.increment(1);
        });

        let rendered = handle.render();
        assert!(rendered.contains("collector_records_upserted_total"));
    }
}
