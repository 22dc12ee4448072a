use thiserror::Error;

/// Run-level failures. Each one fails the current ingestion run; none of
/// them is allowed past the scheduler boundary (it logs and re-arms).
///
/// Row-level upsert failures are not represented here — they are collected
/// as `(identity, reason)` entries in the run report and the batch continues.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store connection failed: {0}")]
    Connection(#[source] anyhow::Error),

    #[error("schema setup failed: {0}")]
    Schema(#[source] anyhow::Error),

    #[error("rank fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),
}
