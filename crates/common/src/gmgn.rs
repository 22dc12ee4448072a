use crate::types::RawWallet;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// The rank endpoint rejects default library user agents.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Rank responses arrive either as `{"data":{"rank":[...]}}` or with the
/// wallet list directly under `data`, depending on endpoint revision.
#[derive(Debug, Deserialize)]
struct RankResponse {
    data: Option<RankPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RankPayload {
    Ranked { rank: Vec<RawWallet> },
    Flat(Vec<RawWallet>),
}

impl RankResponse {
    fn into_wallets(self) -> Vec<RawWallet> {
        match self.data {
            Some(RankPayload::Ranked { rank }) => rank,
            Some(RankPayload::Flat(wallets)) => wallets,
            None => Vec::new(),
        }
    }
}

/// Single-purpose client for the daily wallet rank snapshot.
pub struct GmgnClient {
    http: reqwest::Client,
    rank_url: String,
}

impl GmgnClient {
    pub fn new(rank_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("building rank http client")?;
        Ok(Self {
            http,
            rank_url: rank_url.to_string(),
        })
    }

    pub fn rank_url(&self) -> &str {
        &self.rank_url
    }

    /// Fetch one rank snapshot. Returns the parsed wallet list plus the raw,
    /// unmodified body bytes so the caller can persist a snapshot file.
    pub async fn fetch_rank(&self) -> Result<(Vec<RawWallet>, Vec<u8>)> {
        let resp = self
            .http
            .get(&self.rank_url)
            .send()
            .await
            .context("rank request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("rank endpoint returned status {status}");
        }

        let body = resp.bytes().await.context("reading rank body")?;
        let parsed: RankResponse =
            serde_json::from_slice(&body).context("decoding rank response")?;
        Ok((parsed.into_wallets(), body.to_vec()))
    }
}
