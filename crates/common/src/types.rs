use serde::Deserialize;
use serde_json::Value;

/// Tag stamped on records whose source entry carries no tag list.
/// Part of the identity key, so the literal must stay stable.
pub const FALLBACK_TAG: &str = "renowned";

/// Source identifier stamped on every ingested record.
pub const SOURCE_NAME: &str = "gmgn.ai";

/// One wallet entry from the rank endpoint.
///
/// Every field is optional and numeric fields may arrive as JSON numbers
/// or as strings depending on the endpoint revision, so they are kept as
/// raw `Value`s and coerced at normalization time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWallet {
    pub address: Option<String>,
    pub wallet_address: Option<String>,
    pub tags: Option<Vec<String>>,
    pub tag: Option<String>,
    pub twitter_name: Option<String>,
    pub username: Option<String>,
    pub followers_count: Option<Value>,
    pub active_days: Option<Value>,
    pub swap_count: Option<Value>,
    pub total_trades: Option<Value>,
    pub total_volume: Option<Value>,
    pub total_bnb_volume: Option<Value>,
    pub smart_money_score: Option<Value>,
    pub avg_bnb_per_swap: Option<Value>,
    pub efficiency_ratio: Option<Value>,
    pub winrate: Option<Value>,
    pub estimated_roi_percentage: Option<Value>,
    pub pnl_1d: Option<Value>,
}

impl RawWallet {
    /// Identity address, preferring `address` over `wallet_address`.
    pub fn identity_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .or(self.wallet_address.as_deref())
            .filter(|a| !a.is_empty())
    }

    /// First tag from the tag list, then the scalar `tag` field,
    /// then the fixed fallback.
    pub fn identity_tag(&self) -> &str {
        self.tags
            .as_ref()
            .and_then(|t| t.first())
            .map(String::as_str)
            .or(self.tag.as_deref())
            .unwrap_or(FALLBACK_TAG)
    }
}

/// Coerce a JSON number-or-string into i64. Malformed input is `None`.
pub fn coerce_i64(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Coerce a JSON number-or-string into f64. Malformed input is `None`.
pub fn coerce_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Normalized record as persisted. Identity is `(wallet_address, tag)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletRecord {
    pub wallet_address: String,
    pub tag: String,
    pub sync_date: String,
    pub source: String,
    pub twitter_name: Option<String>,
    pub followers_count: Option<i64>,
    pub active_days: Option<i64>,
    pub swap_count: i64,
    pub total_volume: f64,
    pub smart_money_score: Option<f64>,
    pub avg_volume_per_swap: Option<f64>,
    pub efficiency_ratio: f64,
    pub estimated_roi_percentage: f64,
}

/// Aggregates over non-deleted rows. Empty store reads as zeros.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalletStats {
    pub total_wallets: i64,
    pub avg_smart_money_score: f64,
    pub avg_efficiency_ratio: f64,
}
