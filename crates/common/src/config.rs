use anyhow::Result;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub general: General,
    pub database: Database,
    pub source: Source,
    pub snapshot: Snapshot,
    pub schedule: Schedule,
    pub observability: Observability,
}

#[derive(Debug, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct Source {
    pub rank_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Snapshot {
    pub enabled: bool,
    pub dir: String,
}

#[derive(Debug, Deserialize)]
pub struct Schedule {
    pub hour: u32,
    pub minute: u32,
    pub run_on_start: bool,
}

#[derive(Debug, Deserialize)]
pub struct Observability {
    pub prometheus_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        let content = std::fs::read_to_string("config/default.toml")?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_default_config() {
        let config = Config::from_toml_str(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.schedule.hour, 9);
        assert_eq!(config.schedule.minute, 0);
        assert!(config.source.timeout_secs > 0);
        assert!(config.source.rank_url.starts_with("https://"));
    }

    #[test]
    fn test_schedule_defaults_match_cli_defaults() {
        let toml = r#"
[general]
log_level = "info"

[database]
path = "data/collector.db"

[source]
rank_url = "https://gmgn.ai/defi/quotation/v1/rank/bsc/wallets/7d"
timeout_secs = 30

[snapshot]
enabled = false
dir = "data/snapshots"

[schedule]
hour = 21
minute = 30
run_on_start = true

[observability]
prometheus_port = 9095
"#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.schedule.hour, 21);
        assert_eq!(config.schedule.minute, 30);
        assert!(config.schedule.run_on_start);
        assert!(!config.snapshot.enabled);
    }
}
