use serde::Deserialize;

/// Service configuration, sourced from the environment with the
/// `PAIR_DATA_` prefix (e.g. `PAIR_DATA_POLL_INTERVAL_SECS=30`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    /// Shared polling clock interval
    pub poll_interval_secs: u64,
    /// Per-request timeout applied to every provider call
    pub provider_timeout_secs: u64,
    /// Short-TTL response cache lifetime; kept below the poll interval so a
    /// fresh tick never reads the previous tick's responses
    pub cache_ttl_secs: u64,
    pub ledger_base_url: String,
    pub chart_base_url: String,
    pub chart_api_key: Option<String>,
    pub pairs_base_url: String,
    /// Page size for ledger swap fetches
    pub swap_fetch_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            poll_interval_secs: 20,
            provider_timeout_secs: 10,
            cache_ttl_secs: 15,
            ledger_base_url: "https://api.trade-ledger.example/v1".to_string(),
            chart_base_url: "https://api.chart.example/v3".to_string(),
            chart_api_key: None,
            pairs_base_url: "https://api.pairs.example/latest".to_string(),
            swap_fetch_limit: 100,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = AppConfig::default();

        let cfg = config::Config::builder()
            .set_default("port", defaults.port as i64)?
            .set_default("poll_interval_secs", defaults.poll_interval_secs as i64)?
            .set_default(
                "provider_timeout_secs",
                defaults.provider_timeout_secs as i64,
            )?
            .set_default("cache_ttl_secs", defaults.cache_ttl_secs as i64)?
            .set_default("ledger_base_url", defaults.ledger_base_url)?
            .set_default("chart_base_url", defaults.chart_base_url)?
            .set_default("pairs_base_url", defaults.pairs_base_url)?
            .set_default("swap_fetch_limit", defaults.swap_fetch_limit as i64)?
            .add_source(config::Environment::with_prefix("PAIR_DATA"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert!(cfg.cache_ttl_secs < cfg.poll_interval_secs);
        assert!(cfg.provider_timeout_secs < cfg.poll_interval_secs);
        assert!(cfg.swap_fetch_limit > 0);
    }
}
