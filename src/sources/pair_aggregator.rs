use crate::cache::{cache_key, ResponseCache};
use crate::sources::health::HealthTracker;
use crate::sources::http;
use crate::types::*;
use chrono::DateTime;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const SOURCE: &str = "pair_aggregator";

/// Pair-aggregator API client: one snapshot per pair with embedded
/// liquidity, price and coarse period changes.
pub struct PairAggregatorClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    cache: Arc<ResponseCache>,
    health: HealthTracker,
}

// Aggregator response shapes (schema not owned here)

#[derive(Debug, Deserialize)]
struct PairsResponse {
    pairs: Option<Vec<RawPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
    pair_address: String,
    chain_id: String,
    base_token: RawToken,
    quote_token: RawToken,
    /// Served as a string to dodge float truncation on micro-cap prices
    price_usd: Option<String>,
    price_native: Option<String>,
    liquidity: Option<RawLiquidity>,
    volume: Option<RawVolume>,
    price_change: Option<RawPriceChange>,
    pair_created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    address: String,
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct RawLiquidity {
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawVolume {
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawPriceChange {
    m5: Option<f64>,
    h1: Option<f64>,
    h4: Option<f64>,
    h24: Option<f64>,
}

impl PairAggregatorClient {
    pub fn new(base_url: &str, timeout: Duration, cache: Arc<ResponseCache>) -> Result<Self> {
        Ok(Self {
            client: http::build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            cache,
            health: HealthTracker::new(),
        })
    }

    /// Fetch the pair snapshot. The aggregator may list the same pair on
    /// several venues; the deepest-liquidity entry wins.
    pub async fn fetch_pair(&self, pair_address: &str, chain: &str) -> ProviderResult<PairSnapshot> {
        ProviderResult::wrap(
            ProviderId::PairAggregator,
            self.fetch_pair_inner(pair_address, chain).await,
        )
    }

    async fn fetch_pair_inner(&self, pair_address: &str, chain: &str) -> Result<PairSnapshot> {
        let key = cache_key(SOURCE, "pairs", &[chain, pair_address]);
        let body = match self.cache.get::<serde_json::Value>(&key).await {
            Some(body) => body,
            None => {
                let url = Url::parse(&format!(
                    "{}/pairs/{}/{}",
                    self.base_url, chain, pair_address
                ))
                .map_err(|e| ProviderError::Network(e.to_string()))?;
                let body = http::get_json(
                    &self.client,
                    url,
                    None,
                    self.timeout,
                    SOURCE,
                    &self.health,
                )
                .await?;
                self.cache.put(&key, &body).await;
                body
            }
        };

        let response: PairsResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Schema(e.to_string()))?;

        let mut pairs = response.pairs.unwrap_or_default();
        if pairs.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "pair {pair_address} not listed on {chain}"
            )));
        }

        pairs.sort_by(|a, b| {
            let la = a.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
            let lb = b.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
            lb.total_cmp(&la)
        });
        let raw = pairs.remove(0);
        debug!(
            pair = raw.pair_address.as_str(),
            venues = pairs.len() + 1,
            "selected deepest-liquidity venue"
        );

        let price_usd = raw
            .price_usd
            .as_deref()
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| ProviderError::Schema("pair snapshot missing priceUsd".into()))?;

        let change = raw.price_change.unwrap_or(RawPriceChange {
            m5: None,
            h1: None,
            h4: None,
            h24: None,
        });

        Ok(PairSnapshot {
            pair_address: raw.pair_address,
            chain: raw.chain_id,
            base_token: TokenRef {
                address: raw.base_token.address,
                symbol: raw.base_token.symbol,
            },
            quote_token: TokenRef {
                address: raw.quote_token.address,
                symbol: raw.quote_token.symbol,
            },
            liquidity_usd: raw.liquidity.and_then(|l| l.usd),
            price_usd,
            price_native: raw
                .price_native
                .as_deref()
                .and_then(|s| Decimal::from_str(s).ok()),
            volume_24h_usd: raw.volume.and_then(|v| v.h24),
            period_changes: PeriodChanges {
                m5: change.m5,
                h1: change.h1,
                h4: change.h4,
                d1: change.h24,
            },
            created_at: raw.pair_created_at.and_then(DateTime::from_timestamp_millis),
        })
    }
}

#[async_trait::async_trait]
impl DataSource for PairAggregatorClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn health(&self) -> SourceHealth {
        self.health.snapshot(SOURCE)
    }
}
