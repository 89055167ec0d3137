use crate::cache::{cache_key, ResponseCache};
use crate::sources::health::HealthTracker;
use crate::sources::http;
use crate::types::*;
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

const SOURCE: &str = "chart";
const API_KEY_HEADER: &str = "x-api-key";

/// Chain slug → the platform id the chart catalog uses for contract lookups
static CHAIN_PLATFORMS: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "ethereum" => "ethereum",
    "bsc" => "binance-smart-chain",
    "polygon" => "polygon-pos",
    "arbitrum" => "arbitrum-one",
    "base" => "base",
    "solana" => "solana",
    "avalanche" => "avalanche",
};

/// Well-known symbols resolved without spending a catalog call
static KNOWN_IDS: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "BTC" => "bitcoin",
    "ETH" => "ethereum",
    "SOL" => "solana",
    "BNB" => "binancecoin",
    "USDC" => "usd-coin",
    "USDT" => "tether",
};

/// Session-scoped address → catalog-id cache, injected at construction so
/// tests get a fresh instance per case. Addresses are immutable identities,
/// so an entry never needs invalidation.
#[derive(Clone, Default)]
pub struct IdCache {
    entries: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl IdCache {
    pub async fn get(&self, chain: &str, address: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(&(chain.to_string(), address.to_lowercase()))
            .cloned()
    }

    pub async fn put(&self, chain: &str, address: &str, id: String) {
        self.entries
            .write()
            .await
            .insert((chain.to_string(), address.to_lowercase()), id);
    }
}

/// Price/chart provider client: current price, historical series, and the
/// address/symbol → catalog-id resolution both of those require.
pub struct ChartClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    cache: Arc<ResponseCache>,
    id_cache: IdCache,
    health: HealthTracker,
}

impl ChartClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        cache: Arc<ResponseCache>,
        id_cache: IdCache,
    ) -> Result<Self> {
        Ok(Self {
            client: http::build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            cache,
            id_cache,
            health: HealthTracker::new(),
        })
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<serde_json::Value> {
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let header = self
            .api_key
            .as_deref()
            .map(|key| (API_KEY_HEADER, key));
        http::get_json(&self.client, url, header, self.timeout, SOURCE, &self.health).await
    }

    /// Resolve a token address (or symbol) to the provider's catalog id.
    /// Resolution happens once per session; subsequent ticks hit the id cache.
    pub async fn resolve_id(&self, chain: &str, address: &str, symbol: &str) -> Result<String> {
        if let Some(id) = self.id_cache.get(chain, address).await {
            return Ok(id);
        }

        if let Some(&id) = KNOWN_IDS.get(symbol.to_uppercase().as_str()) {
            self.id_cache.put(chain, address, id.to_string()).await;
            return Ok(id.to_string());
        }

        // Contract lookup first; it is exact where search is fuzzy
        if let Some(&platform) = CHAIN_PLATFORMS.get(chain) {
            match self
                .get_json(
                    "/resolveByContract",
                    &[("platform", platform), ("address", address)],
                )
                .await
            {
                Ok(body) => {
                    if let Some(id) = body.get("id").and_then(|v| v.as_str()) {
                        let id = id.to_string();
                        self.id_cache.put(chain, address, id.clone()).await;
                        return Ok(id);
                    }
                }
                Err(ProviderError::NotFound(_)) => {
                    debug!(address, chain, "contract not in chart catalog, falling back to search");
                }
                Err(e) => return Err(e),
            }
        }

        let body = self.get_json("/search", &[("query", symbol)]).await?;
        let coins = body
            .get("coins")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ProviderError::Schema("search response missing coins".into()))?;

        let id = coins
            .iter()
            .find(|c| {
                c.get("symbol")
                    .and_then(|s| s.as_str())
                    .map(|s| s.eq_ignore_ascii_case(symbol))
                    .unwrap_or(false)
            })
            .and_then(|c| c.get("id").and_then(|v| v.as_str()))
            .ok_or_else(|| ProviderError::NotFound(format!("no catalog id for {symbol}")))?
            .to_string();

        self.id_cache.put(chain, address, id.clone()).await;
        Ok(id)
    }

    /// Current USD price, with the 24h volume the endpoint embeds
    pub async fn fetch_price(&self, id: &str) -> ProviderResult<TokenPrice> {
        ProviderResult::wrap(ProviderId::Chart, self.fetch_price_inner(id).await)
    }

    async fn fetch_price_inner(&self, id: &str) -> Result<TokenPrice> {
        let key = cache_key(SOURCE, "price", &[id, "usd"]);
        let body = match self.cache.get::<serde_json::Value>(&key).await {
            Some(body) => body,
            None => {
                let body = self
                    .get_json(
                        "/price",
                        &[
                            ("id", id),
                            ("vsCurrency", "usd"),
                            ("include24hVolume", "true"),
                        ],
                    )
                    .await?;
                self.cache.put(&key, &body).await;
                body
            }
        };

        let data = body
            .get(id)
            .ok_or_else(|| ProviderError::NotFound(format!("no price data for {id}")))?;

        let usd_price = data
            .get("usd")
            .and_then(|v| v.as_f64())
            .and_then(|v| Decimal::try_from(v).ok())
            .ok_or_else(|| ProviderError::Schema("missing usd price".into()))?;

        let volume_24h_usd = data
            .get("usd_24h_vol")
            .and_then(|v| v.as_f64())
            .filter(|v| v.is_finite() && *v >= 0.0);

        Ok(TokenPrice {
            usd_price,
            volume_24h_usd,
        })
    }

    /// Historical price series, ascending. `days = 1` yields five-minutely
    /// points, enough to cover every window down to 5m.
    pub async fn fetch_price_series(&self, id: &str, days: u32) -> ProviderResult<Vec<PricePoint>> {
        ProviderResult::wrap(ProviderId::Chart, self.fetch_series_inner(id, days).await)
    }

    async fn fetch_series_inner(&self, id: &str, days: u32) -> Result<Vec<PricePoint>> {
        let days_s = days.to_string();
        let key = cache_key(SOURCE, "marketChart", &[id, "usd", &days_s]);
        let body = match self.cache.get::<serde_json::Value>(&key).await {
            Some(body) => body,
            None => {
                let interval = if days <= 1 { "5m" } else { "hourly" };
                let body = self
                    .get_json(
                        "/marketChart",
                        &[
                            ("id", id),
                            ("vsCurrency", "usd"),
                            ("days", &days_s),
                            ("interval", interval),
                        ],
                    )
                    .await?;
                self.cache.put(&key, &body).await;
                body
            }
        };

        let prices = body
            .get("prices")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ProviderError::Schema("marketChart response missing prices".into()))?;

        let mut series: Vec<PricePoint> = prices
            .iter()
            .filter_map(|pair| {
                let arr = pair.as_array()?;
                let timestamp_ms = arr.first()?.as_f64()? as i64;
                let usd_price = Decimal::try_from(arr.get(1)?.as_f64()?).ok()?;
                Some(PricePoint {
                    timestamp_ms,
                    usd_price,
                })
            })
            .collect();
        series.sort_by_key(|p| p.timestamp_ms);

        if series.is_empty() {
            return Err(ProviderError::Schema("empty price series".into()));
        }
        Ok(series)
    }
}

#[async_trait::async_trait]
impl DataSource for ChartClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn health(&self) -> SourceHealth {
        self.health.snapshot(SOURCE)
    }
}
