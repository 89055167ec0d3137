use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction of a normalized swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// One swap record, unified across all upstream schemas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    pub tx_hash: String,
    pub timestamp_ms: i64,
    pub side: Side,
    pub base_amount: f64,
    pub quote_amount: f64,
    pub base_usd_price: Option<f64>,
    pub quote_usd_price: Option<f64>,
    /// USD notional; derived from base_amount * base_usd_price when the
    /// provider omits it. Always >= 0 when present.
    pub usd_value: Option<f64>,
    pub wallet: String,
}

/// One point of a provider's historical price series, ascending by timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp_ms: i64,
    pub usd_price: Decimal,
}

/// Current price with the 24h volume some providers embed alongside it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPrice {
    pub usd_price: Decimal,
    pub volume_24h_usd: Option<f64>,
}

/// The four trailing statistics windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKey {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "24h")]
    D1,
}

impl WindowKey {
    /// Ascending by duration
    pub const ALL: [WindowKey; 4] = [WindowKey::M5, WindowKey::H1, WindowKey::H4, WindowKey::D1];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKey::M5 => "5m",
            WindowKey::H1 => "1h",
            WindowKey::H4 => "4h",
            WindowKey::D1 => "24h",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            WindowKey::M5 => 5 * 60 * 1000,
            WindowKey::H1 => 60 * 60 * 1000,
            WindowKey::H4 => 4 * 60 * 60 * 1000,
            WindowKey::D1 => 24 * 60 * 60 * 1000,
        }
    }
}

/// Per-window transaction statistics.
/// Invariant: total_volume_usd == buy_volume_usd + sell_volume_usd (± rounding).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub price_change_pct: Option<f64>,
    pub buy_count: u32,
    pub sell_count: u32,
    pub buyer_count: u32,
    pub seller_count: u32,
    pub buy_volume_usd: f64,
    pub sell_volume_usd: f64,
    pub total_volume_usd: f64,
    /// True when these stats were estimated rather than observed
    pub synthesized: bool,
}

impl WindowStats {
    pub fn tx_count(&self) -> u32 {
        self.buy_count + self.sell_count
    }

    pub fn is_empty(&self) -> bool {
        self.tx_count() == 0 && self.total_volume_usd == 0.0
    }
}

/// Stats for all four windows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSet {
    #[serde(rename = "5m")]
    pub m5: WindowStats,
    #[serde(rename = "1h")]
    pub h1: WindowStats,
    #[serde(rename = "4h")]
    pub h4: WindowStats,
    #[serde(rename = "24h")]
    pub d1: WindowStats,
}

impl WindowSet {
    pub fn get(&self, key: WindowKey) -> &WindowStats {
        match key {
            WindowKey::M5 => &self.m5,
            WindowKey::H1 => &self.h1,
            WindowKey::H4 => &self.h4,
            WindowKey::D1 => &self.d1,
        }
    }

    pub fn get_mut(&mut self, key: WindowKey) -> &mut WindowStats {
        match key {
            WindowKey::M5 => &mut self.m5,
            WindowKey::H1 => &mut self.h1,
            WindowKey::H4 => &mut self.h4,
            WindowKey::D1 => &mut self.d1,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (WindowKey, &WindowStats)> {
        WindowKey::ALL.iter().map(move |k| (*k, self.get(*k)))
    }
}

/// Coarse per-window percentage changes as reported by the pair aggregator
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PeriodChanges {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h4: Option<f64>,
    pub d1: Option<f64>,
}

impl PeriodChanges {
    pub fn get(&self, key: WindowKey) -> Option<f64> {
        match key {
            WindowKey::M5 => self.m5,
            WindowKey::H1 => self.h1,
            WindowKey::H4 => self.h4,
            WindowKey::D1 => self.d1,
        }
    }
}

/// Token identity within a pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRef {
    pub address: String,
    pub symbol: String,
}

/// Point-in-time view of a traded pair. Replaced wholesale each tick,
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSnapshot {
    pub pair_address: String,
    pub chain: String,
    pub base_token: TokenRef,
    pub quote_token: TokenRef,
    pub liquidity_usd: Option<f64>,
    pub price_usd: Decimal,
    pub price_native: Option<Decimal>,
    pub volume_24h_usd: Option<f64>,
    pub period_changes: PeriodChanges,
    pub created_at: Option<DateTime<Utc>>,
}

/// Windowed aggregation output for one tick, published immutably
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationState {
    pub windows: WindowSet,
    pub last_updated: DateTime<Utc>,
}

/// The pair currently observed by the panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePair {
    pub pair_address: String,
    /// Base token contract address, used for ledger and chart lookups
    pub token_address: String,
    pub chain: String,
}

/// Which upstream (or local computation) satisfied a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    TradeLedger,
    Chart,
    PairAggregator,
    /// Percentage computed locally from transaction price deltas
    Local,
    /// Value carried over from the previous successful tick
    LastKnown,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::TradeLedger => "trade_ledger",
            ProviderId::Chart => "chart",
            ProviderId::PairAggregator => "pair_aggregator",
            ProviderId::Local => "local",
            ProviderId::LastKnown => "last_known",
        }
    }
}

/// Error taxonomy shared by all provider adapters
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication rejected by {provider}")]
    Auth { provider: &'static str },

    #[error("rate limit exceeded for {provider}")]
    RateLimit {
        provider: &'static str,
        retry_after: Option<u64>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unrecognized response shape: {0}")]
    Schema(String),
}

/// Result type used inside adapters before wrapping into envelopes
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Uniform envelope every adapter returns. A failing adapter produces an
/// envelope carrying the error kind, it never panics past its boundary.
#[derive(Debug, Clone)]
pub struct ProviderResult<T> {
    pub provider: ProviderId,
    pub fetched_at: DateTime<Utc>,
    pub outcome: Result<T>,
}

impl<T> ProviderResult<T> {
    pub fn ok(provider: ProviderId, value: T) -> Self {
        Self {
            provider,
            fetched_at: Utc::now(),
            outcome: Ok(value),
        }
    }

    pub fn err(provider: ProviderId, error: ProviderError) -> Self {
        Self {
            provider,
            fetched_at: Utc::now(),
            outcome: Err(error),
        }
    }

    pub fn wrap(provider: ProviderId, outcome: Result<T>) -> Self {
        Self {
            provider,
            fetched_at: Utc::now(),
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Data source health/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: String,
    pub is_healthy: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub success_rate: f64,
    pub last_latency_ms: u64,
}

/// Trait for provider adapters that report health
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Source name as it appears in logs and /health
    fn name(&self) -> &'static str;

    /// Health status from internal tracking, no upstream call spent
    async fn health(&self) -> SourceHealth;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_durations_ascend() {
        let mut prev = 0;
        for key in WindowKey::ALL {
            assert!(key.duration_ms() > prev);
            prev = key.duration_ms();
        }
    }

    #[test]
    fn window_set_roundtrip_keys() {
        let mut set = WindowSet::default();
        set.get_mut(WindowKey::H4).buy_count = 7;
        assert_eq!(set.get(WindowKey::H4).buy_count, 7);

        let json = serde_json::to_value(&set).unwrap();
        assert!(json.get("4h").is_some());
        assert!(json.get("24h").is_some());
    }

    #[test]
    fn errors_are_leaves_and_name_their_provider() {
        let err = ProviderError::RateLimit {
            provider: "chart",
            retry_after: Some(30),
        };
        assert_eq!(err.to_string(), "rate limit exceeded for chart");

        let err = ProviderError::Auth {
            provider: "trade_ledger",
        };
        assert_eq!(err.to_string(), "authentication rejected by trade_ledger");
        // Taxonomy variants wrap nothing; there is no chained cause
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn provider_result_envelope() {
        let ok = ProviderResult::ok(ProviderId::Chart, 1.0f64);
        assert!(ok.is_success());

        let err: ProviderResult<f64> = ProviderResult::err(
            ProviderId::TradeLedger,
            ProviderError::NotFound("0xdead".into()),
        );
        assert!(!err.is_success());
        assert_eq!(err.provider, ProviderId::TradeLedger);
    }
}
