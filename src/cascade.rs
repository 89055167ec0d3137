//! Fact resolution cascades.
//!
//! Every required fact (current price, per-window percentage change) has an
//! ordered list of sources; the order is data, not control flow. Per-tick
//! fan-out runs concurrently, so a lower-priority provider answering first
//! never outranks a higher-priority one that also succeeded within the tick.

use crate::types::*;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// A fact together with the provider that satisfied it
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub provider: ProviderId,
}

/// Walk results in priority order, return the first success.
/// All failed ⇒ `None` ("no update"), never a fabricated zero.
pub fn first_success<T>(results: Vec<ProviderResult<T>>) -> Option<Resolved<T>> {
    for result in results {
        match result.outcome {
            Ok(value) => {
                return Some(Resolved {
                    value,
                    provider: result.provider,
                })
            }
            Err(e) => debug!(provider = result.provider.as_str(), "cascade step failed: {e}"),
        }
    }
    None
}

/// Current-price cascade: chart price → aggregator embedded price →
/// last known snapshot price.
pub fn resolve_price(
    chart: &ProviderResult<TokenPrice>,
    pair: &ProviderResult<PairSnapshot>,
    last_known: Option<Decimal>,
) -> Option<Resolved<Decimal>> {
    let mut steps = vec![
        ProviderResult {
            provider: chart.provider,
            fetched_at: chart.fetched_at,
            outcome: chart.outcome.as_ref().map(|p| p.usd_price).map_err(Clone::clone),
        },
        ProviderResult {
            provider: pair.provider,
            fetched_at: pair.fetched_at,
            outcome: pair.outcome.as_ref().map(|s| s.price_usd).map_err(Clone::clone),
        },
    ];
    if let Some(price) = last_known {
        steps.push(ProviderResult::ok(ProviderId::LastKnown, price));
    }
    first_success(steps)
}

/// Percentage change over `window` from an ascending price series.
/// `None` when the series does not reach back to the window boundary.
pub fn pct_change_from_series(
    series: &[PricePoint],
    window: WindowKey,
    now_ms: i64,
) -> Option<f64> {
    let latest = series.last()?;
    let boundary = now_ms - window.duration_ms();

    let baseline = series
        .iter()
        .rev()
        .find(|p| p.timestamp_ms <= boundary)?;
    if baseline.usd_price.is_zero() {
        return None;
    }

    let pct = (latest.usd_price - baseline.usd_price) / baseline.usd_price * Decimal::ONE_HUNDRED;
    pct.to_f64()
}

/// Percentage change derived from trade prices inside the window.
/// The crudest signal, used only when both providers fail.
pub fn pct_change_from_transactions(
    txs: &[NormalizedTransaction],
    window: WindowKey,
    now_ms: i64,
) -> Option<f64> {
    let boundary = now_ms - window.duration_ms();
    let mut earliest: Option<&NormalizedTransaction> = None;
    let mut latest: Option<&NormalizedTransaction> = None;

    for tx in txs {
        if tx.timestamp_ms < boundary || tx.base_usd_price.is_none() {
            continue;
        }
        if earliest.map_or(true, |e| tx.timestamp_ms < e.timestamp_ms) {
            earliest = Some(tx);
        }
        if latest.map_or(true, |l| tx.timestamp_ms > l.timestamp_ms) {
            latest = Some(tx);
        }
    }

    let from = earliest?.base_usd_price?;
    let to = latest?.base_usd_price?;
    if from <= 0.0 {
        return None;
    }
    Some((to - from) / from * 100.0)
}

/// Per-window price-change cascade: chart series → aggregator coarse change →
/// locally computed from transactions. Chart data always outranks
/// transaction-derived percentages.
pub fn resolve_price_change(
    window: WindowKey,
    series: Option<&[PricePoint]>,
    aggregator: Option<&PeriodChanges>,
    txs: &[NormalizedTransaction],
    now_ms: i64,
) -> Option<Resolved<f64>> {
    let steps = vec![
        ProviderResult::wrap(
            ProviderId::Chart,
            series
                .and_then(|s| pct_change_from_series(s, window, now_ms))
                .ok_or_else(|| ProviderError::NotFound(format!("{} series change", window.as_str()))),
        ),
        ProviderResult::wrap(
            ProviderId::PairAggregator,
            aggregator
                .and_then(|c| c.get(window))
                .ok_or_else(|| ProviderError::NotFound(format!("{} coarse change", window.as_str()))),
        ),
        ProviderResult::wrap(
            ProviderId::Local,
            pct_change_from_transactions(txs, window, now_ms)
                .ok_or_else(|| ProviderError::NotFound(format!("{} local change", window.as_str()))),
        ),
    ];
    first_success(steps)
}

const DEFAULT_BACKOFF_SECS: u64 = 60;
const MAX_BACKOFF_SECS: u64 = 300;

/// Tracks per-provider backoff deadlines armed by rate-limit failures.
/// A provider in backoff is skipped (fails fast) until the deadline passes.
#[derive(Default)]
pub struct BackoffRegistry {
    until: RwLock<HashMap<ProviderId, DateTime<Utc>>>,
}

impl BackoffRegistry {
    /// Inspect a failure; rate limits arm the backoff, everything else is
    /// left to the cascade.
    pub async fn note(&self, provider: ProviderId, error: &ProviderError) {
        if let ProviderError::RateLimit { retry_after, .. } = error {
            let secs = retry_after.unwrap_or(DEFAULT_BACKOFF_SECS).min(MAX_BACKOFF_SECS);
            let until = Utc::now() + ChronoDuration::seconds(secs as i64);
            debug!(
                provider = provider.as_str(),
                backoff_secs = secs,
                "rate limited, backing off"
            );
            self.until.write().await.insert(provider, until);
        }
    }

    pub async fn is_backed_off(&self, provider: ProviderId) -> bool {
        match self.until.read().await.get(&provider) {
            Some(until) => *until > Utc::now(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn point(ts: i64, price: &str) -> PricePoint {
        PricePoint {
            timestamp_ms: ts,
            usd_price: Decimal::from_str(price).unwrap(),
        }
    }

    fn tx(ts: i64, price: f64) -> NormalizedTransaction {
        NormalizedTransaction {
            tx_hash: format!("0x{ts}"),
            timestamp_ms: ts,
            side: Side::Buy,
            base_amount: 1.0,
            quote_amount: 0.0,
            base_usd_price: Some(price),
            quote_usd_price: None,
            usd_value: Some(price),
            wallet: "0xw".into(),
        }
    }

    #[test]
    fn first_success_respects_order_not_arrival() {
        let results = vec![
            ProviderResult::err(
                ProviderId::Chart,
                ProviderError::Network("down".into()),
            ),
            ProviderResult::ok(ProviderId::PairAggregator, 2.0f64),
            ProviderResult::ok(ProviderId::Local, 3.0f64),
        ];
        let resolved = first_success(results).unwrap();
        assert_eq!(resolved.provider, ProviderId::PairAggregator);
        assert_eq!(resolved.value, 2.0);
    }

    #[test]
    fn all_failed_is_no_update() {
        let results: Vec<ProviderResult<f64>> = vec![
            ProviderResult::err(ProviderId::Chart, ProviderError::Network("a".into())),
            ProviderResult::err(ProviderId::Local, ProviderError::NotFound("b".into())),
        ];
        assert!(first_success(results).is_none());
    }

    #[test]
    fn series_change_uses_window_boundary_baseline() {
        let now = 1_700_000_000_000;
        let hour = WindowKey::H1.duration_ms();
        let series = vec![
            point(now - 2 * hour, "2.0"),
            point(now - hour - 1, "1.0"), // at-or-before the 1h boundary
            point(now - hour / 2, "1.5"),
            point(now, "1.2"),
        ];
        let pct = pct_change_from_series(&series, WindowKey::H1, now).unwrap();
        assert!((pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn series_not_covering_window_yields_none() {
        let now = 1_700_000_000_000;
        let series = vec![point(now - 60_000, "1.0"), point(now, "1.1")];
        assert!(pct_change_from_series(&series, WindowKey::H4, now).is_none());
    }

    #[test]
    fn transaction_change_spans_earliest_to_latest() {
        let now = 1_700_000_000_000;
        let txs = vec![
            tx(now - 30 * 60 * 1000, 1.0),
            tx(now - 10 * 60 * 1000, 1.3),
            tx(now - 20 * 60 * 1000, 0.9),
            tx(now - 5 * 60 * 60 * 1000, 5.0), // outside 1h, ignored
        ];
        let pct = pct_change_from_transactions(&txs, WindowKey::H1, now).unwrap();
        assert!((pct - 30.0).abs() < 1e-9);
    }

    #[test]
    fn chart_outranks_aggregator_when_both_present() {
        let now = 1_700_000_000_000;
        let hour = WindowKey::H1.duration_ms();
        let series = vec![point(now - hour - 1, "1.0"), point(now, "1.1")];
        let coarse = PeriodChanges {
            h1: Some(-42.0),
            ..Default::default()
        };

        let resolved =
            resolve_price_change(WindowKey::H1, Some(&series), Some(&coarse), &[], now).unwrap();
        assert_eq!(resolved.provider, ProviderId::Chart);
        assert!((resolved.value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn aggregator_beats_transactions_when_chart_missing() {
        let now = 1_700_000_000_000;
        let coarse = PeriodChanges {
            h1: Some(-42.0),
            ..Default::default()
        };
        let txs = vec![tx(now - 60_000, 1.0), tx(now - 30_000, 2.0)];

        let resolved = resolve_price_change(WindowKey::H1, None, Some(&coarse), &txs, now).unwrap();
        assert_eq!(resolved.provider, ProviderId::PairAggregator);
        assert_eq!(resolved.value, -42.0);
    }

    #[test]
    fn price_cascade_falls_back_to_last_known() {
        let chart: ProviderResult<TokenPrice> = ProviderResult::err(
            ProviderId::Chart,
            ProviderError::Network("down".into()),
        );
        let pair: ProviderResult<PairSnapshot> = ProviderResult::err(
            ProviderId::PairAggregator,
            ProviderError::RateLimit {
                provider: "pair_aggregator",
                retry_after: None,
            },
        );

        let resolved = resolve_price(&chart, &pair, Some(Decimal::new(15, 1))).unwrap();
        assert_eq!(resolved.provider, ProviderId::LastKnown);
        assert_eq!(resolved.value, Decimal::new(15, 1));

        assert!(resolve_price(&chart, &pair, None).is_none());
    }

    #[tokio::test]
    async fn rate_limit_arms_backoff_other_errors_do_not() {
        let registry = BackoffRegistry::default();

        registry
            .note(
                ProviderId::Chart,
                &ProviderError::Network("transient".into()),
            )
            .await;
        assert!(!registry.is_backed_off(ProviderId::Chart).await);

        registry
            .note(
                ProviderId::Chart,
                &ProviderError::RateLimit {
                    provider: "chart",
                    retry_after: Some(30),
                },
            )
            .await;
        assert!(registry.is_backed_off(ProviderId::Chart).await);
        // Other providers unaffected
        assert!(!registry.is_backed_off(ProviderId::TradeLedger).await);
    }

    #[tokio::test]
    async fn zero_retry_after_expires_immediately() {
        let registry = BackoffRegistry::default();
        registry
            .note(
                ProviderId::TradeLedger,
                &ProviderError::RateLimit {
                    provider: "trade_ledger",
                    retry_after: Some(0),
                },
            )
            .await;
        assert!(!registry.is_backed_off(ProviderId::TradeLedger).await);
    }
}
