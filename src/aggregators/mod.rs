// Time-windowed aggregation over the normalized transaction stream.
//
// Pure functions over (pinned now, deduplicated transactions): replaying the
// same inputs yields the same WindowSet. The window count is small and fixed,
// so one nested accumulation pass beats anything fancier.
use crate::types::*;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Drop duplicate records by transaction hash; first occurrence wins.
/// The primary page outranks supplementary pages merged after it.
pub fn dedupe_by_hash(txs: Vec<NormalizedTransaction>) -> Vec<NormalizedTransaction> {
    let mut seen: HashSet<String> = HashSet::with_capacity(txs.len());
    let before = txs.len();
    let deduped: Vec<NormalizedTransaction> = txs
        .into_iter()
        .filter(|tx| seen.insert(tx.tx_hash.clone()))
        .collect();
    if deduped.len() < before {
        debug!(dropped = before - deduped.len(), "deduplicated swap records");
    }
    deduped
}

/// Merge the primary page with a supplementary window-scoped page
pub fn merge_pages(
    primary: Vec<NormalizedTransaction>,
    supplement: Vec<NormalizedTransaction>,
) -> Vec<NormalizedTransaction> {
    let mut merged = primary;
    merged.extend(supplement);
    dedupe_by_hash(merged)
}

/// True when the primary page looks truncated for the 24h window: it filled
/// the fetch limit and its oldest record is still younger than 24h, so the
/// ledger holds more rows the page did not reach.
pub fn needs_widening(txs: &[NormalizedTransaction], fetch_limit: usize, now_ms: i64) -> bool {
    if txs.len() < fetch_limit {
        return false;
    }
    txs.iter()
        .map(|tx| tx.timestamp_ms)
        .min()
        .map(|oldest| now_ms - oldest < WindowKey::D1.duration_ms())
        .unwrap_or(false)
}

/// USD notional for one transaction: reported value, then price embedded in
/// the record, then the tick's resolved current price. A record with no
/// price at all still counts as a trade, with zero volume.
fn usd_value(tx: &NormalizedTransaction, current_price_usd: Option<f64>) -> f64 {
    tx.usd_value
        .or_else(|| tx.base_usd_price.map(|p| tx.base_amount * p))
        .or_else(|| current_price_usd.map(|p| tx.base_amount * p))
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0)
}

/// Bucket transactions into all four trailing windows in one pass.
/// `now_ms` is pinned by the caller so a tick's aggregation is replayable.
pub fn aggregate_windows(
    now_ms: i64,
    txs: &[NormalizedTransaction],
    current_price_usd: Option<f64>,
) -> WindowSet {
    let mut windows = WindowSet::default();
    let mut buyers: HashMap<WindowKey, HashSet<&str>> = HashMap::new();
    let mut sellers: HashMap<WindowKey, HashSet<&str>> = HashMap::new();

    for tx in txs {
        let age = now_ms - tx.timestamp_ms;
        if age < 0 {
            // Provider clock skew can stamp a trade in the future; skip it
            // instead of letting it inflate every window
            continue;
        }
        let volume = usd_value(tx, current_price_usd);

        for key in WindowKey::ALL {
            if key.duration_ms() < age {
                continue;
            }
            let stats = windows.get_mut(key);
            match tx.side {
                Side::Buy => {
                    stats.buy_count += 1;
                    stats.buy_volume_usd += volume;
                    buyers.entry(key).or_default().insert(tx.wallet.as_str());
                }
                Side::Sell => {
                    stats.sell_count += 1;
                    stats.sell_volume_usd += volume;
                    sellers.entry(key).or_default().insert(tx.wallet.as_str());
                }
            }
        }
    }

    for key in WindowKey::ALL {
        let stats = windows.get_mut(key);
        stats.buyer_count = buyers.get(&key).map(|s| s.len() as u32).unwrap_or(0);
        stats.seller_count = sellers.get(&key).map(|s| s.len() as u32).unwrap_or(0);
        stats.total_volume_usd = stats.buy_volume_usd + stats.sell_volume_usd;
    }

    windows
}
