// Normalization of upstream swap records into NormalizedTransaction.
//
// The trade-ledger API serves two record shapes depending on chain and
// indexer version: flat fields, or nested buy/sold sub-objects. Both are
// decoded once here, behind one untagged union; no shape knowledge leaks past
// the adapter boundary.
use crate::types::{NormalizedTransaction, ProviderError, Result, Side};
use serde::Deserialize;
use tracing::debug;

/// Raw swap record as served by the trade ledger
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSwap {
    Nested(NestedSwap),
    Flat(FlatSwap),
}

/// Older indexer shape: one flat record per swap
#[derive(Debug, Clone, Deserialize)]
pub struct FlatSwap {
    pub tx_hash: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub base_amount: f64,
    pub quote_amount: Option<f64>,
    pub base_price_usd: Option<f64>,
    pub quote_price_usd: Option<f64>,
    pub amount_usd: Option<f64>,
    pub wallet_address: String,
}

/// Newer indexer shape: what the wallet bought and what it sold
#[derive(Debug, Clone, Deserialize)]
pub struct NestedSwap {
    pub tx_hash: String,
    pub block_timestamp: i64,
    pub buy: SwapLeg,
    pub sold: SwapLeg,
    pub wallet_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapLeg {
    pub address: String,
    pub amount: f64,
    pub price_usd: Option<f64>,
}

/// Ledger timestamps arrive in seconds on some chains and millis on others
fn to_millis(ts: i64) -> i64 {
    if ts < 1_000_000_000_000 {
        ts * 1000
    } else {
        ts
    }
}

fn usd_notional(amount: f64, price: Option<f64>, reported: Option<f64>) -> Option<f64> {
    let value = reported.or_else(|| price.map(|p| amount * p))?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

/// Resolve one raw record into the unified transaction shape.
/// `base_token` decides the trade direction for nested records: a wallet
/// buying the base token is a buy of the pair.
pub fn normalize_swap(raw: RawSwap, base_token: &str) -> Result<NormalizedTransaction> {
    match raw {
        RawSwap::Flat(flat) => {
            let side = match flat.kind.to_ascii_lowercase().as_str() {
                "buy" => Side::Buy,
                "sell" => Side::Sell,
                other => {
                    return Err(ProviderError::Schema(format!(
                        "unknown swap type: {other}"
                    )))
                }
            };
            let usd_value = usd_notional(flat.base_amount, flat.base_price_usd, flat.amount_usd);
            Ok(NormalizedTransaction {
                tx_hash: flat.tx_hash,
                timestamp_ms: to_millis(flat.timestamp),
                side,
                base_amount: flat.base_amount.abs(),
                quote_amount: flat.quote_amount.unwrap_or(0.0).abs(),
                base_usd_price: flat.base_price_usd,
                quote_usd_price: flat.quote_price_usd,
                usd_value,
                wallet: flat.wallet_address,
            })
        }
        RawSwap::Nested(nested) => {
            let bought_base = nested.buy.address.eq_ignore_ascii_case(base_token);
            let sold_base = nested.sold.address.eq_ignore_ascii_case(base_token);
            if !bought_base && !sold_base {
                return Err(ProviderError::Schema(format!(
                    "swap {} has no leg for base token {base_token}",
                    nested.tx_hash
                )));
            }

            let (side, base_leg, quote_leg) = if bought_base {
                (Side::Buy, nested.buy, nested.sold)
            } else {
                (Side::Sell, nested.sold, nested.buy)
            };

            let usd_value = usd_notional(base_leg.amount, base_leg.price_usd, None);
            Ok(NormalizedTransaction {
                tx_hash: nested.tx_hash,
                timestamp_ms: to_millis(nested.block_timestamp),
                side,
                base_amount: base_leg.amount.abs(),
                quote_amount: quote_leg.amount.abs(),
                base_usd_price: base_leg.price_usd,
                quote_usd_price: quote_leg.price_usd,
                usd_value,
                wallet: nested.wallet_address,
            })
        }
    }
}

/// Normalize a batch, dropping records the ledger served malformed.
/// A handful of bad records must not fail the whole page.
pub fn normalize_swaps(raw: Vec<RawSwap>, base_token: &str) -> Vec<NormalizedTransaction> {
    let total = raw.len();
    let normalized: Vec<NormalizedTransaction> = raw
        .into_iter()
        .filter_map(|swap| match normalize_swap(swap, base_token) {
            Ok(tx) => Some(tx),
            Err(e) => {
                debug!("dropping malformed swap record: {e}");
                None
            }
        })
        .collect();
    if normalized.len() < total {
        debug!(
            dropped = total - normalized.len(),
            kept = normalized.len(),
            "ledger page contained malformed records"
        );
    }
    normalized
}
