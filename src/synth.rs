//! Heuristic synthesis for windows with no empirical data.
//!
//! Upstream providers never distinguish "confirmed zero trades" from "no data
//! returned", so an active, liquid pair would otherwise render a literal
//! zero whenever the ledger comes back empty. When a window has neither
//! trades nor volume, plausible estimates are derived from adjacent signals
//! and flagged as synthesized. This fires on every zero/zero window, genuine
//! dead windows included; that ambiguity is accepted rather than guessed at.

use crate::types::*;
use tracing::debug;

/// Share of the 24h baseline volume attributed to each window
fn window_volume_share(key: WindowKey) -> f64 {
    match key {
        WindowKey::M5 => 0.05,
        WindowKey::H1 => 0.15,
        WindowKey::H4 => 0.40,
        WindowKey::D1 => 1.0,
    }
}

/// Average trade size model: scales with price, clamped to a plausible band
const AVG_TRADE_PRICE_MULT: f64 = 150.0;
const AVG_TRADE_MIN_USD: f64 = 25.0;
const AVG_TRADE_MAX_USD: f64 = 1500.0;

/// Baseline fallbacks when no provider reported a 24h volume
const LIQUIDITY_VOLUME_SHARE: f64 = 0.60;
const PRICE_VOLUME_FLOOR_MULT: f64 = 5000.0;

/// Buy share of the synthesized count, flipped when the window trended down
const BUY_SPLIT_BIAS: f64 = 0.56;

/// Adjacent signals the synthesizer may draw on
#[derive(Debug, Clone, Copy, Default)]
pub struct SynthInputs {
    /// 24h volume reported by the pair aggregator
    pub aggregator_volume_24h: Option<f64>,
    /// 24h volume embedded in the chart provider's token price
    pub token_volume_24h: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub price_usd: f64,
}

/// 24h baseline volume, in priority order: aggregator-reported → token
/// metadata → 60% of liquidity → price-scaled non-zero floor.
fn baseline_volume_24h(inputs: &SynthInputs) -> f64 {
    inputs
        .aggregator_volume_24h
        .filter(|v| *v > 0.0)
        .or(inputs.token_volume_24h.filter(|v| *v > 0.0))
        .or(inputs
            .liquidity_usd
            .filter(|l| *l > 0.0)
            .map(|l| l * LIQUIDITY_VOLUME_SHARE))
        .unwrap_or(inputs.price_usd * PRICE_VOLUME_FLOOR_MULT)
}

fn avg_trade_size(price_usd: f64) -> f64 {
    (price_usd * AVG_TRADE_PRICE_MULT).clamp(AVG_TRADE_MIN_USD, AVG_TRADE_MAX_USD)
}

/// Split a count 56/44, biased toward buys unless the window trended down
fn split_counts(total: u32, price_change_pct: Option<f64>) -> (u32, u32) {
    let buy_share = if price_change_pct.unwrap_or(0.0) >= 0.0 {
        BUY_SPLIT_BIAS
    } else {
        1.0 - BUY_SPLIT_BIAS
    };
    let buys = ((total as f64) * buy_share).round() as u32;
    let buys = buys.min(total);
    (buys, total - buys)
}

fn synthesize_window(key: WindowKey, stats: &mut WindowStats, inputs: &SynthInputs) {
    let window_volume = baseline_volume_24h(inputs) * window_volume_share(key);
    if window_volume <= 0.0 {
        return;
    }
    let avg_trade = avg_trade_size(inputs.price_usd);

    let tx_count = ((window_volume / avg_trade).round() as u32).max(1);
    let (buys, sells) = split_counts(tx_count, stats.price_change_pct);
    let buy_share = buys as f64 / tx_count as f64;

    stats.buy_count = buys;
    stats.sell_count = sells;
    stats.buyer_count = buys;
    stats.seller_count = sells;
    stats.buy_volume_usd = window_volume * buy_share;
    stats.sell_volume_usd = window_volume * (1.0 - buy_share);
    stats.total_volume_usd = stats.buy_volume_usd + stats.sell_volume_usd;
    stats.synthesized = true;
}

/// Complete a window where only one half is missing, keeping the known half.
fn complete_window(stats: &mut WindowStats, inputs: &SynthInputs) {
    let avg_trade = avg_trade_size(inputs.price_usd);

    if stats.tx_count() > 0 && stats.total_volume_usd == 0.0 {
        stats.buy_volume_usd = stats.buy_count as f64 * avg_trade;
        stats.sell_volume_usd = stats.sell_count as f64 * avg_trade;
        stats.total_volume_usd = stats.buy_volume_usd + stats.sell_volume_usd;
        stats.synthesized = true;
    } else if stats.tx_count() == 0 && stats.total_volume_usd > 0.0 {
        let tx_count = ((stats.total_volume_usd / avg_trade).round() as u32).max(1);
        let (buys, sells) = split_counts(tx_count, stats.price_change_pct);
        stats.buy_count = buys;
        stats.sell_count = sells;
        stats.buyer_count = buys;
        stats.seller_count = sells;
        stats.synthesized = true;
    }
}

/// Fill gaps across the window set. Fully empty windows are synthesized from
/// the baseline; partially empty ones have just the missing half estimated.
pub fn fill_missing(windows: &mut WindowSet, inputs: &SynthInputs) {
    for key in WindowKey::ALL {
        let stats = windows.get_mut(key);
        if stats.is_empty() {
            synthesize_window(key, stats, inputs);
            if stats.synthesized {
                debug!(
                    window = key.as_str(),
                    volume = stats.total_volume_usd,
                    txs = stats.tx_count(),
                    "synthesized empty window"
                );
            }
        } else {
            complete_window(stats, inputs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> SynthInputs {
        SynthInputs {
            aggregator_volume_24h: Some(100_000.0),
            token_volume_24h: Some(80_000.0),
            liquidity_usd: Some(50_000.0),
            price_usd: 2.0,
        }
    }

    #[test]
    fn empty_window_with_baseline_yields_nonzero_estimates() {
        let mut windows = WindowSet::default();
        fill_missing(&mut windows, &inputs());

        for (_, stats) in windows.iter() {
            assert!(stats.synthesized);
            assert!(stats.total_volume_usd > 0.0);
            assert!(stats.tx_count() >= 1);
            let sum = stats.buy_volume_usd + stats.sell_volume_usd;
            assert!((stats.total_volume_usd - sum).abs() < 0.01);
        }
        // 24h gets the full baseline, 5m its 5% share
        assert!((windows.d1.total_volume_usd - 100_000.0).abs() < 1.0);
        assert!((windows.m5.total_volume_usd - 5_000.0).abs() < 1.0);
    }

    #[test]
    fn baseline_priority_order() {
        assert_eq!(baseline_volume_24h(&inputs()), 100_000.0);

        let mut i = inputs();
        i.aggregator_volume_24h = None;
        assert_eq!(baseline_volume_24h(&i), 80_000.0);

        i.token_volume_24h = Some(0.0); // zero reports are not baselines
        assert_eq!(baseline_volume_24h(&i), 30_000.0);

        i.liquidity_usd = None;
        assert_eq!(baseline_volume_24h(&i), 10_000.0); // 2.0 * 5000
    }

    #[test]
    fn avg_trade_size_is_clamped() {
        assert_eq!(avg_trade_size(0.000001), 25.0);
        assert_eq!(avg_trade_size(2.0), 300.0);
        assert_eq!(avg_trade_size(1_000.0), 1500.0);
    }

    #[test]
    fn split_biases_follow_price_change_sign() {
        let (buys, sells) = split_counts(100, Some(4.2));
        assert_eq!((buys, sells), (56, 44));

        let (buys, sells) = split_counts(100, Some(-4.2));
        assert_eq!((buys, sells), (44, 56));

        // No change signal reads as non-negative
        let (buys, _) = split_counts(100, None);
        assert_eq!(buys, 56);
    }

    #[test]
    fn minimum_one_transaction_even_for_dust_volume() {
        let mut windows = WindowSet::default();
        let dust = SynthInputs {
            aggregator_volume_24h: Some(10.0),
            ..Default::default()
        };
        fill_missing(&mut windows, &dust);
        assert!(windows.m5.tx_count() >= 1);
    }

    #[test]
    fn known_counts_are_kept_when_only_volume_missing() {
        let mut windows = WindowSet::default();
        windows.m5.buy_count = 3;
        windows.m5.sell_count = 1;

        fill_missing(&mut windows, &inputs());
        let m5 = &windows.m5;
        assert_eq!((m5.buy_count, m5.sell_count), (3, 1));
        assert!(m5.synthesized);
        // avg trade at price 2.0 is 300
        assert_eq!(m5.buy_volume_usd, 900.0);
        assert_eq!(m5.sell_volume_usd, 300.0);
        assert_eq!(m5.total_volume_usd, 1200.0);
    }

    #[test]
    fn known_volume_is_kept_when_only_counts_missing() {
        let mut windows = WindowSet::default();
        windows.h1.buy_volume_usd = 900.0;
        windows.h1.sell_volume_usd = 0.0;
        windows.h1.total_volume_usd = 900.0;
        windows.h1.price_change_pct = Some(-2.0);

        fill_missing(&mut windows, &inputs());
        let h1 = &windows.h1;
        assert_eq!(h1.total_volume_usd, 900.0);
        assert!(h1.synthesized);
        assert_eq!(h1.tx_count(), 3); // 900 / 300
        assert!(h1.sell_count > h1.buy_count); // downward bias
    }

    #[test]
    fn observed_windows_are_left_untouched() {
        let mut windows = WindowSet::default();
        windows.h4.buy_count = 5;
        windows.h4.sell_count = 2;
        windows.h4.buy_volume_usd = 500.0;
        windows.h4.sell_volume_usd = 200.0;
        windows.h4.total_volume_usd = 700.0;

        let before = windows.h4.clone();
        fill_missing(&mut windows, &inputs());
        assert_eq!(windows.h4, before);
        assert!(!windows.h4.synthesized);
    }

    #[test]
    fn no_baseline_at_all_leaves_window_empty() {
        let mut windows = WindowSet::default();
        let nothing = SynthInputs::default(); // price 0 ⇒ floor is 0 too
        fill_missing(&mut windows, &nothing);
        assert!(windows.d1.is_empty());
        assert!(!windows.d1.synthesized);
    }
}
