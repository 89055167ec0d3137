//! Presentation state: the stable read model the panel consumes.
//!
//! Status machine: Uninitialized → Loading → Ready, with Ready → Ready on
//! every successful or partially successful tick. Only an explicit pair
//! switch resets. Once a first value exists the state never regresses to
//! loading/empty; a wholly failed tick flips the stale flag and nothing else.

use crate::cascade::Resolved;
use crate::types::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelStatus {
    Uninitialized,
    Loading,
    Ready,
}

/// Inter-tick price movement, for transient up/down visual feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDelta {
    Up,
    Down,
    Flat,
}

/// What the view reads. Replaced wholesale on publish, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSnapshot {
    pub status: PanelStatus,
    pub pair: Option<ActivePair>,
    pub price_usd: Option<Decimal>,
    pub price_native: Option<Decimal>,
    pub liquidity_usd: Option<f64>,
    pub windows: WindowSet,
    /// Which provider satisfied the current price
    pub price_provider: Option<ProviderId>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub price_delta: PriceDelta,
    /// Set when the most recent tick failed outright; values are retained
    pub stale: bool,
}

impl PanelSnapshot {
    fn empty() -> Self {
        Self {
            status: PanelStatus::Uninitialized,
            pair: None,
            price_usd: None,
            price_native: None,
            liquidity_usd: None,
            windows: WindowSet::default(),
            price_provider: None,
            last_updated_at: None,
            price_delta: PriceDelta::Flat,
            stale: false,
        }
    }
}

/// Everything one tick resolved. Fields left `None` keep their previous
/// values, so a partially failed tick still moves the panel forward.
#[derive(Debug, Clone, Default)]
pub struct TickUpdate {
    pub price: Option<Resolved<Decimal>>,
    pub price_native: Option<Decimal>,
    pub liquidity_usd: Option<f64>,
    pub windows: Option<WindowSet>,
}

struct Inner {
    snapshot: PanelSnapshot,
    generation: u64,
    last_applied_seq: Option<u64>,
}

pub struct PresentationState {
    inner: RwLock<Inner>,
    tx: watch::Sender<PanelSnapshot>,
}

impl PresentationState {
    pub fn new() -> Self {
        let snapshot = PanelSnapshot::empty();
        let (tx, _) = watch::channel(snapshot.clone());
        Self {
            inner: RwLock::new(Inner {
                snapshot,
                generation: 0,
                last_applied_seq: None,
            }),
            tx,
        }
    }

    pub async fn snapshot(&self) -> PanelSnapshot {
        self.inner.read().await.snapshot.clone()
    }

    /// Reactive reads; the receiver sees every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<PanelSnapshot> {
        self.tx.subscribe()
    }

    /// Switch the observed pair. Bumps the generation so in-flight work for
    /// the previous pair is rejected on arrival, and resets to Loading.
    pub async fn reset(&self, pair: ActivePair, generation: u64) {
        let mut inner = self.inner.write().await;
        inner.generation = generation;
        inner.last_applied_seq = None;
        inner.snapshot = PanelSnapshot {
            status: PanelStatus::Loading,
            pair: Some(pair),
            ..PanelSnapshot::empty()
        };
        let _ = self.tx.send(inner.snapshot.clone());
    }

    /// Publish one tick's resolution. Returns false when the update was
    /// rejected by the stale-response guard (superseded tick or old pair).
    pub async fn apply(&self, seq: u64, generation: u64, update: TickUpdate) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.accepts(seq, generation) {
            debug!(seq, generation, "rejected stale tick publish");
            return false;
        }
        inner.last_applied_seq = Some(seq);

        let prev = &inner.snapshot;
        let price_delta = match (prev.price_usd, update.price.as_ref()) {
            (Some(old), Some(new)) if new.value > old => PriceDelta::Up,
            (Some(old), Some(new)) if new.value < old => PriceDelta::Down,
            _ => PriceDelta::Flat,
        };

        let next = PanelSnapshot {
            status: PanelStatus::Ready,
            pair: prev.pair.clone(),
            price_usd: update
                .price
                .as_ref()
                .map(|r| r.value)
                .or(prev.price_usd),
            price_native: update.price_native.or(prev.price_native),
            liquidity_usd: update.liquidity_usd.or(prev.liquidity_usd),
            windows: update.windows.unwrap_or_else(|| prev.windows.clone()),
            price_provider: update
                .price
                .as_ref()
                .map(|r| r.provider)
                .or(prev.price_provider),
            last_updated_at: Some(Utc::now()),
            price_delta,
            stale: false,
        };
        inner.snapshot = next;
        let _ = self.tx.send(inner.snapshot.clone());
        true
    }

    /// A wholly failed tick: retain everything, flag staleness.
    /// Before a first successful resolution this is a no-op; the panel is
    /// still allowed to show its hard loading state.
    pub async fn mark_stale(&self, seq: u64, generation: u64) {
        let mut inner = self.inner.write().await;
        if !inner.accepts(seq, generation) {
            return;
        }
        inner.last_applied_seq = Some(seq);
        if inner.snapshot.status == PanelStatus::Ready && !inner.snapshot.stale {
            inner.snapshot.stale = true;
            let _ = self.tx.send(inner.snapshot.clone());
        }
    }
}

impl Inner {
    fn accepts(&self, seq: u64, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        match self.last_applied_seq {
            Some(applied) => seq > applied,
            None => true,
        }
    }
}

impl Default for PresentationState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn pair() -> ActivePair {
        ActivePair {
            pair_address: "0xpair".into(),
            token_address: "0xbase".into(),
            chain: "ethereum".into(),
        }
    }

    fn price_update(price: &str) -> TickUpdate {
        TickUpdate {
            price: Some(Resolved {
                value: price.parse().unwrap(),
                provider: ProviderId::Chart,
            }),
            windows: Some(WindowSet::default()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn status_machine_walks_forward() {
        let state = PresentationState::new();
        assert_eq!(state.snapshot().await.status, PanelStatus::Uninitialized);

        state.reset(pair(), 1).await;
        assert_eq!(state.snapshot().await.status, PanelStatus::Loading);

        assert!(state.apply(10, 1, price_update("1.0")).await);
        assert_eq!(state.snapshot().await.status, PanelStatus::Ready);

        // Ready → Ready on the next tick
        assert!(state.apply(11, 1, price_update("1.1")).await);
        assert_eq!(state.snapshot().await.status, PanelStatus::Ready);
    }

    #[tokio::test]
    async fn stale_seq_is_rejected() {
        let state = PresentationState::new();
        state.reset(pair(), 1).await;
        assert!(state.apply(10, 1, price_update("1.0")).await);

        // A tick-9 response arriving after tick 10 must not overwrite
        assert!(!state.apply(9, 1, price_update("9.9")).await);
        assert_eq!(
            state.snapshot().await.price_usd,
            Some("1.0".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn old_generation_is_rejected_after_pair_switch() {
        let state = PresentationState::new();
        state.reset(pair(), 1).await;
        assert!(state.apply(10, 1, price_update("1.0")).await);

        let other = ActivePair {
            pair_address: "0xother".into(),
            ..pair()
        };
        state.reset(other.clone(), 2).await;

        // Slow response for the previous pair arrives late
        assert!(!state.apply(11, 1, price_update("9.9")).await);
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.status, PanelStatus::Loading);
        assert_eq!(snapshot.pair, Some(other));
        assert_eq!(snapshot.price_usd, None);
    }

    #[tokio::test]
    async fn failed_tick_only_flips_stale_flag() {
        let state = PresentationState::new();
        state.reset(pair(), 1).await;
        let mut update = price_update("1.0");
        update.liquidity_usd = Some(50_000.0);
        assert!(state.apply(10, 1, update).await);
        // Second tick moves the price so the delta is non-trivial
        assert!(state.apply(11, 1, price_update("1.2")).await);

        let before = state.snapshot().await;
        assert_eq!(before.price_delta, PriceDelta::Up);
        state.mark_stale(12, 1).await;
        let after = state.snapshot().await;

        assert!(after.stale);
        assert_eq!(after.price_delta, PriceDelta::Up);
        let mut comparable = after.clone();
        comparable.stale = before.stale;
        assert_eq!(comparable, before);

        // And the next good tick clears it
        assert!(state.apply(13, 1, price_update("1.0")).await);
        assert!(!state.snapshot().await.stale);
    }

    #[tokio::test]
    async fn partial_update_retains_previous_values() {
        let state = PresentationState::new();
        state.reset(pair(), 1).await;
        let mut update = price_update("2.0");
        update.liquidity_usd = Some(10_000.0);
        assert!(state.apply(10, 1, update).await);

        // Next tick resolved windows only
        let windows_only = TickUpdate {
            windows: Some(WindowSet::default()),
            ..Default::default()
        };
        assert!(state.apply(11, 1, windows_only).await);

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.status, PanelStatus::Ready);
        assert_eq!(snapshot.price_usd, Some("2.0".parse().unwrap()));
        assert_eq!(snapshot.liquidity_usd, Some(10_000.0));
    }

    #[tokio::test]
    async fn price_delta_tracks_direction() {
        let state = PresentationState::new();
        state.reset(pair(), 1).await;

        assert!(state.apply(10, 1, price_update("1.0")).await);
        assert_eq!(state.snapshot().await.price_delta, PriceDelta::Flat);

        assert!(state.apply(11, 1, price_update("1.5")).await);
        assert_eq!(state.snapshot().await.price_delta, PriceDelta::Up);

        assert!(state.apply(12, 1, price_update("0.5")).await);
        assert_eq!(state.snapshot().await.price_delta, PriceDelta::Down);

        assert!(state.apply(13, 1, price_update("0.5")).await);
        assert_eq!(state.snapshot().await.price_delta, PriceDelta::Flat);
    }

    #[tokio::test]
    async fn watch_subscribers_see_publishes() {
        let state = PresentationState::new();
        let mut rx = state.subscribe();

        state.reset(pair(), 1).await;
        tokio_test::assert_ok!(rx.changed().await);
        assert_eq!(rx.borrow().status, PanelStatus::Loading);

        state.apply(10, 1, price_update("1.0")).await;
        tokio_test::assert_ok!(rx.changed().await);
        assert_eq!(rx.borrow().status, PanelStatus::Ready);
    }

    #[tokio::test]
    async fn stale_before_first_data_keeps_loading_state() {
        let state = PresentationState::new();
        state.reset(pair(), 1).await;
        state.mark_stale(10, 1).await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.status, PanelStatus::Loading);
        assert!(!snapshot.stale);
    }
}
