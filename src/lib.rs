pub mod types;
pub mod sources {
    pub mod chart;
    pub mod health;
    pub(crate) mod http;
    pub mod pair_aggregator;
    pub mod trade_ledger;
}
pub mod aggregators;
pub mod cache;
pub mod cascade;
pub mod clock;
pub mod config;
pub mod normalizers;
pub mod state;
pub mod synth;

pub use config::AppConfig;
pub use sources::chart::{ChartClient, IdCache};
pub use sources::pair_aggregator::PairAggregatorClient;
pub use sources::trade_ledger::TradeLedgerClient;
pub use types::*;

use crate::aggregators::{aggregate_windows, dedupe_by_hash, merge_pages, needs_widening};
use crate::cache::ResponseCache;
use crate::cascade::{resolve_price, resolve_price_change, BackoffRegistry};
use crate::clock::Tick;
use crate::state::{PanelSnapshot, PresentationState, TickUpdate};
use crate::synth::{fill_missing, SynthInputs};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reconciliation engine for one observed trading pair.
///
/// Each tick fans out to all three providers concurrently, reconciles the
/// results through the fact cascades, buckets transactions into the four
/// trailing windows, synthesizes whatever came back empty, and publishes a
/// fresh read model. Failures never propagate past the cascades; at worst a
/// tick is marked stale and the panel keeps its last-known-good values.
pub struct PairDataEngine {
    ledger: Arc<TradeLedgerClient>,
    chart: Arc<ChartClient>,
    pairs: Arc<PairAggregatorClient>,
    backoff: BackoffRegistry,
    state: PresentationState,
    active: RwLock<Option<ActivePair>>,
    /// Bumped on every pair switch; in-flight work carries the generation it
    /// started under and is rejected on arrival if it no longer matches
    generation: AtomicU64,
    inflight: Mutex<Option<JoinHandle<()>>>,
    last_snapshot: RwLock<Option<PairSnapshot>>,
    swap_fetch_limit: usize,
}

impl PairDataEngine {
    pub fn new(cfg: &AppConfig) -> Result<Arc<Self>> {
        let cache = Arc::new(ResponseCache::new(cfg.cache_ttl_secs));
        let timeout = Duration::from_secs(cfg.provider_timeout_secs);

        Ok(Arc::new(Self {
            ledger: Arc::new(TradeLedgerClient::new(
                &cfg.ledger_base_url,
                timeout,
                Arc::clone(&cache),
            )?),
            chart: Arc::new(ChartClient::new(
                &cfg.chart_base_url,
                cfg.chart_api_key.clone(),
                timeout,
                Arc::clone(&cache),
                IdCache::default(),
            )?),
            pairs: Arc::new(PairAggregatorClient::new(
                &cfg.pairs_base_url,
                timeout,
                cache,
            )?),
            backoff: BackoffRegistry::default(),
            state: PresentationState::new(),
            active: RwLock::new(None),
            generation: AtomicU64::new(0),
            inflight: Mutex::new(None),
            last_snapshot: RwLock::new(None),
            swap_fetch_limit: cfg.swap_fetch_limit,
        }))
    }

    /// Current read model
    pub async fn snapshot(&self) -> PanelSnapshot {
        self.state.snapshot().await
    }

    /// Reactive reads for view-layer subscribers
    pub fn subscribe(&self) -> watch::Receiver<PanelSnapshot> {
        self.state.subscribe()
    }

    /// The adapters, for health reporting
    pub fn data_sources(&self) -> Vec<Arc<dyn DataSource>> {
        vec![
            Arc::clone(&self.ledger) as Arc<dyn DataSource>,
            Arc::clone(&self.chart) as Arc<dyn DataSource>,
            Arc::clone(&self.pairs) as Arc<dyn DataSource>,
        ]
    }

    /// Switch the observed pair: aborts in-flight work for the previous
    /// pair, resets sequence tracking, and puts the panel back into Loading.
    pub async fn set_active_pair(&self, pair: ActivePair) {
        if let Some(task) = self.inflight.lock().await.take() {
            task.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.active.write().await = Some(pair.clone());
        *self.last_snapshot.write().await = None;
        info!(
            pair = pair.pair_address.as_str(),
            chain = pair.chain.as_str(),
            "switched active pair"
        );
        self.state.reset(pair, generation).await;
    }

    /// Consume shared clock ticks until the channel closes. Each tick spawns
    /// a refresh; a slow refresh from a superseded tick is discarded by the
    /// sequence guard, not chased down.
    pub async fn run(self: Arc<Self>, mut ticks: broadcast::Receiver<Tick>) {
        loop {
            let tick = match ticks.recv().await {
                Ok(tick) => tick,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "engine lagged behind the polling clock");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let engine = Arc::clone(&self);
            let task = tokio::spawn(async move {
                engine.refresh_once(tick.seq).await;
            });
            *self.inflight.lock().await = Some(task);
        }
    }

    /// One full refresh pass for the active pair
    pub async fn refresh_once(&self, seq: u64) {
        let Some(pair) = self.active.read().await.clone() else {
            return;
        };
        let generation = self.generation.load(Ordering::SeqCst);
        self.refresh(seq, generation, pair).await;
    }

    async fn refresh(&self, seq: u64, generation: u64, pair: ActivePair) {
        let now_ms = Utc::now().timestamp_millis();
        debug!(seq, pair = pair.pair_address.as_str(), "refresh started");

        let symbol_hint = self
            .last_snapshot
            .read()
            .await
            .as_ref()
            .map(|s| s.base_token.symbol.clone())
            .unwrap_or_else(|| pair.token_address.clone());

        // Fan-out: all providers race, the cascades impose priority later.
        // Providers in rate-limit backoff fail fast instead of calling out.
        let ledger_fut = async {
            if self.backoff.is_backed_off(ProviderId::TradeLedger).await {
                ProviderResult::err(
                    ProviderId::TradeLedger,
                    ProviderError::RateLimit {
                        provider: "trade_ledger",
                        retry_after: None,
                    },
                )
            } else {
                self.ledger
                    .fetch_transactions(&pair.token_address, &pair.chain, None, self.swap_fetch_limit)
                    .await
            }
        };

        let pairs_fut = async {
            if self.backoff.is_backed_off(ProviderId::PairAggregator).await {
                ProviderResult::err(
                    ProviderId::PairAggregator,
                    ProviderError::RateLimit {
                        provider: "pair_aggregator",
                        retry_after: None,
                    },
                )
            } else {
                self.pairs.fetch_pair(&pair.pair_address, &pair.chain).await
            }
        };

        let chart_fut = async {
            if self.backoff.is_backed_off(ProviderId::Chart).await {
                let err = ProviderError::RateLimit {
                    provider: "chart",
                    retry_after: None,
                };
                (
                    ProviderResult::err(ProviderId::Chart, err.clone()),
                    ProviderResult::err(ProviderId::Chart, err),
                )
            } else {
                match self
                    .chart
                    .resolve_id(&pair.chain, &pair.token_address, &symbol_hint)
                    .await
                {
                    Ok(id) => {
                        tokio::join!(
                            self.chart.fetch_price(&id),
                            self.chart.fetch_price_series(&id, 1)
                        )
                    }
                    Err(e) => (
                        ProviderResult::err(ProviderId::Chart, e.clone()),
                        ProviderResult::err(ProviderId::Chart, e),
                    ),
                }
            }
        };

        let (tx_result, pair_result, (price_result, series_result)) =
            tokio::join!(ledger_fut, pairs_fut, chart_fut);

        if let Err(e) = &tx_result.outcome {
            warn!(provider = "trade_ledger", "provider failed: {e}");
            self.backoff.note(ProviderId::TradeLedger, e).await;
        }
        if let Err(e) = &pair_result.outcome {
            warn!(provider = "pair_aggregator", "provider failed: {e}");
            self.backoff.note(ProviderId::PairAggregator, e).await;
        }
        if let Err(e) = &price_result.outcome {
            warn!(provider = "chart", "provider failed: {e}");
            self.backoff.note(ProviderId::Chart, e).await;
        }

        let any_success = tx_result.is_success()
            || pair_result.is_success()
            || price_result.is_success()
            || series_result.is_success();
        if !any_success {
            warn!(seq, "all providers failed, retaining last-known state");
            self.state.mark_stale(seq, generation).await;
            return;
        }

        let last_known_price = self
            .last_snapshot
            .read()
            .await
            .as_ref()
            .map(|s| s.price_usd);
        let price = resolve_price(&price_result, &pair_result, last_known_price);
        let current_price = price.as_ref().and_then(|r| r.value.to_f64());

        // Transactions: dedupe, then widen once if the page looks truncated
        let mut txs = match tx_result.outcome {
            Ok(txs) => dedupe_by_hash(txs),
            Err(_) => Vec::new(),
        };
        if needs_widening(&txs, self.swap_fetch_limit, now_ms) {
            debug!(seq, "primary swap page truncated, widening to 24h");
            let extra = self
                .ledger
                .fetch_transactions(
                    &pair.token_address,
                    &pair.chain,
                    Some(WindowKey::D1),
                    self.swap_fetch_limit * 2,
                )
                .await;
            if let Ok(extra) = extra.outcome {
                txs = merge_pages(txs, extra);
            }
        }

        let mut windows = aggregate_windows(now_ms, &txs, current_price);

        let series = series_result.outcome.ok();
        let snapshot = pair_result.outcome.ok();
        let coarse_changes = snapshot.as_ref().map(|s| s.period_changes);
        for key in WindowKey::ALL {
            windows.get_mut(key).price_change_pct = resolve_price_change(
                key,
                series.as_deref(),
                coarse_changes.as_ref(),
                &txs,
                now_ms,
            )
            .map(|r| r.value);
        }

        let last = self.last_snapshot.read().await.clone();
        let inputs = SynthInputs {
            aggregator_volume_24h: snapshot
                .as_ref()
                .and_then(|s| s.volume_24h_usd)
                .or_else(|| last.as_ref().and_then(|s| s.volume_24h_usd)),
            token_volume_24h: price_result
                .outcome
                .as_ref()
                .ok()
                .and_then(|p| p.volume_24h_usd),
            liquidity_usd: snapshot
                .as_ref()
                .and_then(|s| s.liquidity_usd)
                .or_else(|| last.as_ref().and_then(|s| s.liquidity_usd)),
            price_usd: current_price.unwrap_or(0.0),
        };
        fill_missing(&mut windows, &inputs);

        let update = TickUpdate {
            price,
            price_native: snapshot.as_ref().and_then(|s| s.price_native),
            liquidity_usd: snapshot.as_ref().and_then(|s| s.liquidity_usd),
            windows: Some(windows),
        };

        if self.state.apply(seq, generation, update).await {
            if let Some(snapshot) = snapshot {
                *self.last_snapshot.write().await = Some(snapshot);
            }
            debug!(seq, "refresh published");
        } else {
            debug!(seq, "refresh superseded, discarded");
        }
    }
}
