use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::AppState;
use pair_data::state::{PanelSnapshot, PriceDelta};
use pair_data::types::{ActivePair, SourceHealth};

/// GET /pairs/snapshot - Current read model for the active pair
pub async fn get_snapshot(State(state): State<Arc<AppState>>) -> Json<SnapshotResponse> {
    let snapshot = state.engine.snapshot().await;
    Json(SnapshotResponse::from(snapshot))
}

/// PUT /pairs/active - Switch the observed pair; cancels in-flight work
/// for the previous one
pub async fn set_active_pair(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetPairRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    if req.pair_address.is_empty() || req.token_address.is_empty() || req.chain.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "pair_address, token_address and chain are required".to_string(),
        ));
    }

    info!("switching active pair to {}", req.pair_address);
    state
        .engine
        .set_active_pair(ActivePair {
            pair_address: req.pair_address,
            token_address: req.token_address,
            chain: req.chain,
        })
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /health - Service health check
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let sources = state.engine.data_sources();
    let healths =
        futures::future::join_all(sources.iter().map(|source| source.health())).await;

    let all_healthy = healths.iter().all(|h| h.is_healthy);

    Json(HealthResponse {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        sources: healths,
    })
}

// Request/response types

#[derive(Debug, serde::Deserialize)]
pub struct SetPairRequest {
    pub pair_address: String,
    pub token_address: String,
    pub chain: String,
}

#[derive(Debug, serde::Serialize)]
pub struct SnapshotResponse {
    pub status: String,
    pub pair_address: Option<String>,
    pub chain: Option<String>,
    pub price_usd: Option<rust_decimal::Decimal>,
    pub price_native: Option<rust_decimal::Decimal>,
    pub liquidity_usd: Option<f64>,
    pub windows: pair_data::types::WindowSet,
    pub price_provider: Option<pair_data::types::ProviderId>,
    pub price_delta: PriceDelta,
    pub stale: bool,
    pub last_updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<PanelSnapshot> for SnapshotResponse {
    fn from(snapshot: PanelSnapshot) -> Self {
        let status = match snapshot.status {
            pair_data::state::PanelStatus::Uninitialized => "uninitialized",
            pair_data::state::PanelStatus::Loading => "loading",
            pair_data::state::PanelStatus::Ready => "ready",
        };
        Self {
            status: status.to_string(),
            pair_address: snapshot.pair.as_ref().map(|p| p.pair_address.clone()),
            chain: snapshot.pair.as_ref().map(|p| p.chain.clone()),
            price_usd: snapshot.price_usd,
            price_native: snapshot.price_native,
            liquidity_usd: snapshot.liquidity_usd,
            windows: snapshot.windows,
            price_provider: snapshot.price_provider,
            price_delta: snapshot.price_delta,
            stale: snapshot.stale,
            last_updated_at: snapshot.last_updated_at,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sources: Vec<SourceHealth>,
}
