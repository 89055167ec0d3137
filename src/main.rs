use axum::{routing::get, routing::put, Router};
use pair_data::clock::PollingClock;
use pair_data::{AppConfig, PairDataEngine};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<PairDataEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    dotenvy::dotenv().ok();
    let cfg = AppConfig::from_env()?;

    info!("Starting Pair Data Service...");

    let engine = PairDataEngine::new(&cfg)?;
    info!("✓ Provider adapters initialized");

    // One shared wall-aligned clock drives every refresh cycle
    let mut clock = PollingClock::new(Duration::from_secs(cfg.poll_interval_secs));
    clock.start();
    tokio::spawn(Arc::clone(&engine).run(clock.subscribe()));
    info!(
        "✓ Polling clock started ({}s interval, wall-aligned)",
        cfg.poll_interval_secs
    );

    // Create app state
    let state = Arc::new(AppState { engine });

    // Build router
    let app = Router::new()
        .route("/pairs/snapshot", get(handlers::get_snapshot))
        .route("/pairs/active", put(handlers::set_active_pair))
        .route("/health", get(handlers::health_check))
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cfg.port)).await?;
    info!("🚀 Pair Data Service listening on port {}", cfg.port);

    // The clock task lives as long as the server
    let _clock = clock;
    axum::serve(listener, app).await?;

    Ok(())
}

mod handlers;
