// =============================================================================
// Zephyr Perp Engine — main entry point
// =============================================================================
//
// The engine starts STOPPED: trading begins only after POST /api/start (or
// with ZEPHYR_AUTOSTART=1 for unattended deployments).
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod api;
mod config;
mod engine;
mod events;
mod exchange;
mod indicators;
mod market_data;
mod order;
mod risk;
mod sched;
mod signal;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BotConfig;
use crate::engine::Engine;
use crate::exchange::binance::BinanceFuturesClient;

const CONFIG_PATH: &str = "zephyr_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Zephyr Perp Engine starting up");

    let mut config = BotConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config — using defaults");
        BotConfig::default()
    });

    // Watchlist override from the environment (the symbol-selection service
    // writes it there).
    if let Ok(symbols) = std::env::var("ZEPHYR_SYMBOLS") {
        config.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    info!(
        symbols = ?config.symbols,
        ltf = %config.ltf_interval,
        htf = %config.htf_interval,
        "configured watchlist"
    );

    // ── 2. Exchange client ───────────────────────────────────────────────
    let api_key = std::env::var("ZEPHYR_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("ZEPHYR_API_SECRET").unwrap_or_default();
    if api_key.is_empty() || api_secret.is_empty() {
        warn!("exchange credentials missing — signed endpoints will fail");
    }
    let client = Arc::new(BinanceFuturesClient::new(api_key, api_secret));

    // ── 3. Engine & control surface ──────────────────────────────────────
    let engine = Engine::new(config.clone(), client);

    let bind_addr = std::env::var("ZEPHYR_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let app = api::rest::router(engine.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "control API listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "control API server failed");
        }
    });

    // ── 4. Optional auto-start ───────────────────────────────────────────
    if std::env::var("ZEPHYR_AUTOSTART").map(|v| v == "1").unwrap_or(false) {
        info!("ZEPHYR_AUTOSTART set — starting trading immediately");
        engine.start_trading().await?;
    } else {
        info!("engine idle — POST /api/start to begin trading");
    }

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");
    engine.stop_trading(Some("process shutdown".into())).await;

    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("Zephyr Perp Engine shut down complete");
    Ok(())
}
