// =============================================================================
// Meridian Signal Engine — Main Entry Point
// =============================================================================
//
// Starts the HTTP API (webhook ingestion + monitoring), runs schema
// migration, then spawns the background worker loops that carry a signal
// from ingestion through enrichment, orchestration, order creation, paper
// execution, and position refresh. Every loop logs and records its own
// errors into the shared error tracker rather than unwinding the process.
// =============================================================================

mod adaptive_tuner;
mod api;
mod app_state;
mod bias;
mod db;
mod engines;
mod error;
mod exit_intelligence;
mod experiment;
mod indicators;
mod ingest;
mod market_data;
mod orchestrator;
mod portfolio_guard;
mod risk_model;
mod runtime_config;
mod setup_validator;
mod types;
mod workers;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::bias::store::BiasStateStore;
use crate::engines::engine_a::EngineA;
use crate::engines::engine_b::EngineB;
use crate::engines::EngineInvoker;
use crate::market_data::providers::alpaca::AlpacaProvider;
use crate::market_data::providers::marketdata_app::MarketDataAppProvider;
use crate::market_data::providers::polygon::PolygonProvider;
use crate::market_data::providers::twelvedata::TwelveDataProvider;
use crate::market_data::providers::unusual_whales::UnusualWhalesProvider;
use crate::market_data::{MarketDataMultiplex, MarketDataProvider};
use crate::orchestrator::Orchestrator;
use crate::risk_model::RiskConfig;
use crate::runtime_config::RuntimeConfig;
use crate::workers::order_creator::OrderCreator;
use crate::workers::paper_executor::PaperExecutor;
use crate::workers::position_refresher::PositionRefresher;
use crate::workers::signal_processor::SignalProcessor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("meridian-signal-engine starting up");

    let config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    info!(
        execution_mode = ?config.execution_mode,
        policy_version = %config.policy_version,
        "runtime config loaded"
    );

    // ── Database ──────────────────────────────────────────────────────────
    let connection_string = if config.db_connection_string.is_empty() {
        std::env::var("DATABASE_URL").unwrap_or_default()
    } else {
        config.db_connection_string.clone()
    };
    let pool = db::connect(&connection_string, config.db_pool_max).await?;
    db::migrate(&pool).await?;
    info!("database connected and schema migrated");

    // ── Market-data multiplex ─────────────────────────────────────────────
    let providers = build_provider_priority(&config.market_data_provider_priority);
    let market_data = Arc::new(MarketDataMultiplex::new(providers));

    // ── Bias-state aggregator ─────────────────────────────────────────────
    let bias_store = Arc::new(BiasStateStore::new());

    // ── Shared app state ──────────────────────────────────────────────────
    let state = Arc::new(AppState::new(pool.clone(), bias_store.clone(), market_data.clone(), config.clone()));
    state.refresh_feature_flags().await.unwrap_or_else(|e| {
        warn!(error = %e, "initial feature-flag load failed, starting with an empty cache");
    });

    // ── Orchestrator (engine A/B side by side) ───────────────────────────
    let risk_config = load_risk_config(&pool).await;
    let engine_a: Arc<dyn EngineInvoker> = Arc::new(EngineA::new(risk_config));
    let engine_b: Arc<dyn EngineInvoker> = Arc::new(EngineB);
    let orchestrator = Arc::new(Orchestrator {
        pool: pool.clone(),
        bias_store: bias_store.clone(),
        engine_a,
        engine_b,
    });

    // ── API server ────────────────────────────────────────────────────────
    let bind_addr = std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── Feature-flag refresh loop ─────────────────────────────────────────
    {
        let flag_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                interval.tick().await;
                if let Err(e) = flag_state.refresh_feature_flags().await {
                    flag_state.push_error_with_code(Some(e.reason_code()), format!("feature flag refresh: {e}"));
                }
            }
        });
    }

    // ── Signal processor loop ─────────────────────────────────────────────
    {
        let processor = SignalProcessor {
            pool: pool.clone(),
            repo: Arc::new(pool.clone()),
            market_data: market_data.clone(),
            orchestrator: orchestrator.clone(),
        };
        let proc_state = state.clone();
        let proc_config = state.runtime_config.read().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(
                proc_config.orchestrator_retry_delay_ms.max(500),
            ));
            loop {
                interval.tick().await;
                let config = proc_state.runtime_config.read().clone();
                match processor.run_batch(&config).await {
                    Ok(n) if n > 0 => info!(count = n, "signal batch processed"),
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "signal processor batch failed");
                        proc_state.push_error_with_code(Some(e.reason_code()), format!("signal processor: {e}"));
                    }
                }
            }
        });
    }

    // ── Order creator loop ────────────────────────────────────────────────
    {
        let creator = OrderCreator { pool: pool.clone() };
        let creator_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(2));
            loop {
                interval.tick().await;
                match creator.run_batch(50).await {
                    Ok(n) if n > 0 => info!(count = n, "orders created"),
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "order creator batch failed");
                        creator_state.push_error_with_code(Some(e.reason_code()), format!("order creator: {e}"));
                    }
                }
            }
        });
    }

    // ── Paper executor loop ───────────────────────────────────────────────
    {
        let executor = PaperExecutor {
            pool: pool.clone(),
            market_data: market_data.clone(),
            bias_store: bias_store.clone(),
        };
        let exec_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(2));
            loop {
                interval.tick().await;
                match executor.run_batch(50).await {
                    Ok(n) if n > 0 => info!(count = n, "orders filled"),
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "paper executor batch failed");
                        exec_state.push_error_with_code(Some(e.reason_code()), format!("paper executor: {e}"));
                    }
                }
            }
        });
    }

    // ── Position refresher loop ───────────────────────────────────────────
    {
        let refresher = PositionRefresher {
            pool: pool.clone(),
            market_data: market_data.clone(),
            bias_store: bias_store.clone(),
        };
        let refresher_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
            loop {
                interval.tick().await;
                match refresher.run_once().await {
                    Ok(n) if n > 0 => info!(count = n, "positions refreshed"),
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "position refresher pass failed");
                        refresher_state.push_error_with_code(Some(e.reason_code()), format!("position refresher: {e}"));
                    }
                }
            }
        });
    }

    // ── Adaptive tuner daily loop ──────────────────────────────────────────
    {
        let tuner = adaptive_tuner::AdaptiveTuner {
            pool: pool.clone(),
            lookback_days: 30,
        };
        let tuner_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let config = tuner_state.runtime_config.read().clone();
                match tuner.run(&config, false).await {
                    Ok(report) if report.ran => info!(?report, "adaptive tuner ran"),
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "adaptive tuner pass failed");
                        tuner_state.push_error_with_code(Some(e.reason_code()), format!("adaptive tuner: {e}"));
                    }
                }
            }
        });
    }

    info!("all subsystems running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    if let Err(e) = state.runtime_config.read().save("runtime_config.json") {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("meridian-signal-engine shut down complete");
    Ok(())
}

fn build_provider_priority(names: &[String]) -> Vec<Arc<dyn MarketDataProvider>> {
    let mut providers: Vec<Arc<dyn MarketDataProvider>> = Vec::new();
    for name in names {
        match name.as_str() {
            "alpaca" => {
                let key = std::env::var("ALPACA_API_KEY").unwrap_or_default();
                let secret = std::env::var("ALPACA_API_SECRET").unwrap_or_default();
                providers.push(Arc::new(AlpacaProvider::new(key, secret)));
            }
            "polygon" => {
                let key = std::env::var("POLYGON_API_KEY").unwrap_or_default();
                providers.push(Arc::new(PolygonProvider::new(key)));
            }
            "marketdata" => {
                let token = std::env::var("MARKETDATA_APP_TOKEN").unwrap_or_default();
                providers.push(Arc::new(MarketDataAppProvider::new(token)));
            }
            "twelvedata" => {
                let key = std::env::var("TWELVEDATA_API_KEY").unwrap_or_default();
                providers.push(Arc::new(TwelveDataProvider::new(key)));
            }
            "unusualwhales" => {
                let token = std::env::var("UNUSUAL_WHALES_TOKEN").unwrap_or_default();
                providers.push(Arc::new(UnusualWhalesProvider::new(token)));
            }
            other => warn!(provider = %other, "unknown market data provider in priority list, skipping"),
        }
    }
    providers
}

async fn load_risk_config(pool: &sqlx::PgPool) -> RiskConfig {
    match db::repo::load_bias_config(pool, "risk").await {
        Ok(Some(doc)) => serde_json::from_value(doc).unwrap_or_else(|e| {
            warn!(error = %e, "corrupt risk config document, using defaults");
            RiskConfig::default()
        }),
        Ok(None) => RiskConfig::default(),
        Err(e) => {
            warn!(error = %e, "failed to load risk config, using defaults");
            RiskConfig::default()
        }
    }
}
