// =============================================================================
// Database — connection pool and schema migration
// =============================================================================
//
// Postgres via sqlx. The pool is constructed once at startup and shared
// through `AppState`; migrations run idempotently (`CREATE TABLE IF NOT
// EXISTS`) so the process can start against an already-migrated database
// without a separate migration step.
// =============================================================================

pub mod repo;

use sqlx::postgres::{PgPoolOptions, PgPool};

use crate::error::PipelineError;

pub async fn connect(connection_string: &str, pool_max: u32) -> Result<PgPool, PipelineError> {
    PgPoolOptions::new()
        .max_connections(pool_max)
        .connect(connection_string)
        .await
        .map_err(PipelineError::Database)
}

/// Idempotent schema setup. Safe to run on every startup.
pub async fn migrate(pool: &PgPool) -> Result<(), PipelineError> {
    sqlx::query(SCHEMA).execute(pool).await?;
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    id UUID PRIMARY KEY,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    source_timestamp TIMESTAMPTZ NOT NULL,
    raw_payload JSONB NOT NULL,
    signal_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    processed BOOLEAN NOT NULL DEFAULT FALSE,
    processing_lock BOOLEAN NOT NULL DEFAULT FALSE,
    processing_attempts INTEGER NOT NULL DEFAULT 0,
    next_retry_at TIMESTAMPTZ,
    experiment_id UUID,
    rejection_reason TEXT,
    is_test BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_signals_status_created_at ON signals(status, created_at);
CREATE INDEX IF NOT EXISTS idx_signals_hash ON signals(signal_hash);

CREATE TABLE IF NOT EXISTS webhook_events (
    id UUID PRIMARY KEY,
    signal_id UUID,
    status TEXT NOT NULL,
    request_id TEXT NOT NULL,
    processing_time_ms BIGINT NOT NULL,
    error_message TEXT,
    raw_payload JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_webhook_events_created_at_status ON webhook_events(created_at, status);

CREATE TABLE IF NOT EXISTS market_contexts (
    id UUID PRIMARY KEY,
    signal_id UUID NOT NULL,
    snapshot_timestamp TIMESTAMPTZ NOT NULL,
    symbol TEXT NOT NULL,
    current_price DOUBLE PRECISION NOT NULL,
    bid DOUBLE PRECISION NOT NULL,
    ask DOUBLE PRECISION NOT NULL,
    volume DOUBLE PRECISION NOT NULL,
    indicators JSONB NOT NULL,
    market_intel JSONB,
    context_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS experiments (
    id UUID PRIMARY KEY,
    signal_id UUID NOT NULL,
    variant TEXT NOT NULL,
    assignment_hash TEXT NOT NULL,
    split_percentage DOUBLE PRECISION NOT NULL,
    policy_version TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_experiments_signal_id ON experiments(signal_id);

CREATE TABLE IF NOT EXISTS execution_policies (
    id UUID PRIMARY KEY,
    experiment_id UUID NOT NULL,
    execution_mode TEXT NOT NULL,
    executed_engine TEXT,
    shadow_engine TEXT,
    reason TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS decision_recommendations (
    id UUID PRIMARY KEY,
    experiment_id UUID NOT NULL,
    engine TEXT NOT NULL,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    strike DOUBLE PRECISION NOT NULL,
    expiration TIMESTAMPTZ NOT NULL,
    quantity INTEGER NOT NULL,
    entry_price DOUBLE PRECISION NOT NULL,
    stop_loss DOUBLE PRECISION,
    take_profit DOUBLE PRECISION,
    is_shadow BOOLEAN NOT NULL,
    strategy_type TEXT,
    regime_at_entry TEXT,
    trend_phase_at_entry TEXT,
    high_acceleration_entry BOOLEAN NOT NULL DEFAULT FALSE,
    macro_class_at_entry TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (experiment_id, engine)
);

CREATE TABLE IF NOT EXISTS orders (
    id UUID PRIMARY KEY,
    signal_id UUID NOT NULL,
    recommendation_id UUID NOT NULL,
    option_symbol TEXT NOT NULL,
    strike DOUBLE PRECISION NOT NULL,
    expiration TIMESTAMPTZ NOT NULL,
    option_type TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    order_type TEXT NOT NULL,
    status TEXT NOT NULL,
    engine TEXT NOT NULL,
    stop_loss DOUBLE PRECISION,
    strategy_type TEXT,
    regime_at_entry TEXT,
    trend_phase_at_entry TEXT,
    high_acceleration_entry BOOLEAN NOT NULL DEFAULT FALSE,
    macro_class_at_entry TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_orders_signal_id ON orders(signal_id);
CREATE INDEX IF NOT EXISTS idx_orders_status_created_at ON orders(status, created_at);

CREATE TABLE IF NOT EXISTS trades (
    id UUID PRIMARY KEY,
    order_id UUID NOT NULL,
    fill_price DOUBLE PRECISION NOT NULL,
    quantity INTEGER NOT NULL,
    filled_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS positions (
    id UUID PRIMARY KEY,
    order_id UUID NOT NULL,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    entry_price DOUBLE PRECISION NOT NULL,
    current_price DOUBLE PRECISION NOT NULL,
    quantity INTEGER NOT NULL,
    unrealized_pnl DOUBLE PRECISION NOT NULL DEFAULT 0,
    realized_pnl DOUBLE PRECISION NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    macro_class_at_entry TEXT,
    strategy_type TEXT,
    regime_at_entry TEXT,
    trend_phase_at_entry TEXT,
    high_acceleration_entry BOOLEAN NOT NULL DEFAULT FALSE,
    stop_loss DOUBLE PRECISION,
    exit_reason TEXT,
    entry_bias_state JSONB,
    entry_timestamp TIMESTAMPTZ NOT NULL,
    exit_timestamp TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS bias_config (
    config_key TEXT PRIMARY KEY,
    document JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS bias_adaptive_config_history (
    id UUID PRIMARY KEY,
    config_key TEXT NOT NULL,
    parameter TEXT NOT NULL,
    previous_value DOUBLE PRECISION NOT NULL,
    new_value DOUBLE PRECISION NOT NULL,
    rationale TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS feature_flags (
    name TEXT PRIMARY KEY,
    enabled BOOLEAN NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS event_logs (
    id UUID PRIMARY KEY,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    context JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;
