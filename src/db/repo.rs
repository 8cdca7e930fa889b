// =============================================================================
// Typed Query Functions — one per persisted entity
// =============================================================================
//
// Thin wrappers around `sqlx::query_as!`-style calls (written without the
// compile-time macro so the crate can be read without a live database). Each
// function maps directly to one invariant in the data model: Ingestor is the
// only writer of Signal/WebhookEvent, SignalProcessor the only mutator of
// Signal's claim fields, Orchestrator the only writer of Experiment /
// ExecutionPolicy / TradeRecommendation, and so on.
// =============================================================================

use async_trait::async_trait;
use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::types::{
    Experiment, ExecutionPolicy, MarketContext, Order, OrderStatus, Position, PositionStatus,
    Signal, SignalStatus, Trade, TradeRecommendation, WebhookStatus,
};

/// Everything the ingestor needs to persist in one transaction.
pub struct NewSignal<'a> {
    pub id: Uuid,
    pub symbol: &'a str,
    pub direction: crate::types::Direction,
    pub timeframe: &'a str,
    pub source_timestamp: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
    pub signal_hash: &'a str,
    pub is_test: bool,
}

/// Insert a Signal (processed=false, processing_lock=false, status=pending)
/// and its accompanying accepted WebhookEvent in a single transaction.
pub async fn insert_signal_and_webhook_event(
    pool: &PgPool,
    signal: NewSignal<'_>,
    request_id: &str,
    processing_time_ms: i64,
) -> Result<Uuid, PipelineError> {
    let mut tx: Transaction<'_, Postgres> = pool.begin().await?;

    sqlx::query(
        "INSERT INTO signals (id, symbol, direction, timeframe, source_timestamp, raw_payload, \
         signal_hash, status, processed, processing_lock, processing_attempts, is_test) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', false, false, 0, $8)",
    )
    .bind(signal.id)
    .bind(signal.symbol)
    .bind(signal.direction)
    .bind(signal.timeframe)
    .bind(signal.source_timestamp)
    .bind(&signal.raw_payload)
    .bind(signal.signal_hash)
    .bind(signal.is_test)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO webhook_events (id, signal_id, status, request_id, processing_time_ms, raw_payload) \
         VALUES ($1, $2, 'accepted', $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(signal.id)
    .bind(request_id)
    .bind(processing_time_ms)
    .bind(&signal.raw_payload)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(signal.id)
}

/// Record a rejected webhook delivery (no Signal row created).
pub async fn insert_rejected_webhook_event(
    pool: &PgPool,
    status: WebhookStatus,
    request_id: &str,
    processing_time_ms: i64,
    error_message: Option<&str>,
    raw_payload: serde_json::Value,
) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO webhook_events (id, signal_id, status, request_id, processing_time_ms, \
         error_message, raw_payload) VALUES ($1, NULL, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(status)
    .bind(request_id)
    .bind(processing_time_ms)
    .bind(error_message)
    .bind(raw_payload)
    .execute(pool)
    .await?;
    Ok(())
}

/// True if a signal with this hash already exists within the dedup window,
/// or a webhook_event with status=accepted carries the same hash.
pub async fn is_duplicate_signal(
    pool: &PgPool,
    signal_hash: &str,
    dedup_window_secs: i64,
) -> Result<bool, PipelineError> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (
            SELECT 1 FROM signals
            WHERE signal_hash = $1 AND created_at > now() - ($2 || ' seconds')::interval
        )",
    )
    .bind(signal_hash)
    .bind(dedup_window_secs.to_string())
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Claim up to `limit` unlocked, unprocessed signals using SKIP LOCKED so
/// concurrent workers never see the same row. Returned ordered by source
/// timestamp ascending.
pub async fn claim_pending_signals(pool: &PgPool, limit: i64) -> Result<Vec<Signal>, PipelineError> {
    let mut tx: Transaction<'_, Postgres> = pool.begin().await?;

    let claimed: Vec<Signal> = sqlx::query_as(
        "WITH claimed AS (
            SELECT id FROM signals
            WHERE processed = false AND processing_lock = false
              AND (next_retry_at IS NULL OR next_retry_at <= now())
            ORDER BY source_timestamp ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE signals SET processing_lock = true
        WHERE id IN (SELECT id FROM claimed)
        RETURNING *",
    )
    .bind(limit)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(claimed)
}

/// Mark a signal processed with a final status, clearing the lock.
pub async fn release_signal_processed(
    pool: &PgPool,
    signal_id: Uuid,
    experiment_id: Option<Uuid>,
    status: SignalStatus,
    rejection_reason: Option<&str>,
) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE signals SET processing_lock = false, processed = true, experiment_id = $2, \
         status = $3, rejection_reason = $4 WHERE id = $1",
    )
    .bind(signal_id)
    .bind(experiment_id)
    .bind(status)
    .bind(rejection_reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// The worker-aware half of "provider-aware and worker-aware backoff": each
/// retry doubles off `base_delay_ms` for the attempt just made, capped at
/// `MAX_RETRY_DELAY_MS` so a signal stuck at high attempt counts still
/// retries within a bounded window rather than drifting out for hours.
/// Built on `backoff::ExponentialBackoff`'s own doubling rather than a
/// hand-rolled `2^n`. The provider-aware half lives in the market-data
/// multiplex's circuit-breaker fallback, which does not use this crate.
const MAX_RETRY_DELAY_MS: u64 = 5 * 60 * 1000;

pub fn attempt_retry_delay_ms(base_delay_ms: u64, attempts: i32) -> u64 {
    let mut backoff = backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(std::time::Duration::from_millis(base_delay_ms.max(1)))
        .with_multiplier(2.0)
        .with_randomization_factor(0.0)
        .with_max_interval(std::time::Duration::from_millis(MAX_RETRY_DELAY_MS))
        .with_max_elapsed_time(None)
        .build();

    let steps = attempts.max(1).saturating_sub(1).min(20);
    for _ in 0..steps {
        let _ = backoff.next_backoff();
    }
    backoff.current_interval.as_millis().min(MAX_RETRY_DELAY_MS as u128) as u64
}

/// Release a signal that failed this attempt: clear the lock, bump the
/// attempt counter, and either schedule a retry at an attempt-scaled delay
/// or terminally reject it.
pub async fn release_signal_failed(
    pool: &PgPool,
    signal_id: Uuid,
    max_attempts: i32,
    base_retry_delay_ms: u64,
) -> Result<(), PipelineError> {
    let row: (i32,) = sqlx::query_as(
        "UPDATE signals SET processing_lock = false, processing_attempts = processing_attempts + 1 \
         WHERE id = $1 RETURNING processing_attempts",
    )
    .bind(signal_id)
    .fetch_one(pool)
    .await?;

    if row.0 >= max_attempts {
        sqlx::query(
            "UPDATE signals SET processed = true, status = 'rejected', \
             rejection_reason = 'exhausted_retries' WHERE id = $1",
        )
        .bind(signal_id)
        .execute(pool)
        .await?;
    } else {
        let delay_ms = attempt_retry_delay_ms(base_retry_delay_ms, row.0);
        sqlx::query(
            "UPDATE signals SET next_retry_at = now() + ($2 || ' milliseconds')::interval \
             WHERE id = $1",
        )
        .bind(signal_id)
        .bind(delay_ms.to_string())
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn insert_market_context(pool: &PgPool, ctx: &MarketContext) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO market_contexts (id, signal_id, snapshot_timestamp, symbol, current_price, \
         bid, ask, volume, indicators, market_intel, context_hash) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(ctx.id)
    .bind(ctx.signal_id)
    .bind(ctx.snapshot_timestamp)
    .bind(&ctx.symbol)
    .bind(ctx.current_price)
    .bind(ctx.bid)
    .bind(ctx.ask)
    .bind(ctx.volume)
    .bind(serde_json::to_value(&ctx.indicators).unwrap_or_default())
    .bind(serde_json::to_value(&ctx.market_intel).unwrap_or_default())
    .bind(&ctx.context_hash)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_experiment(pool: &PgPool, experiment: &Experiment) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO experiments (id, signal_id, variant, assignment_hash, split_percentage, \
         policy_version) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(experiment.id)
    .bind(experiment.signal_id)
    .bind(experiment.variant)
    .bind(&experiment.assignment_hash)
    .bind(experiment.split_percentage)
    .bind(&experiment.policy_version)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_execution_policy(pool: &PgPool, policy: &ExecutionPolicy) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO execution_policies (id, experiment_id, execution_mode, executed_engine, \
         shadow_engine, reason) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(policy.id)
    .bind(policy.experiment_id)
    .bind(policy.execution_mode)
    .bind(policy.executed_engine)
    .bind(policy.shadow_engine)
    .bind(&policy.reason)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_trade_recommendation(
    pool: &PgPool,
    rec: &TradeRecommendation,
) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO decision_recommendations (id, experiment_id, engine, symbol, direction, \
         strike, expiration, quantity, entry_price, stop_loss, take_profit, is_shadow, \
         strategy_type, regime_at_entry, trend_phase_at_entry, high_acceleration_entry, \
         macro_class_at_entry) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
    )
    .bind(rec.id)
    .bind(rec.experiment_id)
    .bind(rec.engine)
    .bind(&rec.symbol)
    .bind(rec.direction)
    .bind(rec.strike)
    .bind(rec.expiration)
    .bind(rec.quantity)
    .bind(rec.entry_price)
    .bind(rec.stop_loss)
    .bind(rec.take_profit)
    .bind(rec.is_shadow)
    .bind(&rec.strategy_type)
    .bind(&rec.regime_at_entry)
    .bind(&rec.trend_phase_at_entry)
    .bind(rec.high_acceleration_entry)
    .bind(&rec.macro_class_at_entry)
    .execute(pool)
    .await?;
    Ok(())
}

/// A TradeRecommendation joined with the signal it was produced for, since
/// the order the recommendation results in needs the original signal_id.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingRecommendation {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub signal_id: Uuid,
    pub engine: crate::types::Variant,
    pub symbol: String,
    pub direction: crate::types::Direction,
    pub strike: f64,
    pub expiration: DateTime<Utc>,
    pub quantity: i32,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub is_shadow: bool,
    pub strategy_type: Option<String>,
    pub regime_at_entry: Option<String>,
    pub trend_phase_at_entry: Option<String>,
    pub high_acceleration_entry: bool,
    pub macro_class_at_entry: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// TradeRecommendation rows with is_shadow=false and no order created yet.
pub async fn find_executable_recommendations_without_order(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<PendingRecommendation>, PipelineError> {
    let rows: Vec<PendingRecommendation> = sqlx::query_as(
        "SELECT r.id, r.experiment_id, e.signal_id, r.engine, r.symbol, r.direction, r.strike, \
         r.expiration, r.quantity, r.entry_price, r.stop_loss, r.take_profit, r.is_shadow, \
         r.strategy_type, r.regime_at_entry, r.trend_phase_at_entry, r.high_acceleration_entry, \
         r.macro_class_at_entry, r.created_at
         FROM decision_recommendations r
         JOIN experiments e ON e.id = r.experiment_id
         LEFT JOIN orders o ON o.recommendation_id = r.id
         WHERE r.is_shadow = false AND o.id IS NULL
         ORDER BY r.created_at ASC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_order(pool: &PgPool, order: &Order) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO orders (id, signal_id, recommendation_id, option_symbol, strike, expiration, \
         option_type, quantity, order_type, status, engine, stop_loss, strategy_type, \
         regime_at_entry, trend_phase_at_entry, high_acceleration_entry, macro_class_at_entry) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
    )
    .bind(order.id)
    .bind(order.signal_id)
    .bind(order.recommendation_id)
    .bind(&order.option_symbol)
    .bind(order.strike)
    .bind(order.expiration)
    .bind(order.option_type)
    .bind(order.quantity)
    .bind(&order.order_type)
    .bind(order.status)
    .bind(order.engine)
    .bind(order.stop_loss)
    .bind(&order.strategy_type)
    .bind(&order.regime_at_entry)
    .bind(&order.trend_phase_at_entry)
    .bind(order.high_acceleration_entry)
    .bind(&order.macro_class_at_entry)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_pending_orders(pool: &PgPool, limit: i64) -> Result<Vec<Order>, PipelineError> {
    let rows: Vec<Order> = sqlx::query_as(
        "SELECT * FROM orders WHERE status = 'pending_execution' ORDER BY created_at ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn update_order_status(
    pool: &PgPool,
    order_id: Uuid,
    status: OrderStatus,
) -> Result<(), PipelineError> {
    sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
        .bind(order_id)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_trade_and_position(
    pool: &PgPool,
    trade: &Trade,
    position: &Position,
) -> Result<(), PipelineError> {
    let mut tx: Transaction<'_, Postgres> = pool.begin().await?;

    sqlx::query(
        "INSERT INTO trades (id, order_id, fill_price, quantity, filled_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(trade.id)
    .bind(trade.order_id)
    .bind(trade.fill_price)
    .bind(trade.quantity)
    .bind(trade.filled_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO positions (id, order_id, symbol, direction, entry_price, current_price, \
         quantity, unrealized_pnl, realized_pnl, status, macro_class_at_entry, strategy_type, \
         regime_at_entry, trend_phase_at_entry, high_acceleration_entry, stop_loss, \
         entry_bias_state, entry_timestamp) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
    )
    .bind(position.id)
    .bind(position.order_id)
    .bind(&position.symbol)
    .bind(position.direction)
    .bind(position.entry_price)
    .bind(position.current_price)
    .bind(position.quantity)
    .bind(position.unrealized_pnl)
    .bind(position.realized_pnl)
    .bind(position.status)
    .bind(&position.macro_class_at_entry)
    .bind(&position.strategy_type)
    .bind(&position.regime_at_entry)
    .bind(&position.trend_phase_at_entry)
    .bind(position.high_acceleration_entry)
    .bind(position.stop_loss)
    .bind(&position.entry_bias_state)
    .bind(position.entry_timestamp)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn find_open_positions(pool: &PgPool) -> Result<Vec<Position>, PipelineError> {
    let rows: Vec<Position> = sqlx::query_as("SELECT * FROM positions WHERE status = 'open'")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn update_position(
    pool: &PgPool,
    id: Uuid,
    current_price: f64,
    unrealized_pnl: f64,
    status: PositionStatus,
    exit_timestamp: Option<DateTime<Utc>>,
) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE positions SET current_price = $2, unrealized_pnl = $3, status = $4, \
         exit_timestamp = $5 WHERE id = $1",
    )
    .bind(id)
    .bind(current_price)
    .bind(unrealized_pnl)
    .bind(status)
    .bind(exit_timestamp)
    .execute(pool)
    .await?;
    Ok(())
}

/// Locks in `realized_pnl` and tags the rule that forced the exit. Used
/// instead of `update_position` only when exit_intelligence returns
/// `force_full_exit`; broker-side exit order placement is out of scope, so
/// this is the point at which a position's result becomes final for the
/// adaptive tuner's rolling statistics.
pub async fn close_position(
    pool: &PgPool,
    id: Uuid,
    current_price: f64,
    realized_pnl: f64,
    exit_reason: &str,
    exit_timestamp: DateTime<Utc>,
) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE positions SET current_price = $2, unrealized_pnl = 0, realized_pnl = $3, \
         status = 'closing', exit_reason = $4, exit_timestamp = $5 WHERE id = $1",
    )
    .bind(id)
    .bind(current_price)
    .bind(realized_pnl)
    .bind(exit_reason)
    .bind(exit_timestamp)
    .execute(pool)
    .await?;
    Ok(())
}

/// Rolling performance statistics the adaptive tuner draws its four bounded
/// parameter updates from, over positions closed within `lookback_days`.
#[derive(Debug, Clone, Default)]
pub struct RollingTradeStats {
    pub trade_count: i64,
    pub breakout_range_win_rate: Option<f64>,
    pub high_acceleration_avg_r: Option<f64>,
    pub macro_drift_exit_count: i64,
    pub macro_drift_exit_avg_r: Option<f64>,
    pub late_phase_avg_r: Option<f64>,
}

/// `r_multiple` is realized_pnl normalized by the initial risk in dollars
/// (|entry_price - stop_loss| * quantity); positions without a stop_loss
/// snapshot are excluded from every R-based average.
pub async fn compute_rolling_trade_stats(
    pool: &PgPool,
    lookback_days: i64,
) -> Result<RollingTradeStats, PipelineError> {
    let rows: Vec<(
        f64,
        f64,
        i32,
        Option<f64>,
        Option<String>,
        Option<String>,
        Option<String>,
        bool,
        Option<String>,
    )> = sqlx::query_as(
        "SELECT realized_pnl, entry_price, quantity, stop_loss, strategy_type, regime_at_entry, \
         trend_phase_at_entry, high_acceleration_entry, exit_reason
         FROM positions
         WHERE status IN ('closing', 'closed')
           AND exit_timestamp >= now() - ($1 || ' days')::interval",
    )
    .bind(lookback_days)
    .fetch_all(pool)
    .await?;

    let mut stats = RollingTradeStats {
        trade_count: rows.len() as i64,
        ..Default::default()
    };

    let mut breakout_range_wins = 0u32;
    let mut breakout_range_total = 0u32;
    let mut high_accel_r_sum = 0.0;
    let mut high_accel_r_count = 0u32;
    let mut macro_drift_r_sum = 0.0;
    let mut macro_drift_r_count = 0u32;
    let mut late_phase_r_sum = 0.0;
    let mut late_phase_r_count = 0u32;

    for (realized_pnl, entry_price, quantity, stop_loss, strategy_type, regime_at_entry, trend_phase_at_entry, high_acceleration_entry, exit_reason) in &rows {
        let r = stop_loss.map(|sl| {
            let risk = (entry_price - sl).abs().max(1e-9) * *quantity as f64;
            realized_pnl / risk
        });

        if strategy_type.as_deref() == Some("BREAKOUT") && regime_at_entry.as_deref() == Some("RANGE") {
            breakout_range_total += 1;
            if *realized_pnl > 0.0 {
                breakout_range_wins += 1;
            }
        }
        if *high_acceleration_entry {
            if let Some(r) = r {
                high_accel_r_sum += r;
                high_accel_r_count += 1;
            }
        }
        if exit_reason.as_deref() == Some("MACRO_DRIFT_EXIT_PRESSURE") {
            stats.macro_drift_exit_count += 1;
            if let Some(r) = r {
                macro_drift_r_sum += r;
                macro_drift_r_count += 1;
            }
        }
        if trend_phase_at_entry.as_deref() == Some("LATE") {
            if let Some(r) = r {
                late_phase_r_sum += r;
                late_phase_r_count += 1;
            }
        }
    }

    if breakout_range_total > 0 {
        stats.breakout_range_win_rate = Some(breakout_range_wins as f64 / breakout_range_total as f64);
    }
    if high_accel_r_count > 0 {
        stats.high_acceleration_avg_r = Some(high_accel_r_sum / high_accel_r_count as f64);
    }
    if macro_drift_r_count > 0 {
        stats.macro_drift_exit_avg_r = Some(macro_drift_r_sum / macro_drift_r_count as f64);
    }
    if late_phase_r_count > 0 {
        stats.late_phase_avg_r = Some(late_phase_r_sum / late_phase_r_count as f64);
    }

    Ok(stats)
}

pub async fn load_bias_config(pool: &PgPool, key: &str) -> Result<Option<serde_json::Value>, PipelineError> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT document FROM bias_config WHERE config_key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|r| r.0))
}

pub async fn save_bias_config(
    pool: &PgPool,
    key: &str,
    document: &serde_json::Value,
) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO bias_config (config_key, document, updated_at) VALUES ($1, $2, now()) \
         ON CONFLICT (config_key) DO UPDATE SET document = EXCLUDED.document, updated_at = now()",
    )
    .bind(key)
    .bind(document)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_adaptive_history_row(
    pool: &PgPool,
    config_key: &str,
    parameter: &str,
    previous_value: f64,
    new_value: f64,
    rationale: &str,
) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO bias_adaptive_config_history \
         (id, config_key, parameter, previous_value, new_value, rationale) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(config_key)
    .bind(parameter)
    .bind(previous_value)
    .bind(new_value)
    .bind(rationale)
    .execute(pool)
    .await?;
    Ok(())
}

// =============================================================================
// Feature flags
// =============================================================================

/// All feature flags, read-mostly with a periodic refresh from storage.
pub async fn list_feature_flags(pool: &PgPool) -> Result<Vec<(String, bool)>, PipelineError> {
    let rows: Vec<(String, bool)> =
        sqlx::query_as("SELECT name, enabled FROM feature_flags ORDER BY name")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

pub async fn set_feature_flag(pool: &PgPool, name: &str, enabled: bool) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO feature_flags (name, enabled, updated_at) VALUES ($1, $2, now()) \
         ON CONFLICT (name) DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = now()",
    )
    .bind(name)
    .bind(enabled)
    .execute(pool)
    .await?;
    Ok(())
}

// =============================================================================
// Event log
// =============================================================================

pub async fn insert_event_log(
    pool: &PgPool,
    level: &str,
    message: &str,
    context: Option<serde_json::Value>,
) -> Result<(), PipelineError> {
    sqlx::query("INSERT INTO event_logs (id, level, message, context) VALUES ($1, $2, $3, $4)")
        .bind(Uuid::new_v4())
        .bind(level)
        .bind(message)
        .bind(context)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventLogRow {
    pub id: Uuid,
    pub level: String,
    pub message: String,
    pub context: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

pub async fn recent_event_logs(pool: &PgPool, limit: i64) -> Result<Vec<EventLogRow>, PipelineError> {
    let rows: Vec<EventLogRow> = sqlx::query_as(
        "SELECT id, level, message, context, created_at FROM event_logs ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// =============================================================================
// Monitoring: 24h pipeline counters, recent events, per-engine metrics
// =============================================================================

/// Count of rows grouped by a text status column created within the last
/// `window_hours`. Shared by the three counter queries below since the shape
/// is identical across signals/orders/webhook_events.
async fn count_by_status_since(
    pool: &PgPool,
    table: &str,
    window_hours: i64,
) -> Result<Vec<(String, i64)>, PipelineError> {
    let query = format!(
        "SELECT status, COUNT(*) FROM {table} \
         WHERE created_at >= now() - ($1 || ' hours')::interval \
         GROUP BY status"
    );
    let rows: Vec<(String, i64)> = sqlx::query_as(&query)
        .bind(window_hours.to_string())
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn signal_counts_by_status(pool: &PgPool, window_hours: i64) -> Result<Vec<(String, i64)>, PipelineError> {
    count_by_status_since(pool, "signals", window_hours).await
}

pub async fn order_counts_by_status(pool: &PgPool, window_hours: i64) -> Result<Vec<(String, i64)>, PipelineError> {
    count_by_status_since(pool, "orders", window_hours).await
}

pub async fn webhook_counts_by_status(pool: &PgPool, window_hours: i64) -> Result<Vec<(String, i64)>, PipelineError> {
    count_by_status_since(pool, "webhook_events", window_hours).await
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineDecisionMetrics {
    pub engine: String,
    pub recommendation_count: i64,
    pub executed_count: i64,
    pub shadow_count: i64,
}

/// One row per engine: how many recommendations it produced in the window,
/// split by whether the recommendation ran live or shadow.
pub async fn engine_decision_metrics(
    pool: &PgPool,
    window_hours: i64,
) -> Result<Vec<EngineDecisionMetrics>, PipelineError> {
    let rows: Vec<(String, bool, i64)> = sqlx::query_as(
        "SELECT engine, is_shadow, COUNT(*) FROM decision_recommendations \
         WHERE created_at >= now() - ($1 || ' hours')::interval \
         GROUP BY engine, is_shadow",
    )
    .bind(window_hours.to_string())
    .fetch_all(pool)
    .await?;

    let mut by_engine: std::collections::BTreeMap<String, EngineDecisionMetrics> = std::collections::BTreeMap::new();
    for (engine, is_shadow, count) in rows {
        let entry = by_engine.entry(engine.clone()).or_insert_with(|| EngineDecisionMetrics {
            engine,
            ..Default::default()
        });
        entry.recommendation_count += count;
        if is_shadow {
            entry.shadow_count += count;
        } else {
            entry.executed_count += count;
        }
    }
    Ok(by_engine.into_values().collect())
}

/// A single signal's full audit trail: webhook delivery, enrichment,
/// engine decisions, and its terminal status/rejection reason.
#[derive(Debug, Clone, Serialize)]
pub struct SignalAudit {
    pub signal: Signal,
    pub webhook_events: Vec<WebhookEventRow>,
    pub market_context: Option<MarketContext>,
    pub recommendations: Vec<TradeRecommendation>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WebhookEventRow {
    pub id: Uuid,
    pub status: crate::types::WebhookStatus,
    pub request_id: String,
    pub processing_time_ms: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn find_signal_audit(pool: &PgPool, signal_id: Uuid) -> Result<Option<SignalAudit>, PipelineError> {
    let signal: Option<Signal> = sqlx::query_as("SELECT * FROM signals WHERE id = $1")
        .bind(signal_id)
        .fetch_optional(pool)
        .await?;
    let signal = match signal {
        Some(s) => s,
        None => return Ok(None),
    };

    let webhook_events: Vec<WebhookEventRow> = sqlx::query_as(
        "SELECT id, status, request_id, processing_time_ms, error_message, created_at \
         FROM webhook_events WHERE signal_id = $1 ORDER BY created_at ASC",
    )
    .bind(signal_id)
    .fetch_all(pool)
    .await?;

    let context_row: Option<(
        Uuid,
        Uuid,
        DateTime<Utc>,
        String,
        f64,
        f64,
        f64,
        f64,
        serde_json::Value,
        Option<serde_json::Value>,
        String,
    )> = sqlx::query_as(
        "SELECT id, signal_id, snapshot_timestamp, symbol, current_price, bid, ask, volume, \
         indicators, market_intel, context_hash FROM market_contexts WHERE signal_id = $1",
    )
    .bind(signal_id)
    .fetch_optional(pool)
    .await?;
    let market_context = context_row.map(
        |(id, signal_id, snapshot_timestamp, symbol, current_price, bid, ask, volume, indicators, market_intel, context_hash)| {
            MarketContext {
                id,
                signal_id,
                snapshot_timestamp,
                symbol,
                current_price,
                bid,
                ask,
                volume,
                indicators: serde_json::from_value(indicators).unwrap_or_default(),
                market_intel: market_intel.and_then(|v| serde_json::from_value(v).ok()),
                context_hash,
            }
        },
    );

    let recommendations: Vec<TradeRecommendation> = sqlx::query_as(
        "SELECT r.* FROM decision_recommendations r \
         JOIN experiments e ON e.id = r.experiment_id \
         WHERE e.signal_id = $1 ORDER BY r.created_at ASC",
    )
    .bind(signal_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(SignalAudit {
        signal,
        webhook_events,
        market_context,
        recommendations,
    }))
}

pub async fn recent_signals(pool: &PgPool, limit: i64) -> Result<Vec<Signal>, PipelineError> {
    let rows: Vec<Signal> = sqlx::query_as("SELECT * FROM signals ORDER BY created_at DESC LIMIT $1")
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

// =============================================================================
// Repository trait + in-memory fake for unit tests
// =============================================================================

/// Narrow slice of signal-claiming behavior used by the signal processor,
/// abstracted so worker logic can be unit tested without a live database.
#[async_trait]
pub trait SignalRepo: Send + Sync {
    async fn claim_pending(&self, limit: i64) -> Result<Vec<Signal>, PipelineError>;
    async fn release_processed(
        &self,
        signal_id: Uuid,
        experiment_id: Option<Uuid>,
        status: SignalStatus,
        rejection_reason: Option<String>,
    ) -> Result<(), PipelineError>;
    async fn release_failed(
        &self,
        signal_id: Uuid,
        max_attempts: i32,
        base_retry_delay_ms: u64,
    ) -> Result<(), PipelineError>;
}

#[async_trait]
impl SignalRepo for PgPool {
    async fn claim_pending(&self, limit: i64) -> Result<Vec<Signal>, PipelineError> {
        claim_pending_signals(self, limit).await
    }

    async fn release_processed(
        &self,
        signal_id: Uuid,
        experiment_id: Option<Uuid>,
        status: SignalStatus,
        rejection_reason: Option<String>,
    ) -> Result<(), PipelineError> {
        release_signal_processed(self, signal_id, experiment_id, status, rejection_reason.as_deref()).await
    }

    async fn release_failed(
        &self,
        signal_id: Uuid,
        max_attempts: i32,
        base_retry_delay_ms: u64,
    ) -> Result<(), PipelineError> {
        release_signal_failed(self, signal_id, max_attempts, base_retry_delay_ms).await
    }
}

/// Fully in-memory double for `SignalRepo`, used by worker unit tests that
/// need a claim/release protocol without a Postgres instance.
#[derive(Default)]
pub struct FakeSignalRepo {
    pub signals: parking_lot::Mutex<Vec<Signal>>,
}

#[async_trait]
impl SignalRepo for FakeSignalRepo {
    async fn claim_pending(&self, limit: i64) -> Result<Vec<Signal>, PipelineError> {
        let mut signals = self.signals.lock();
        let mut claimed = Vec::new();
        for signal in signals.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if !signal.processed && !signal.processing_lock {
                signal.processing_lock = true;
                claimed.push(signal.clone());
            }
        }
        claimed.sort_by_key(|s| s.source_timestamp);
        Ok(claimed)
    }

    async fn release_processed(
        &self,
        signal_id: Uuid,
        experiment_id: Option<Uuid>,
        status: SignalStatus,
        rejection_reason: Option<String>,
    ) -> Result<(), PipelineError> {
        let mut signals = self.signals.lock();
        if let Some(signal) = signals.iter_mut().find(|s| s.id == signal_id) {
            signal.processing_lock = false;
            signal.processed = true;
            signal.experiment_id = experiment_id;
            signal.status = status;
            signal.rejection_reason = rejection_reason;
        }
        Ok(())
    }

    async fn release_failed(
        &self,
        signal_id: Uuid,
        max_attempts: i32,
        base_retry_delay_ms: u64,
    ) -> Result<(), PipelineError> {
        let mut signals = self.signals.lock();
        if let Some(signal) = signals.iter_mut().find(|s| s.id == signal_id) {
            signal.processing_lock = false;
            signal.processing_attempts += 1;
            if signal.processing_attempts >= max_attempts {
                signal.processed = true;
                signal.status = SignalStatus::Rejected;
                signal.rejection_reason = Some("exhausted_retries".to_string());
            } else {
                let delay_ms = attempt_retry_delay_ms(base_retry_delay_ms, signal.processing_attempts);
                signal.next_retry_at = Some(Utc::now() + chrono::Duration::milliseconds(delay_ms as i64));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn unclaimed_signal(ts_offset_secs: i64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: "SPY".to_string(),
            direction: crate::types::Direction::Long,
            timeframe: "5m".to_string(),
            source_timestamp: Utc::now() + chrono::Duration::seconds(ts_offset_secs),
            raw_payload: serde_json::json!({}),
            signal_hash: format!("hash-{ts_offset_secs}"),
            status: SignalStatus::Pending,
            processed: false,
            processing_lock: false,
            processing_attempts: 0,
            next_retry_at: None,
            experiment_id: None,
            rejection_reason: None,
            is_test: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fake_repo_claims_in_source_timestamp_order() {
        let repo = FakeSignalRepo::default();
        {
            let mut signals = repo.signals.lock();
            signals.push(unclaimed_signal(10));
            signals.push(unclaimed_signal(-10));
        }
        let claimed = repo.claim_pending(10).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed[0].source_timestamp < claimed[1].source_timestamp);
    }

    #[tokio::test]
    async fn fake_repo_never_double_claims() {
        let repo = FakeSignalRepo::default();
        repo.signals.lock().push(unclaimed_signal(0));
        let first = repo.claim_pending(10).await.unwrap();
        let second = repo.claim_pending(10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
    }

    #[tokio::test]
    async fn release_failed_exhausts_after_max_attempts() {
        let repo = FakeSignalRepo::default();
        let id = {
            let mut s = unclaimed_signal(0);
            s.processing_lock = true;
            s.processing_attempts = 4;
            let id = s.id;
            repo.signals.lock().push(s);
            id
        };
        repo.release_failed(id, 5, 1_000).await.unwrap();
        let signals = repo.signals.lock();
        let signal = signals.iter().find(|s| s.id == id).unwrap();
        assert!(signal.processed);
        assert_eq!(signal.rejection_reason.as_deref(), Some("exhausted_retries"));
    }

    #[tokio::test]
    async fn release_failed_schedules_an_increasing_retry_delay() {
        let repo = FakeSignalRepo::default();
        let id = {
            let mut s = unclaimed_signal(0);
            s.processing_lock = true;
            s.processing_attempts = 0;
            let id = s.id;
            repo.signals.lock().push(s);
            id
        };

        repo.release_failed(id, 10, 1_000).await.unwrap();
        let first_retry_at = {
            let signals = repo.signals.lock();
            signals.iter().find(|s| s.id == id).unwrap().next_retry_at.unwrap()
        };

        repo.release_failed(id, 10, 1_000).await.unwrap();
        let second_retry_at = {
            let signals = repo.signals.lock();
            signals.iter().find(|s| s.id == id).unwrap().next_retry_at.unwrap()
        };

        assert!(
            second_retry_at - Utc::now() > first_retry_at - Utc::now(),
            "later attempts should back off further"
        );
    }

    #[test]
    fn attempt_retry_delay_doubles_and_caps() {
        let first = attempt_retry_delay_ms(1_000, 1);
        let second = attempt_retry_delay_ms(1_000, 2);
        assert_eq!(first, 1_000);
        assert!(second >= 2_000, "second attempt should roughly double");
        let capped = attempt_retry_delay_ms(1_000, 20);
        assert!(capped <= MAX_RETRY_DELAY_MS);
    }
}
