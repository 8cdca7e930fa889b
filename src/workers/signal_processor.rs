// =============================================================================
// Signal Processor Worker
// =============================================================================
//
// Claims pending signals (skip-locked, source-timestamp order), enriches
// each with market data, hands it to the orchestrator, and releases it with
// either a terminal status or a scheduled retry.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::repo::{self, SignalRepo};
use crate::error::PipelineError;
use crate::market_data::MarketDataMultiplex;
use crate::orchestrator::Orchestrator;
use crate::runtime_config::RuntimeConfig;
use crate::types::{MarketContext, Signal, SignalStatus};

const CANDLE_LOOKBACK: usize = 100;

pub struct SignalProcessor {
    pub pool: PgPool,
    pub repo: Arc<dyn SignalRepo>,
    pub market_data: Arc<MarketDataMultiplex>,
    pub orchestrator: Arc<Orchestrator>,
}

impl SignalProcessor {
    /// Claim up to `config.orchestrator_batch_size` signals and process them
    /// concurrently, bounded by `config.orchestrator_concurrency`.
    pub async fn run_batch(&self, config: &RuntimeConfig) -> Result<usize, PipelineError> {
        let claimed = self
            .repo
            .claim_pending(config.orchestrator_batch_size as i64)
            .await?;
        let count = claimed.len();

        stream::iter(claimed)
            .for_each_concurrent(config.orchestrator_concurrency as usize, |signal| async move {
                if let Err(e) = self.process_one(config, &signal).await {
                    tracing::warn!(signal_id = %signal.id, error = %e, "signal processing attempt failed");
                    let _ = self
                        .repo
                        .release_failed(
                            signal.id,
                            config.max_processing_attempts,
                            config.orchestrator_retry_delay_ms,
                        )
                        .await;
                }
            })
            .await;

        Ok(count)
    }

    async fn process_one(&self, config: &RuntimeConfig, signal: &Signal) -> Result<(), PipelineError> {
        let context = self.build_market_context(signal).await?;
        repo::insert_market_context(&self.pool, &context).await?;

        let outcome = self.orchestrator.run(config, signal, &context).await?;

        self.repo
            .release_processed(
                signal.id,
                Some(outcome.experiment_id),
                outcome.status,
                outcome.rejection_reason,
            )
            .await
    }

    async fn build_market_context(&self, signal: &Signal) -> Result<MarketContext, PipelineError> {
        let candles = self
            .market_data
            .get_candles(&signal.symbol, &signal.timeframe, CANDLE_LOOKBACK)
            .await?;
        let price = self.market_data.get_stock_price(&signal.symbol).await?;
        let indicators = self
            .market_data
            .get_indicators(&signal.symbol, &signal.timeframe, CANDLE_LOOKBACK)
            .await?;
        let volume = candles.value.last().map(|c| c.volume).unwrap_or(0.0);

        let snapshot_timestamp = Utc::now();
        let context_hash = compute_context_hash(
            signal.id,
            snapshot_timestamp,
            &signal.symbol,
            price.value.bid,
            price.value.ask,
            price.value.current_price,
            volume,
            &indicators.value,
        );

        Ok(MarketContext {
            id: Uuid::new_v4(),
            signal_id: signal.id,
            snapshot_timestamp,
            symbol: signal.symbol.clone(),
            current_price: price.value.current_price,
            bid: price.value.bid,
            ask: price.value.ask,
            volume,
            indicators: indicators.value,
            market_intel: None,
            context_hash,
        })
    }
}

/// MarketContext.context_hash depends only on these fields and must be
/// independent of indicator-key iteration order — callers always pass a
/// `BTreeMap` so serialization order is already stable.
fn compute_context_hash(
    signal_id: Uuid,
    snapshot_timestamp: chrono::DateTime<Utc>,
    symbol: &str,
    bid: f64,
    ask: f64,
    current_price: f64,
    volume: f64,
    indicators: &BTreeMap<String, f64>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signal_id.as_bytes());
    hasher.update(snapshot_timestamp.to_rfc3339().as_bytes());
    hasher.update(symbol.as_bytes());
    hasher.update(bid.to_bits().to_be_bytes());
    hasher.update(ask.to_bits().to_be_bytes());
    hasher.update(current_price.to_bits().to_be_bytes());
    hasher.update(volume.to_bits().to_be_bytes());
    let canonical = serde_json::to_vec(indicators).unwrap_or_default();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_independent_of_indicator_insertion_order() {
        let ts = Utc::now();
        let id = Uuid::new_v4();

        let mut a = BTreeMap::new();
        a.insert("rsi_14".to_string(), 55.0);
        a.insert("ema_9".to_string(), 400.0);

        let mut b = BTreeMap::new();
        b.insert("ema_9".to_string(), 400.0);
        b.insert("rsi_14".to_string(), 55.0);

        let hash_a = compute_context_hash(id, ts, "SPY", 399.9, 400.1, 400.0, 1000.0, &a);
        let hash_b = compute_context_hash(id, ts, "SPY", 399.9, 400.1, 400.0, 1000.0, &b);
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn hash_changes_with_price() {
        let ts = Utc::now();
        let id = Uuid::new_v4();
        let indicators = BTreeMap::new();
        let hash_a = compute_context_hash(id, ts, "SPY", 399.9, 400.1, 400.0, 1000.0, &indicators);
        let hash_b = compute_context_hash(id, ts, "SPY", 399.9, 400.1, 401.0, 1000.0, &indicators);
        assert_ne!(hash_a, hash_b);
    }
}
