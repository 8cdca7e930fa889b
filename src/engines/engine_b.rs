// =============================================================================
// Engine B — multi-agent decision producer (abstracted)
// =============================================================================
//
// The production engine behind this variant runs an ensemble of specialized
// agents and reconciles their votes; that machinery is out of scope here.
// This stub honors the same EngineInvoker contract and produces a
// recommendation only when the bias state reflects the kind of high-
// conviction alignment an agent ensemble would need to reach consensus:
// confidence and alignment both above threshold, with no unresolved conflict.
// =============================================================================

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::bias::{Bias, UnifiedBiasState};
use crate::error::PipelineError;
use crate::types::{Direction, TradeRecommendation, Variant};

use super::{EngineInputs, EngineInvoker};

const CONSENSUS_CONFIDENCE_THRESHOLD: f64 = 0.6;
const CONSENSUS_ALIGNMENT_THRESHOLD: f64 = 60.0;
const MAX_CONFLICT_SCORE: f64 = 30.0;
const DEFAULT_EXPIRATION_DAYS: i64 = 7;

pub struct EngineB;

impl Default for EngineB {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl EngineInvoker for EngineB {
    fn variant(&self) -> Variant {
        Variant::B
    }

    async fn invoke(
        &self,
        inputs: &EngineInputs<'_>,
    ) -> Result<Option<TradeRecommendation>, PipelineError> {
        let state = inputs.bias_state;

        let direction = match state.bias {
            Bias::Bullish => Direction::Long,
            Bias::Bearish => Direction::Short,
            Bias::Neutral => return Ok(None),
        };

        if !has_consensus(state) {
            return Ok(None);
        }

        let current_price = inputs.context.current_price;
        let strike = current_price.round();
        let expiration = Utc::now() + Duration::days(DEFAULT_EXPIRATION_DAYS);
        let quantity = 1;

        Ok(Some(TradeRecommendation {
            id: Uuid::new_v4(),
            experiment_id: Uuid::nil(),
            engine: Variant::B,
            symbol: inputs.signal.symbol.clone(),
            direction,
            strike,
            expiration,
            quantity,
            entry_price: current_price,
            stop_loss: Some(state.risk_context.invalidation_level),
            take_profit: None,
            is_shadow: true,
            strategy_type: None,
            regime_at_entry: None,
            trend_phase_at_entry: None,
            high_acceleration_entry: false,
            macro_class_at_entry: None,
            created_at: Utc::now(),
        }))
    }
}

fn has_consensus(state: &UnifiedBiasState) -> bool {
    state.confidence >= CONSENSUS_CONFIDENCE_THRESHOLD
        && state.alignment_score >= CONSENSUS_ALIGNMENT_THRESHOLD
        && state.conflict_score <= MAX_CONFLICT_SCORE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::{
        AtrState, Effective, IntentType, Levels, Liquidity, RegimeType, RiskContext, Space,
        Transitions, Trigger, TrendPhase,
    };
    use crate::types::{MarketContext, Signal, SignalStatus};
    use std::collections::BTreeMap;

    fn state(confidence: f64, alignment_score: f64, conflict_score: f64) -> UnifiedBiasState {
        UnifiedBiasState {
            symbol: "SPY".to_string(),
            bias: Bias::Bullish,
            bias_score: 10.0,
            confidence,
            alignment_score,
            conflict_score,
            regime_type: RegimeType::Trend,
            chop_score: 10.0,
            macro_class: "MACRO_TREND_UP".to_string(),
            macro_confidence: 0.8,
            intent_type: IntentType::Breakout,
            trend_phase: TrendPhase::Mid,
            levels: Levels::default(),
            trigger: Trigger {
                pattern: None,
                triggered: true,
            },
            liquidity: Liquidity::default(),
            space: Space {
                room_to_resistance: crate::bias::RoomLevel::High,
                room_to_support: crate::bias::RoomLevel::High,
            },
            risk_context: RiskContext {
                invalidation_level: 390.0,
                invalidation_method: "swing_low".to_string(),
                entry_mode_hint: IntentType::Breakout,
            },
            atr_state_15m: AtrState::Stable,
            gamma: None,
            transitions: Transitions::default(),
            acceleration: None,
            is_stale: false,
            updated_at_ms: 0,
            source: "mtf-engine-v3".to_string(),
            effective: Effective::default(),
        }
    }

    fn signal() -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: "SPY".to_string(),
            direction: Direction::Long,
            timeframe: "5m".to_string(),
            source_timestamp: Utc::now(),
            raw_payload: serde_json::json!({}),
            signal_hash: "abc".to_string(),
            status: SignalStatus::Pending,
            processed: false,
            processing_lock: false,
            processing_attempts: 0,
            next_retry_at: None,
            experiment_id: None,
            rejection_reason: None,
            is_test: false,
            created_at: Utc::now(),
        }
    }

    fn context() -> MarketContext {
        MarketContext {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            snapshot_timestamp: Utc::now(),
            symbol: "SPY".to_string(),
            current_price: 400.0,
            bid: 399.9,
            ask: 400.1,
            volume: 1_000_000.0,
            indicators: BTreeMap::new(),
            market_intel: None,
            context_hash: "h".to_string(),
        }
    }

    #[tokio::test]
    async fn strong_consensus_produces_recommendation() {
        let engine = EngineB;
        let state = state(0.8, 80.0, 5.0);
        let signal = signal();
        let context = context();
        let inputs = EngineInputs {
            signal: &signal,
            context: &context,
            bias_state: &state,
        };
        assert!(engine.invoke(&inputs).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn weak_confidence_yields_no_trade() {
        let engine = EngineB;
        let state = state(0.3, 80.0, 5.0);
        let signal = signal();
        let context = context();
        let inputs = EngineInputs {
            signal: &signal,
            context: &context,
            bias_state: &state,
        };
        assert!(engine.invoke(&inputs).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn high_conflict_yields_no_trade() {
        let engine = EngineB;
        let state = state(0.8, 80.0, 50.0);
        let signal = signal();
        let context = context();
        let inputs = EngineInputs {
            signal: &signal,
            context: &context,
            bias_state: &state,
        };
        assert!(engine.invoke(&inputs).await.unwrap().is_none());
    }
}
