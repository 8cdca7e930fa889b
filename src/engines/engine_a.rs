// =============================================================================
// Engine A — rule-based decision producer
// =============================================================================
//
// Derives a candidate setup directly from the UnifiedBiasState, gates it
// through the setup validator and risk model (both pure, inputs-only
// functions — no I/O), and sizes the resulting option leg off the risk
// multiplier. Returns None when the setup validator rejects the candidate
// or the bias state carries no actionable intent.
// =============================================================================

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::bias::{Bias, UnifiedBiasState};
use crate::error::PipelineError;
use crate::risk_model::{self, RiskConfig};
use crate::setup_validator::{self, CandidateSetup};
use crate::types::{Direction, OptionType, TradeRecommendation, Variant};

use super::{EngineInputs, EngineInvoker};

const DEFAULT_EXPIRATION_DAYS: i64 = 7;
const BASE_CONTRACTS: f64 = 1.0;

pub struct EngineA {
    pub risk_config: RiskConfig,
}

impl EngineA {
    pub fn new(risk_config: RiskConfig) -> Self {
        Self { risk_config }
    }
}

impl Default for EngineA {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

#[async_trait]
impl EngineInvoker for EngineA {
    fn variant(&self) -> Variant {
        Variant::A
    }

    async fn invoke(
        &self,
        inputs: &EngineInputs<'_>,
    ) -> Result<Option<TradeRecommendation>, PipelineError> {
        let state = inputs.bias_state;

        let direction = match direction_from_bias(state) {
            Some(d) => d,
            None => return Ok(None),
        };

        let strategy_type = match risk_model::strategy_type_from_intent(state.intent_type) {
            Some(s) => s,
            None => return Ok(None),
        };

        let candidate = CandidateSetup {
            direction,
            strategy_type,
            allow_anticipatory_entry: false,
        };

        let validation = setup_validator::validate(state, &candidate);
        if !validation.valid {
            return Ok(None);
        }

        let breakdown = risk_model::compute_multiplier(
            1.0,
            direction,
            strategy_type,
            Some(state),
            &self.risk_config,
        )?;

        let quantity = (BASE_CONTRACTS * breakdown.final_multiplier).round().max(1.0) as i32;

        let current_price = inputs.context.current_price;
        let option_type = match direction {
            Direction::Long => OptionType::Call,
            Direction::Short => OptionType::Put,
        };
        let strike = current_price.round();
        let expiration = Utc::now() + Duration::days(DEFAULT_EXPIRATION_DAYS);

        let stop_loss = Some(state.risk_context.invalidation_level);
        let take_profit = take_profit_for(current_price, state.risk_context.invalidation_level, direction);

        let _ = option_type; // option_type is encoded on the Order, not the recommendation itself

        Ok(Some(TradeRecommendation {
            id: Uuid::new_v4(),
            experiment_id: Uuid::nil(),
            engine: Variant::A,
            symbol: inputs.signal.symbol.clone(),
            direction,
            strike,
            expiration,
            quantity,
            entry_price: current_price,
            stop_loss,
            take_profit,
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

fn direction_from_bias(state: &UnifiedBiasState) -> Option<Direction> {
    match state.bias {
        Bias::Bullish => Some(Direction::Long),
        Bias::Bearish => Some(Direction::Short),
        Bias::Neutral => None,
    }
}

/// Symmetric 2R target off the distance to the invalidation level.
fn take_profit_for(entry: f64, invalidation_level: f64, direction: Direction) -> Option<f64> {
    let risk_distance = (entry - invalidation_level).abs();
    if risk_distance <= 0.0 {
        return None;
    }
    match direction {
        Direction::Long => Some(entry + 2.0 * risk_distance),
        Direction::Short => Some(entry - 2.0 * risk_distance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::{
        Acceleration, AtrState, Effective, GammaOverlay, IntentType as BiasIntent, Levels,
        Liquidity, RegimeType, RiskContext, Space, Transitions, Trigger, TrendPhase,
    };
    use crate::types::{MarketContext, Signal, SignalStatus};
    use std::collections::BTreeMap;

    fn state(bias: Bias, intent: BiasIntent) -> UnifiedBiasState {
        let _ = GammaOverlay {
            gamma_regime: String::new(),
            zero_gamma_level: 0.0,
            distance_atrs: 0.0,
        };
        let _ = Acceleration {
            state_strength_delta: 0.0,
            intent_momentum_delta: 0.0,
            macro_drift_score: 0.0,
        };
        let _ = AtrState::Stable;
        let _ = Effective::default();
        UnifiedBiasState {
            symbol: "SPY".to_string(),
            bias,
            bias_score: 10.0,
            confidence: 0.5,
            alignment_score: 50.0,
            conflict_score: 0.0,
            regime_type: RegimeType::Trend,
            chop_score: 10.0,
            macro_class: "MACRO_TREND_UP".to_string(),
            macro_confidence: 0.8,
            intent_type: intent,
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
                entry_mode_hint: BiasIntent::Breakout,
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
    async fn bullish_breakout_produces_long_call_recommendation() {
        let engine = EngineA::default();
        let state = state(Bias::Bullish, BiasIntent::Breakout);
        let signal = signal();
        let context = context();
        let inputs = EngineInputs {
            signal: &signal,
            context: &context,
            bias_state: &state,
        };
        let rec = engine.invoke(&inputs).await.unwrap().unwrap();
        assert_eq!(rec.direction, Direction::Long);
        assert_eq!(rec.engine, Variant::A);
        assert!(rec.quantity >= 1);
    }

    #[tokio::test]
    async fn neutral_bias_produces_no_recommendation() {
        let engine = EngineA::default();
        let state = state(Bias::Neutral, BiasIntent::Neutral);
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
    async fn untriggered_setup_without_anticipation_is_rejected() {
        let engine = EngineA::default();
        let mut state = state(Bias::Bullish, BiasIntent::Breakout);
        state.trigger.triggered = false;
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
