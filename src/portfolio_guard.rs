// =============================================================================
// Portfolio Guard
// =============================================================================
//
// Given current open positions and a candidate trade, decides ALLOW or
// BLOCK and surfaces reason codes plus a defined-risk-only flag. Rules are
// evaluated in order; the first matching BLOCK wins but every matched reason
// is collected. Side-effect-free.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::bias::{RegimeType, UnifiedBiasState};
use crate::risk_model::StrategyType;
use crate::types::{Direction, Position};

const MACRO_DRIFT_THRESHOLD_DEFAULT: f64 = 0.18;
const MACRO_BIAS_CLUSTER_MIN_POSITIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    Allow,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardResult {
    pub verdict_is_block: bool,
    pub reasons: Vec<String>,
    pub defined_risk_only: bool,
}

pub struct CandidateTrade<'a> {
    pub symbol: &'a str,
    pub direction: Direction,
    pub strategy_type: StrategyType,
    pub macro_class_bearish_confirmed: bool,
}

/// Evaluate the portfolio guard rules against a candidate trade and the set
/// of currently open positions.
pub fn evaluate(
    state: &UnifiedBiasState,
    candidate: &CandidateTrade,
    open_positions: &[Position],
    macro_drift_threshold: Option<f64>,
) -> GuardResult {
    let threshold = macro_drift_threshold.unwrap_or(MACRO_DRIFT_THRESHOLD_DEFAULT);
    let mut reasons = Vec::new();
    let mut defined_risk_only = false;

    let macro_drift_score = state.acceleration.as_ref().map(|a| a.macro_drift_score).unwrap_or(0.0);
    if state.transitions.macro_flip || macro_drift_score > threshold {
        reasons.push("MACRO_DRIFT_GUARD".to_string());
        defined_risk_only = true;
    }

    if state.regime_type == RegimeType::Range
        && state.chop_score > 70.0
        && candidate.strategy_type == StrategyType::Breakout
    {
        reasons.push("RANGE_BREAKOUT_BLOCKED".to_string());
    }

    if candidate.macro_class_bearish_confirmed {
        let correlated_longs = open_positions
            .iter()
            .filter(|p| {
                p.status == crate::types::PositionStatus::Open
                    && p.direction == Direction::Long
                    && p.macro_class_at_entry.as_deref() == Some(state.macro_class.as_str())
            })
            .count();
        if correlated_longs >= MACRO_BIAS_CLUSTER_MIN_POSITIONS {
            reasons.push("MACRO_BIAS_CLUSTER".to_string());
        }
    }

    GuardResult {
        verdict_is_block: !reasons.is_empty(),
        reasons,
        defined_risk_only,
    }
}

impl GuardResult {
    pub fn verdict(&self) -> GuardVerdict {
        if self.verdict_is_block {
            GuardVerdict::Block
        } else {
            GuardVerdict::Allow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::{
        Acceleration, Bias, IntentType, Levels, Liquidity, RiskContext, Space, Trigger, TrendPhase,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn base_state() -> UnifiedBiasState {
        UnifiedBiasState {
            symbol: "SPY".to_string(),
            bias: Bias::Bullish,
            bias_score: 10.0,
            confidence: 0.5,
            alignment_score: 50.0,
            conflict_score: 0.0,
            regime_type: RegimeType::Trend,
            chop_score: 10.0,
            macro_class: "MACRO_TREND_UP".to_string(),
            macro_confidence: 0.8,
            intent_type: IntentType::Breakout,
            trend_phase: TrendPhase::Mid,
            levels: Levels::default(),
            trigger: Trigger::default(),
            liquidity: Liquidity::default(),
            space: Space {
                room_to_resistance: crate::bias::RoomLevel::High,
                room_to_support: crate::bias::RoomLevel::Medium,
            },
            risk_context: RiskContext {
                invalidation_level: 400.0,
                invalidation_method: "swing_low".to_string(),
                entry_mode_hint: IntentType::Breakout,
            },
            atr_state_15m: crate::bias::AtrState::Stable,
            gamma: None,
            transitions: crate::bias::Transitions::default(),
            acceleration: None,
            is_stale: false,
            updated_at_ms: 0,
            source: "mtf-engine-v3".to_string(),
            effective: crate::bias::Effective::default(),
        }
    }

    fn open_long_position(macro_class: &str) -> Position {
        Position {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            symbol: "SPY".to_string(),
            direction: Direction::Long,
            entry_price: 400.0,
            current_price: 400.0,
            quantity: 1,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            status: crate::types::PositionStatus::Open,
            macro_class_at_entry: Some(macro_class.to_string()),
            entry_timestamp: Utc::now(),
            exit_timestamp: None,
        }
    }

    #[test]
    fn scenario_d_macro_drift_block() {
        let mut state = base_state();
        state.transitions.macro_flip = true;
        state.acceleration = Some(Acceleration {
            state_strength_delta: 0.0,
            intent_momentum_delta: 0.0,
            macro_drift_score: 0.22,
        });
        let candidate = CandidateTrade {
            symbol: "SPY",
            direction: Direction::Long,
            strategy_type: StrategyType::Pullback,
            macro_class_bearish_confirmed: false,
        };
        let result = evaluate(&state, &candidate, &[], None);
        assert_eq!(result.verdict(), GuardVerdict::Block);
        assert!(result.reasons.contains(&"MACRO_DRIFT_GUARD".to_string()));
        assert!(result.defined_risk_only);
    }

    #[test]
    fn range_breakout_blocked() {
        let mut state = base_state();
        state.regime_type = RegimeType::Range;
        state.chop_score = 75.0;
        let candidate = CandidateTrade {
            symbol: "SPY",
            direction: Direction::Long,
            strategy_type: StrategyType::Breakout,
            macro_class_bearish_confirmed: false,
        };
        let result = evaluate(&state, &candidate, &[], None);
        assert!(result.reasons.contains(&"RANGE_BREAKOUT_BLOCKED".to_string()));
    }

    #[test]
    fn macro_bias_cluster_requires_three_correlated_longs() {
        let state = base_state();
        let candidate = CandidateTrade {
            symbol: "SPY",
            direction: Direction::Short,
            strategy_type: StrategyType::Pullback,
            macro_class_bearish_confirmed: true,
        };
        let two_positions = vec![
            open_long_position("MACRO_TREND_UP"),
            open_long_position("MACRO_TREND_UP"),
        ];
        assert!(!evaluate(&state, &candidate, &two_positions, None).verdict_is_block);

        let three_positions = vec![
            open_long_position("MACRO_TREND_UP"),
            open_long_position("MACRO_TREND_UP"),
            open_long_position("MACRO_TREND_UP"),
        ];
        let result = evaluate(&state, &candidate, &three_positions, None);
        assert!(result.reasons.contains(&"MACRO_BIAS_CLUSTER".to_string()));
    }

    #[test]
    fn clean_state_allows() {
        let state = base_state();
        let candidate = CandidateTrade {
            symbol: "SPY",
            direction: Direction::Long,
            strategy_type: StrategyType::Pullback,
            macro_class_bearish_confirmed: false,
        };
        let result = evaluate(&state, &candidate, &[], None);
        assert_eq!(result.verdict(), GuardVerdict::Allow);
    }
}
