// =============================================================================
// Exit Intelligence
// =============================================================================
//
// Produces bias-aware exit adjustments for an open position without
// overriding hard stops. Rules are evaluated in a fixed priority order; a
// full exit dominates a partial exit, which dominates stop adjustment.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::bias::{RegimeType, TrendPhase, UnifiedBiasState};
use crate::risk_model::StrategyType;
use crate::types::Direction;

const MACRO_DRIFT_TIGHTEN_THRESHOLD: f64 = 0.18;
const MACRO_DRIFT_FULL_EXIT_THRESHOLD: f64 = 0.25;
const MIN_R_FOR_PARTIAL: f64 = 1.0;

/// Position and context carried into an exit evaluation.
pub struct ExitInputs<'a> {
    pub entry_price: f64,
    pub entry_state: Option<&'a UnifiedBiasState>,
    pub current_state: &'a UnifiedBiasState,
    pub direction: Direction,
    pub strategy_type: StrategyType,
    pub unrealized_pnl_r: f64,
    pub trade_aligned_with_macro: bool,
    pub atr_expanding: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModifierContribution {
    pub tag: &'static str,
    pub stop_distance_multiplier: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitDecision {
    pub force_full_exit: bool,
    pub partial_exit_pct: Option<f64>,
    pub stop_distance_multiplier: f64,
    pub convert_to_trailing_stop: bool,
    pub applied: Vec<ModifierContribution>,
}

/// Evaluate all exit rules in priority order and return the dominant action.
/// `stop_distance_multiplier` always starts at 1.0 and is only adjusted by
/// whichever rule wins; a full exit still reports the multiplier of the
/// rule that triggered it for audit purposes.
pub fn evaluate(inputs: &ExitInputs) -> ExitDecision {
    let mut decision = ExitDecision {
        stop_distance_multiplier: 1.0,
        ..ExitDecision::default()
    };

    let losing = inputs.unrealized_pnl_r < 0.0;

    let macro_drift_score = inputs
        .current_state
        .acceleration
        .as_ref()
        .map(|a| a.macro_drift_score)
        .unwrap_or(0.0);

    if inputs.current_state.transitions.macro_flip || macro_drift_score > MACRO_DRIFT_TIGHTEN_THRESHOLD {
        if macro_drift_score > MACRO_DRIFT_FULL_EXIT_THRESHOLD {
            decision.force_full_exit = true;
            decision.applied.push(ModifierContribution {
                tag: "MACRO_DRIFT_EXIT_PRESSURE",
                stop_distance_multiplier: 1.0,
            });
            return decision;
        }
        if !losing && inputs.unrealized_pnl_r >= MIN_R_FOR_PARTIAL {
            decision.partial_exit_pct = Some(0.30);
            decision.stop_distance_multiplier = 0.75;
            decision.applied.push(ModifierContribution {
                tag: "MACRO_DRIFT_EXIT_PRESSURE",
                stop_distance_multiplier: 0.75,
            });
        }
    }

    let entry_strength_positive = inputs
        .entry_state
        .and_then(|s| s.acceleration.as_ref())
        .map(|a| a.state_strength_delta > 0.0)
        .unwrap_or(false);
    let current_strength_negative = inputs
        .current_state
        .acceleration
        .as_ref()
        .map(|a| a.state_strength_delta < 0.0)
        .unwrap_or(false);

    if inputs.current_state.trend_phase == TrendPhase::Late
        && current_strength_negative
        && entry_strength_positive
        && !losing
        && decision.partial_exit_pct.is_none()
    {
        decision.stop_distance_multiplier = 0.8;
        decision.convert_to_trailing_stop = true;
        decision.applied.push(ModifierContribution {
            tag: "ACCELERATION_DECAY",
            stop_distance_multiplier: 0.8,
        });
    }

    if inputs.current_state.transitions.regime_flip
        && inputs.current_state.regime_type != RegimeType::Trend
        && inputs.strategy_type == StrategyType::Breakout
    {
        decision.force_full_exit = true;
        decision.applied.push(ModifierContribution {
            tag: "REGIME_FLIP_INVALIDATION",
            stop_distance_multiplier: decision.stop_distance_multiplier,
        });
        return decision;
    }

    let liquidity_trap_against = match inputs.direction {
        Direction::Long => inputs.current_state.liquidity.sweep_high,
        Direction::Short => inputs.current_state.liquidity.sweep_low,
    } && !inputs.current_state.liquidity.reclaim;

    if liquidity_trap_against {
        decision.force_full_exit = true;
        decision.applied.push(ModifierContribution {
            tag: "LIQUIDITY_TRAP_EXIT",
            stop_distance_multiplier: decision.stop_distance_multiplier,
        });
        return decision;
    }

    if inputs.atr_expanding
        && inputs.trade_aligned_with_macro
        && !losing
        && inputs.unrealized_pnl_r >= MIN_R_FOR_PARTIAL
        && decision.partial_exit_pct.is_none()
    {
        decision.stop_distance_multiplier = decision.stop_distance_multiplier.max(1.15);
        decision.applied.push(ModifierContribution {
            tag: "VOLATILITY_EXPANSION_PROTECT_RUN",
            stop_distance_multiplier: 1.15,
        });
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::{
        Acceleration, Bias, IntentType, Levels, Liquidity, RiskContext, Space, Transitions,
        Trigger,
    };

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
            transitions: Transitions::default(),
            acceleration: None,
            is_stale: false,
            updated_at_ms: 0,
            source: "mtf-engine-v3".to_string(),
            effective: crate::bias::Effective::default(),
        }
    }

    fn inputs<'a>(state: &'a UnifiedBiasState) -> ExitInputs<'a> {
        ExitInputs {
            entry_price: 400.0,
            entry_state: None,
            current_state: state,
            direction: Direction::Long,
            strategy_type: StrategyType::Breakout,
            unrealized_pnl_r: 0.5,
            trade_aligned_with_macro: true,
            atr_expanding: false,
        }
    }

    #[test]
    fn macro_drift_above_full_exit_threshold_dominates() {
        let mut state = base_state();
        state.acceleration = Some(Acceleration {
            state_strength_delta: 0.0,
            intent_momentum_delta: 0.0,
            macro_drift_score: 0.30,
        });
        let decision = evaluate(&inputs(&state));
        assert!(decision.force_full_exit);
        assert_eq!(decision.applied.len(), 1);
        assert_eq!(decision.applied[0].tag, "MACRO_DRIFT_EXIT_PRESSURE");
    }

    #[test]
    fn macro_drift_tighten_and_partial_exit() {
        let mut state = base_state();
        state.transitions.macro_flip = true;
        let mut input = inputs(&state);
        input.unrealized_pnl_r = 1.2;
        let decision = evaluate(&input);
        assert!(!decision.force_full_exit);
        assert_eq!(decision.partial_exit_pct, Some(0.30));
        assert_eq!(decision.stop_distance_multiplier, 0.75);
    }

    #[test]
    fn macro_drift_below_min_r_does_not_partial_exit() {
        let mut state = base_state();
        state.transitions.macro_flip = true;
        let decision = evaluate(&inputs(&state));
        assert!(!decision.force_full_exit);
        assert_eq!(
            decision.partial_exit_pct, None,
            "0.5R profit is below MIN_R_FOR_PARTIAL"
        );
        assert_eq!(decision.stop_distance_multiplier, 1.0);
    }

    #[test]
    fn losing_trade_does_not_tighten_on_macro_drift() {
        let mut state = base_state();
        state.transitions.macro_flip = true;
        let mut input = inputs(&state);
        input.unrealized_pnl_r = -0.5;
        let decision = evaluate(&input);
        assert!(decision.partial_exit_pct.is_none());
        assert_eq!(decision.stop_distance_multiplier, 1.0);
    }

    #[test]
    fn liquidity_trap_forces_full_exit() {
        let mut state = base_state();
        state.liquidity.sweep_high = true;
        state.liquidity.reclaim = false;
        let decision = evaluate(&inputs(&state));
        assert!(decision.force_full_exit);
        assert_eq!(decision.applied.last().unwrap().tag, "LIQUIDITY_TRAP_EXIT");
    }

    #[test]
    fn regime_flip_against_breakout_forces_full_exit() {
        let mut state = base_state();
        state.regime_type = RegimeType::Range;
        state.transitions.regime_flip = true;
        let decision = evaluate(&inputs(&state));
        assert!(decision.force_full_exit);
    }

    #[test]
    fn volatility_expansion_widens_stop_on_winning_aligned_trade() {
        let mut state = base_state();
        let mut input = inputs(&state);
        input.atr_expanding = true;
        input.unrealized_pnl_r = 1.2;
        let decision = evaluate(&input);
        assert_eq!(decision.stop_distance_multiplier, 1.15);
        assert!(!decision.force_full_exit);
        state.liquidity.sweep_high = false;
    }

    #[test]
    fn volatility_expansion_never_widens_on_losing_trade() {
        let state = base_state();
        let mut input = inputs(&state);
        input.atr_expanding = true;
        input.unrealized_pnl_r = -0.2;
        let decision = evaluate(&input);
        assert_eq!(decision.stop_distance_multiplier, 1.0);
    }

    #[test]
    fn acceleration_decay_converts_to_trailing_stop() {
        let entry = base_state();
        let mut entry_accel = entry.clone();
        entry_accel.acceleration = Some(Acceleration {
            state_strength_delta: 20.0,
            intent_momentum_delta: 0.0,
            macro_drift_score: 0.0,
        });
        let mut current = base_state();
        current.trend_phase = TrendPhase::Late;
        current.acceleration = Some(Acceleration {
            state_strength_delta: -5.0,
            intent_momentum_delta: 0.0,
            macro_drift_score: 0.0,
        });
        let input = ExitInputs {
            entry_price: 400.0,
            entry_state: Some(&entry_accel),
            current_state: &current,
            direction: Direction::Long,
            strategy_type: StrategyType::Breakout,
            unrealized_pnl_r: 0.5,
            trade_aligned_with_macro: true,
            atr_expanding: false,
        };
        let decision = evaluate(&input);
        assert!(decision.convert_to_trailing_stop);
        assert_eq!(decision.stop_distance_multiplier, 0.8);
    }
}
