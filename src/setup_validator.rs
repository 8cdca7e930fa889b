// =============================================================================
// Setup Validator
// =============================================================================
//
// Accepts or rejects the entry setup regardless of risk size.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::bias::{IntentType, RegimeType, RoomLevel, UnifiedBiasState};
use crate::risk_model::StrategyType;
use crate::types::Direction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reject_reasons: Vec<String>,
}

pub struct CandidateSetup {
    pub direction: Direction,
    pub strategy_type: StrategyType,
    pub allow_anticipatory_entry: bool,
}

pub fn validate(state: &UnifiedBiasState, candidate: &CandidateSetup) -> ValidationResult {
    let mut reasons = Vec::new();

    if state.risk_context.entry_mode_hint == IntentType::Breakout {
        let starved = match candidate.direction {
            Direction::Long => state.space.room_to_resistance == RoomLevel::Low,
            Direction::Short => state.space.room_to_support == RoomLevel::Low,
        };
        if starved {
            reasons.push("BREAKOUT_WITHOUT_SPACE".to_string());
        }
    }

    if !state.trigger.triggered && !candidate.allow_anticipatory_entry {
        reasons.push("NO_TRIGGER_CONFIRMATION".to_string());
    }

    let liquidity_trap = match candidate.direction {
        Direction::Long => state.liquidity.sweep_high && !state.liquidity.reclaim,
        Direction::Short => state.liquidity.sweep_low && !state.liquidity.reclaim,
    };
    if liquidity_trap {
        reasons.push("LIQUIDITY_TRAP_CONTINUATION".to_string());
    }

    if state.regime_type == RegimeType::Range && candidate.strategy_type != StrategyType::MeanRevert {
        reasons.push("RANGE_SUPPRESSION_NON_MEAN_REVERT".to_string());
    }

    ValidationResult {
        valid: reasons.is_empty(),
        reject_reasons: reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::{Bias, Levels, Liquidity, RiskContext, Space, Trigger, TrendPhase};

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
            trigger: Trigger {
                pattern: None,
                triggered: true,
            },
            liquidity: Liquidity::default(),
            space: Space {
                room_to_resistance: RoomLevel::High,
                room_to_support: RoomLevel::High,
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

    #[test]
    fn clean_setup_is_valid() {
        let state = base_state();
        let candidate = CandidateSetup {
            direction: Direction::Long,
            strategy_type: StrategyType::Breakout,
            allow_anticipatory_entry: false,
        };
        let result = validate(&state, &candidate);
        assert!(result.valid);
    }

    #[test]
    fn breakout_without_space_rejected() {
        let mut state = base_state();
        state.space.room_to_resistance = RoomLevel::Low;
        let candidate = CandidateSetup {
            direction: Direction::Long,
            strategy_type: StrategyType::Breakout,
            allow_anticipatory_entry: false,
        };
        let result = validate(&state, &candidate);
        assert!(result.reject_reasons.contains(&"BREAKOUT_WITHOUT_SPACE".to_string()));
    }

    #[test]
    fn no_trigger_confirmation_rejected_unless_anticipatory_allowed() {
        let mut state = base_state();
        state.trigger.triggered = false;
        let strict = CandidateSetup {
            direction: Direction::Long,
            strategy_type: StrategyType::Breakout,
            allow_anticipatory_entry: false,
        };
        assert!(validate(&state, &strict).reject_reasons.contains(&"NO_TRIGGER_CONFIRMATION".to_string()));

        let anticipatory = CandidateSetup {
            direction: Direction::Long,
            strategy_type: StrategyType::Breakout,
            allow_anticipatory_entry: true,
        };
        assert!(!validate(&state, &anticipatory).reject_reasons.contains(&"NO_TRIGGER_CONFIRMATION".to_string()));
    }

    #[test]
    fn liquidity_trap_continuation_rejected() {
        let mut state = base_state();
        state.liquidity.sweep_high = true;
        state.liquidity.reclaim = false;
        let candidate = CandidateSetup {
            direction: Direction::Long,
            strategy_type: StrategyType::Breakout,
            allow_anticipatory_entry: false,
        };
        let result = validate(&state, &candidate);
        assert!(result.reject_reasons.contains(&"LIQUIDITY_TRAP_CONTINUATION".to_string()));
    }

    #[test]
    fn scenario_e_range_suppression() {
        let mut state = base_state();
        state.regime_type = RegimeType::Range;
        state.chop_score = 75.0;
        let candidate = CandidateSetup {
            direction: Direction::Long,
            strategy_type: StrategyType::Breakout,
            allow_anticipatory_entry: false,
        };
        let result = validate(&state, &candidate);
        assert!(!result.valid);
        assert!(result.reject_reasons.contains(&"RANGE_SUPPRESSION_NON_MEAN_REVERT".to_string()));
    }

    #[test]
    fn range_with_mean_revert_strategy_not_suppressed() {
        let mut state = base_state();
        state.regime_type = RegimeType::Range;
        let candidate = CandidateSetup {
            direction: Direction::Long,
            strategy_type: StrategyType::MeanRevert,
            allow_anticipatory_entry: false,
        };
        let result = validate(&state, &candidate);
        assert!(!result.reject_reasons.contains(&"RANGE_SUPPRESSION_NON_MEAN_REVERT".to_string()));
    }
}
