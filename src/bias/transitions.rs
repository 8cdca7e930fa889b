// =============================================================================
// Transition Detector
// =============================================================================
//
// Given (prev, curr) returns the transitions record. If `prev` is `None`,
// only `liquidity_event` may be true — every other transition requires a
// genuine change from a prior observation.
// =============================================================================

use crate::bias::{AtrState, Transitions, UnifiedBiasState};

pub fn detect(prev: Option<&UnifiedBiasState>, curr: &UnifiedBiasState) -> Transitions {
    let prev = match prev {
        Some(p) => p,
        None => {
            return Transitions {
                liquidity_event: any_liquidity_flag_set(curr),
                ..Transitions::default()
            }
        }
    };

    Transitions {
        bias_flip: curr.bias != prev.bias,
        regime_flip: curr.regime_type != prev.regime_type,
        macro_flip: curr.macro_class != prev.macro_class,
        intent_change: curr.intent_type != prev.intent_type,
        liquidity_event: liquidity_false_to_true(prev, curr),
        expansion_event: prev.atr_state_15m != AtrState::Expanding && curr.atr_state_15m == AtrState::Expanding,
        compression_event: prev.atr_state_15m != AtrState::Compressing && curr.atr_state_15m == AtrState::Compressing,
    }
}

fn any_liquidity_flag_set(state: &UnifiedBiasState) -> bool {
    state.liquidity.flags().into_iter().any(|f| f)
}

/// Any of the five liquidity booleans transitioning false -> true.
fn liquidity_false_to_true(prev: &UnifiedBiasState, curr: &UnifiedBiasState) -> bool {
    let p = prev.liquidity.flags();
    let c = curr.liquidity.flags();
    p.iter().zip(c.iter()).any(|(p, c)| !p && *c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::{
        Bias, IntentType, Levels, Liquidity, RegimeType, RiskContext, Space, Trigger, TrendPhase,
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
            atr_state_15m: AtrState::Stable,
            gamma: None,
            transitions: Transitions::default(),
            acceleration: None,
            is_stale: false,
            updated_at_ms: 0,
            source: "mtf-engine-v3".to_string(),
            effective: crate::bias::Effective::default(),
        }
    }

    #[test]
    fn first_observation_only_allows_liquidity_event() {
        let mut curr = base_state();
        curr.liquidity.sweep_high = true;
        let t = detect(None, &curr);
        assert!(t.liquidity_event);
        assert!(!t.bias_flip);
        assert!(!t.regime_flip);
    }

    #[test]
    fn bias_flip_detected() {
        let prev = base_state();
        let mut curr = base_state();
        curr.bias = Bias::Bearish;
        let t = detect(Some(&prev), &curr);
        assert!(t.bias_flip);
    }

    #[test]
    fn liquidity_event_only_on_false_to_true() {
        let mut prev = base_state();
        prev.liquidity.sweep_high = true;
        let mut curr = base_state();
        curr.liquidity.sweep_high = true;
        let t = detect(Some(&prev), &curr);
        assert!(!t.liquidity_event, "already-true flag is not a new event");
    }

    #[test]
    fn expansion_event_on_transition_into_expanding() {
        let prev = base_state();
        let mut curr = base_state();
        curr.atr_state_15m = AtrState::Expanding;
        let t = detect(Some(&prev), &curr);
        assert!(t.expansion_event);
        assert!(!t.compression_event);
    }
}
