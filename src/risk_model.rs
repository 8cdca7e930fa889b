// =============================================================================
// Risk Model Integration
// =============================================================================
//
// Computes a position size multiplier bounded in [0.25, 1.5] from base risk,
// direction, strategy type, and the UnifiedBiasState. Pure with respect to
// its inputs plus the "risk" BiasConfig document.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::bias::{IntentType, RegimeType, TrendPhase, UnifiedBiasState};
use crate::error::PipelineError;
use crate::types::Direction;

const MIN_MULTIPLIER: f64 = 0.25;
const MAX_MULTIPLIER: f64 = 1.5;

/// Strategy classification used by the regime modifier and portfolio guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyType {
    Breakout,
    Pullback,
    MeanRevert,
}

/// The "risk" BiasConfig document — bounded parameters the adaptive tuner
/// nudges daily.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub range_breakout_multiplier: f64,
    pub state_strength_up_multiplier: f64,
    pub macro_drift_threshold: f64,
    pub late_phase_negative_multiplier: f64,
    pub aggregator_multiplier: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            range_breakout_multiplier: 0.7,
            state_strength_up_multiplier: 1.2,
            macro_drift_threshold: 0.18,
            late_phase_negative_multiplier: 0.75,
            aggregator_multiplier: 1.0,
        }
    }
}

/// Per-modifier contribution, surfaced for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub base_risk: f64,
    pub aggregator_modifier: f64,
    pub macro_modifier: f64,
    pub regime_modifier: f64,
    pub acceleration_modifier: f64,
    pub late_phase_modifier: f64,
    pub staleness_modifier: f64,
    pub final_multiplier: f64,
}

/// Compute the final position size multiplier and its audit breakdown.
///
/// `market_state` is required whenever risk sizing is configured to depend on
/// it; this crate always supplies it from the bias-state store, so the only
/// failure path is a caller bug, surfaced as `MODEL_STATE_MISSING`.
pub fn compute_multiplier(
    base_risk: f64,
    direction: Direction,
    strategy: StrategyType,
    market_state: Option<&UnifiedBiasState>,
    config: &RiskConfig,
) -> Result<RiskBreakdown, PipelineError> {
    let state = market_state.ok_or_else(|| {
        PipelineError::PolicyViolation("MODEL_STATE_MISSING".to_string())
    })?;

    let macro_modifier = macro_modifier(state, direction);
    let regime_modifier = regime_modifier(state, strategy);
    let acceleration_modifier = acceleration_modifier(state);
    let late_phase_modifier = late_phase_modifier(state, config);
    let staleness_modifier = if state.is_stale { 0.7 } else { 1.0 };

    let raw = base_risk
        * config.aggregator_multiplier
        * macro_modifier
        * regime_modifier
        * acceleration_modifier
        * late_phase_modifier
        * staleness_modifier;

    let final_multiplier = raw.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER);

    Ok(RiskBreakdown {
        base_risk,
        aggregator_modifier: config.aggregator_multiplier,
        macro_modifier,
        regime_modifier,
        acceleration_modifier,
        late_phase_modifier,
        staleness_modifier,
        final_multiplier,
    })
}

/// Maps the bias aggregator's intent classification onto a strategy type.
/// Neutral and no-trade intents carry no actionable strategy.
pub fn strategy_type_from_intent(intent: IntentType) -> Option<StrategyType> {
    match intent {
        IntentType::Breakout => Some(StrategyType::Breakout),
        IntentType::Pullback => Some(StrategyType::Pullback),
        IntentType::MeanRevert => Some(StrategyType::MeanRevert),
        IntentType::Neutral | IntentType::NoTrade => None,
    }
}

/// True when the bias state's macro classification is a confirmed bearish
/// breakdown, as used by the portfolio guard's macro-bias-cluster rule.
pub fn is_macro_bearish_confirmed(state: &UnifiedBiasState) -> bool {
    state.macro_class == "MACRO_BREAKDOWN_CONFIRMED"
}

fn macro_modifier(state: &UnifiedBiasState, direction: Direction) -> f64 {
    match (state.macro_class.as_str(), direction) {
        ("MACRO_BREAKDOWN_CONFIRMED", Direction::Long) => 0.5,
        ("MACRO_BREAKDOWN_CONFIRMED", Direction::Short) => 1.15,
        ("MACRO_TREND_UP", Direction::Long) => 1.15,
        ("MACRO_TREND_UP", Direction::Short) => 0.7,
        ("MACRO_TREND_DOWN", Direction::Short) => 1.15,
        ("MACRO_TREND_DOWN", Direction::Long) => 0.7,
        _ => 1.0,
    }
}

fn regime_modifier(state: &UnifiedBiasState, strategy: StrategyType) -> f64 {
    match (state.regime_type, strategy) {
        (RegimeType::Range, StrategyType::Breakout) => 0.7,
        (RegimeType::Trend, _) if state.alignment_score > 75.0 => 1.1,
        _ => 1.0,
    }
}

/// Linear interpolation of stateStrengthDelta between the documented
/// endpoints: >15 up to 1.2, <-20 down to 0.8, flat at 1.0 in between.
fn acceleration_modifier(state: &UnifiedBiasState) -> f64 {
    let delta = match &state.acceleration {
        Some(a) => a.state_strength_delta,
        None => return 1.0,
    };

    if delta > 15.0 {
        (1.0 + (delta - 15.0) / 100.0).min(1.2)
    } else if delta < -20.0 {
        (1.0 + (delta + 20.0) / 100.0).max(0.8)
    } else {
        1.0
    }
}

fn late_phase_modifier(state: &UnifiedBiasState, config: &RiskConfig) -> f64 {
    let negative_delta = state
        .acceleration
        .as_ref()
        .map(|a| a.state_strength_delta < 0.0)
        .unwrap_or(false);

    if state.trend_phase == TrendPhase::Late && negative_delta {
        config.late_phase_negative_multiplier
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::{
        Acceleration, Bias, IntentType, Levels, Liquidity, RiskContext, Space, Trigger,
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
            transitions: crate::bias::Transitions::default(),
            acceleration: None,
            is_stale: false,
            updated_at_ms: 0,
            source: "mtf-engine-v3".to_string(),
            effective: crate::bias::Effective::default(),
        }
    }

    #[test]
    fn missing_state_is_policy_violation() {
        let err = compute_multiplier(1.0, Direction::Long, StrategyType::Breakout, None, &RiskConfig::default());
        assert!(matches!(err, Err(PipelineError::PolicyViolation(_))));
    }

    #[test]
    fn result_always_within_bounds() {
        let mut state = base_state();
        state.acceleration = Some(Acceleration {
            state_strength_delta: 50.0,
            intent_momentum_delta: 0.0,
            macro_drift_score: 0.0,
        });
        let result = compute_multiplier(10.0, Direction::Long, StrategyType::Breakout, Some(&state), &RiskConfig::default()).unwrap();
        assert!((MIN_MULTIPLIER..=MAX_MULTIPLIER).contains(&result.final_multiplier));
    }

    #[test]
    fn macro_breakdown_confirmed_halves_long_risk() {
        let mut state = base_state();
        state.macro_class = "MACRO_BREAKDOWN_CONFIRMED".to_string();
        let result = compute_multiplier(1.0, Direction::Long, StrategyType::Pullback, Some(&state), &RiskConfig::default()).unwrap();
        assert_eq!(result.macro_modifier, 0.5);
    }

    #[test]
    fn stale_state_applies_070_penalty() {
        let mut state = base_state();
        state.is_stale = true;
        let result = compute_multiplier(1.0, Direction::Long, StrategyType::Pullback, Some(&state), &RiskConfig::default()).unwrap();
        assert_eq!(result.staleness_modifier, 0.7);
    }

    #[test]
    fn late_phase_with_negative_delta_applies_penalty() {
        let mut state = base_state();
        state.trend_phase = TrendPhase::Late;
        state.acceleration = Some(Acceleration {
            state_strength_delta: -5.0,
            intent_momentum_delta: 0.0,
            macro_drift_score: 0.0,
        });
        let result = compute_multiplier(1.0, Direction::Long, StrategyType::Pullback, Some(&state), &RiskConfig::default()).unwrap();
        assert_eq!(result.late_phase_modifier, 0.75);
    }
}
