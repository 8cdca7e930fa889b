// =============================================================================
// Gamma Merge
// =============================================================================
//
// Overlays a gamma-context document onto a state's gamma field, preserving
// every other field untouched.
// =============================================================================

use crate::bias::{GammaOverlay, UnifiedBiasState};

pub fn merge(state: &mut UnifiedBiasState, gamma: GammaOverlay) {
    state.gamma = Some(gamma);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::normalizer::normalize;
    use crate::bias::schema::validate;
    use serde_json::json;

    fn sample_state() -> UnifiedBiasState {
        let raw = json!({
            "symbol": "SPY", "source": "mtf-engine-v3", "bias": "Bullish", "biasScore": 10.0,
            "confidence": 0.5, "alignmentScore": 50.0, "conflictScore": 0.0, "regimeType": "Trend",
            "chopScore": 10.0, "macro": {"macroClass": "MACRO_TREND_UP", "macroConfidence": 0.8},
            "intentType": "Breakout", "trendPhase": "Mid",
            "trigger": {"pattern": null, "triggered": false},
            "liquidity": {"sweepHigh": false, "sweepLow": false, "reclaim": false, "equalHighCluster": false, "equalLowCluster": false},
            "space": {"roomToResistance": "High", "roomToSupport": "Medium"},
            "riskContext": {"invalidationLevel": 400.0, "invalidationMethod": "swing_low", "entryModeHint": "Breakout"},
            "updated_at_ms": 0,
        });
        normalize(validate(&raw).unwrap())
    }

    #[test]
    fn merge_sets_gamma_without_touching_rest() {
        let mut state = sample_state();
        let before_macro = state.macro_class.clone();
        merge(
            &mut state,
            GammaOverlay {
                gamma_regime: "positive".to_string(),
                zero_gamma_level: 450.0,
                distance_atrs: 1.2,
            },
        );
        assert_eq!(state.macro_class, before_macro);
        assert_eq!(state.gamma.unwrap().gamma_regime, "positive");
    }
}
