// =============================================================================
// Conflict Resolver
// =============================================================================
//
// When multiple sources (MTF engine, gamma engine) publish states for the
// same symbol, blend biasScore as a weighted combination. With one source,
// return it unchanged.
// =============================================================================

use crate::bias::UnifiedBiasState;

#[derive(Debug, Clone, Copy)]
pub struct ConflictWeights {
    pub mtf: f64,
    pub gamma: f64,
}

impl Default for ConflictWeights {
    fn default() -> Self {
        Self { mtf: 0.7, gamma: 0.3 }
    }
}

/// Resolve conflicting states for the same symbol. `states` is expected in
/// (mtf, gamma) priority order when two are present; any additional sources
/// beyond the first two are folded in at the gamma weight.
pub fn resolve(states: &[UnifiedBiasState], weights: ConflictWeights) -> Option<UnifiedBiasState> {
    match states.len() {
        0 => None,
        1 => Some(states[0].clone()),
        _ => {
            let mtf = &states[0];
            let total_other_weight: f64 = weights.gamma * (states.len() - 1) as f64;
            let blended_score = states[1..]
                .iter()
                .fold(mtf.bias_score * weights.mtf, |acc, s| acc + s.bias_score * weights.gamma)
                / (weights.mtf + total_other_weight);

            let mut merged = mtf.clone();
            merged.bias_score = blended_score;
            merged.conflict_score = (mtf.bias_score - states[1].bias_score).abs();
            Some(merged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::normalizer::normalize;
    use crate::bias::schema::validate;
    use serde_json::json;

    fn state_with_score(score: f64) -> UnifiedBiasState {
        let raw = json!({
            "symbol": "SPY", "source": "mtf-engine-v3", "bias": "Bullish", "biasScore": score,
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
    fn single_source_passes_through_unchanged() {
        let a = state_with_score(10.0);
        let resolved = resolve(&[a], ConflictWeights::default()).unwrap();
        assert_eq!(resolved.bias_score, 10.0);
    }

    #[test]
    fn two_sources_blend_with_default_weights() {
        let mtf = state_with_score(100.0);
        let gamma = state_with_score(0.0);
        let resolved = resolve(&[mtf, gamma], ConflictWeights::default()).unwrap();
        assert!((resolved.bias_score - 70.0).abs() < 1e-9);
    }

    #[test]
    fn no_sources_returns_none() {
        assert!(resolve(&[], ConflictWeights::default()).is_none());
    }
}
