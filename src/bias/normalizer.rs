// =============================================================================
// Normalizer — V3 payload to UnifiedBiasState
// =============================================================================

use crate::bias::schema::V3Payload;
use crate::bias::{Effective, Transitions, UnifiedBiasState};

/// Convert a validated V3 payload into a fresh `UnifiedBiasState`, copying
/// bias/regime/macro/intent and translating liquidity flags, space labels,
/// levels, and trigger. Transitions are left empty here — the caller
/// computes them against the previous state via `transitions::detect`.
pub fn normalize(payload: V3Payload) -> UnifiedBiasState {
    UnifiedBiasState {
        symbol: payload.symbol,
        bias: payload.bias,
        bias_score: payload.bias_score,
        confidence: payload.confidence,
        alignment_score: payload.alignment_score,
        conflict_score: payload.conflict_score,
        regime_type: payload.regime_type,
        chop_score: payload.chop_score,
        macro_class: payload.macro_block.macro_class,
        macro_confidence: payload.macro_block.macro_confidence,
        intent_type: payload.intent_type,
        trend_phase: payload.trend_phase,
        levels: payload.levels,
        trigger: payload.trigger,
        liquidity: payload.liquidity,
        space: payload.space,
        risk_context: payload.risk_context,
        atr_state_15m: payload.atr_state_15m,
        gamma: None,
        transitions: Transitions::default(),
        acceleration: None,
        is_stale: false,
        updated_at_ms: payload.updated_at_ms,
        source: "mtf-engine-v3".to_string(),
        effective: Effective::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::schema::validate;
    use serde_json::json;

    #[test]
    fn normalizes_macro_and_intent() {
        let raw = json!({
            "symbol": "SPY",
            "source": "mtf-engine-v3",
            "bias": "Bullish",
            "biasScore": 42.0,
            "confidence": 0.8,
            "alignmentScore": 80.0,
            "conflictScore": 0.0,
            "regimeType": "Trend",
            "chopScore": 10.0,
            "macro": {"macroClass": "MACRO_TREND_UP", "macroConfidence": 0.9},
            "intentType": "Breakout",
            "trendPhase": "Mid",
            "trigger": {"pattern": "engulfing", "triggered": true},
            "liquidity": {"sweepHigh": false, "sweepLow": false, "reclaim": false, "equalHighCluster": false, "equalLowCluster": false},
            "space": {"roomToResistance": "High", "roomToSupport": "Medium"},
            "riskContext": {"invalidationLevel": 400.0, "invalidationMethod": "swing_low", "entryModeHint": "Breakout"},
            "updated_at_ms": 0,
        });
        let payload = validate(&raw).unwrap();
        let state = normalize(payload);
        assert_eq!(state.symbol, "SPY");
        assert_eq!(state.macro_class, "MACRO_TREND_UP");
        assert!(!state.is_stale);
    }
}
