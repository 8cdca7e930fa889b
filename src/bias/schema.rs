// =============================================================================
// Schema Validator — V3 bias payload
// =============================================================================
//
// Accepts V3 payloads: macro + intent + liquidity + space + trigger present,
// source tag matching the V3 engine. Rejects payloads missing macro or
// carrying the wrong source.
// =============================================================================

use serde::Deserialize;
use serde_json::Value;

use crate::bias::{AtrState, Bias, IntentType, Levels, Liquidity, RegimeType, RiskContext, Space, Trigger, TrendPhase};
use crate::error::PipelineError;

const V3_SOURCE_TAG: &str = "mtf-engine-v3";

#[derive(Debug, Clone, Deserialize)]
pub struct MacroBlock {
    #[serde(rename = "macroClass")]
    pub macro_class: String,
    #[serde(rename = "macroConfidence")]
    pub macro_confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V3Payload {
    pub symbol: String,
    pub source: String,
    pub bias: Bias,
    #[serde(rename = "biasScore")]
    pub bias_score: f64,
    pub confidence: f64,
    #[serde(rename = "alignmentScore")]
    pub alignment_score: f64,
    #[serde(rename = "conflictScore", default)]
    pub conflict_score: f64,
    #[serde(rename = "regimeType")]
    pub regime_type: RegimeType,
    #[serde(rename = "chopScore", default)]
    pub chop_score: f64,
    #[serde(rename = "macro")]
    pub macro_block: MacroBlock,
    #[serde(rename = "intentType")]
    pub intent_type: IntentType,
    #[serde(rename = "trendPhase")]
    pub trend_phase: TrendPhase,
    #[serde(default)]
    pub levels: Levels,
    pub trigger: Trigger,
    pub liquidity: Liquidity,
    pub space: Space,
    #[serde(rename = "riskContext")]
    pub risk_context: RiskContext,
    #[serde(rename = "atrState15m", default = "default_atr_state")]
    pub atr_state_15m: AtrState,
    pub updated_at_ms: i64,
}

fn default_atr_state() -> AtrState {
    AtrState::Stable
}

/// Classify a raw JSON payload as V3 when either the source tag matches or
/// the structural keys (macro + intent + liquidity + space + trigger) are
/// all present — a looser fallback for producers that omit the tag.
pub fn is_v3(raw: &Value) -> bool {
    let obj = match raw.as_object() {
        Some(o) => o,
        None => return false,
    };

    if obj.get("source").and_then(Value::as_str) == Some(V3_SOURCE_TAG) {
        return true;
    }

    ["macro", "intentType", "liquidity", "space", "trigger"]
        .iter()
        .all(|key| obj.contains_key(*key))
}

/// Validate and parse a raw bias payload into a typed `V3Payload`.
///
/// Rejects payloads missing the `macro` block or carrying a source tag that
/// isn't the V3 engine's (when the tag is present at all).
pub fn validate(raw: &Value) -> Result<V3Payload, PipelineError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| PipelineError::InvalidPayload("bias payload is not a JSON object".to_string()))?;

    if !obj.contains_key("macro") {
        return Err(PipelineError::InvalidPayload(
            "bias payload missing macro block".to_string(),
        ));
    }

    if let Some(source) = obj.get("source").and_then(Value::as_str) {
        if source != V3_SOURCE_TAG {
            return Err(PipelineError::InvalidPayload(format!(
                "bias payload source '{source}' is not the V3 engine"
            )));
        }
    }

    serde_json::from_value(raw.clone())
        .map_err(|e| PipelineError::InvalidPayload(format!("bias payload shape invalid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> Value {
        json!({
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
        })
    }

    #[test]
    fn accepts_tagged_v3_payload() {
        assert!(is_v3(&valid_payload()));
        assert!(validate(&valid_payload()).is_ok());
    }

    #[test]
    fn rejects_missing_macro() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("macro");
        assert!(!is_v3(&payload));
        assert!(validate(&payload).is_err());
    }

    #[test]
    fn rejects_wrong_source() {
        let mut payload = valid_payload();
        payload["source"] = json!("legacy-engine");
        assert!(validate(&payload).is_err());
    }

    #[test]
    fn structural_fallback_without_source_tag() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("source");
        assert!(is_v3(&payload));
    }
}
