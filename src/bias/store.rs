// =============================================================================
// Bias State Store — per-symbol keyed state
// =============================================================================
//
// The latest UnifiedBiasState per symbol is kept in process memory. The
// aggregator is idempotent under re-delivery of the same payload: ingesting
// an identical payload twice for a symbol returns the existing state without
// recomputing transitions against itself.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::bias::schema::{self, V3Payload};
use crate::bias::{normalizer, transitions, UnifiedBiasState};
use crate::error::PipelineError;

pub struct BiasStateStore {
    states: RwLock<HashMap<String, UnifiedBiasState>>,
    last_payload_hash: RwLock<HashMap<String, String>>,
}

impl BiasStateStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            last_payload_hash: RwLock::new(HashMap::new()),
        }
    }

    /// Validate, normalize, and merge a raw bias payload for its symbol,
    /// computing transitions against whatever state (if any) was previously
    /// stored for that symbol. Returns the resulting state.
    pub fn ingest(&self, raw: &Value) -> Result<UnifiedBiasState, PipelineError> {
        let payload: V3Payload = schema::validate(raw)?;
        let symbol = payload.symbol.clone();
        let hash = hash_payload(raw);

        if self.last_payload_hash.read().get(&symbol) == Some(&hash) {
            if let Some(existing) = self.states.read().get(&symbol) {
                return Ok(existing.clone());
            }
        }

        let prev = self.states.read().get(&symbol).cloned();
        let mut next = normalizer::normalize(payload);
        next.transitions = transitions::detect(prev.as_ref(), &next);

        self.states.write().insert(symbol.clone(), next.clone());
        self.last_payload_hash.write().insert(symbol, hash);

        Ok(next)
    }

    pub fn get(&self, symbol: &str) -> Option<UnifiedBiasState> {
        self.states.read().get(symbol).cloned()
    }

    pub fn put(&self, state: UnifiedBiasState) {
        self.states.write().insert(state.symbol.clone(), state);
    }
}

impl Default for BiasStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_payload(raw: &Value) -> String {
    let canonical = serde_json::to_vec(raw).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload(symbol: &str, bias: &str) -> Value {
        json!({
            "symbol": symbol, "source": "mtf-engine-v3", "bias": bias, "biasScore": 10.0,
            "confidence": 0.5, "alignmentScore": 50.0, "conflictScore": 0.0, "regimeType": "Trend",
            "chopScore": 10.0, "macro": {"macroClass": "MACRO_TREND_UP", "macroConfidence": 0.8},
            "intentType": "Breakout", "trendPhase": "Mid",
            "trigger": {"pattern": null, "triggered": false},
            "liquidity": {"sweepHigh": false, "sweepLow": false, "reclaim": false, "equalHighCluster": false, "equalLowCluster": false},
            "space": {"roomToResistance": "High", "roomToSupport": "Medium"},
            "riskContext": {"invalidationLevel": 400.0, "invalidationMethod": "swing_low", "entryModeHint": "Breakout"},
            "updated_at_ms": 0,
        })
    }

    #[test]
    fn ingest_then_get_round_trips() {
        let store = BiasStateStore::new();
        let payload = sample_payload("SPY", "Bullish");
        let state = store.ingest(&payload).unwrap();
        assert_eq!(state.symbol, "SPY");
        assert_eq!(store.get("SPY").unwrap().bias_score, state.bias_score);
    }

    #[test]
    fn repeated_identical_payload_is_idempotent() {
        let store = BiasStateStore::new();
        let payload = sample_payload("SPY", "Bullish");
        let first = store.ingest(&payload).unwrap();
        let second = store.ingest(&payload).unwrap();
        assert!(!second.transitions.bias_flip);
        assert_eq!(first.updated_at_ms, second.updated_at_ms);
    }

    #[test]
    fn distinct_payload_recomputes_transitions() {
        let store = BiasStateStore::new();
        store.ingest(&sample_payload("SPY", "Bullish")).unwrap();
        let second = store.ingest(&sample_payload("SPY", "Bearish")).unwrap();
        assert!(second.transitions.bias_flip);
    }
}
