// =============================================================================
// Bias-State Aggregator
// =============================================================================
//
// Merges upstream bias events (MTF engine, gamma engine) into a single
// UnifiedBiasState per symbol, consumed by the risk model, portfolio guard,
// setup validator, and exit intelligence.
// =============================================================================

pub mod conflict;
pub mod gamma;
pub mod normalizer;
pub mod schema;
pub mod store;
pub mod transitions;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeType {
    Trend,
    Range,
    Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentType {
    Breakout,
    Pullback,
    MeanRevert,
    Neutral,
    NoTrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendPhase {
    Early,
    Mid,
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Levels {
    pub vwap: Option<f64>,
    pub orb_high: Option<f64>,
    pub orb_low: Option<f64>,
    pub swing_high: Option<f64>,
    pub swing_low: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trigger {
    pub pattern: Option<String>,
    pub triggered: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Liquidity {
    pub sweep_high: bool,
    pub sweep_low: bool,
    pub reclaim: bool,
    pub equal_high_cluster: bool,
    pub equal_low_cluster: bool,
}

impl Liquidity {
    /// The five independent boolean flags the transition detector watches
    /// for a false→true edge.
    pub fn flags(&self) -> [bool; 5] {
        [
            self.sweep_high,
            self.sweep_low,
            self.reclaim,
            self.equal_high_cluster,
            self.equal_low_cluster,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub room_to_resistance: RoomLevel,
    pub room_to_support: RoomLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskContext {
    pub invalidation_level: f64,
    pub invalidation_method: String,
    pub entry_mode_hint: IntentType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GammaOverlay {
    pub gamma_regime: String,
    pub zero_gamma_level: f64,
    pub distance_atrs: f64,
}

/// ATR-expansion/compression state used by the transition detector's
/// expansion/compression events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtrState {
    Expanding,
    Compressing,
    Stable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transitions {
    pub bias_flip: bool,
    pub regime_flip: bool,
    pub macro_flip: bool,
    pub intent_change: bool,
    pub liquidity_event: bool,
    pub expansion_event: bool,
    pub compression_event: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acceleration {
    pub state_strength_delta: f64,
    pub intent_momentum_delta: f64,
    pub macro_drift_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Effective {
    pub trade_suppressed: bool,
    pub effective_bias_score: f64,
    pub effective_confidence: f64,
    pub risk_multiplier: f64,
    pub notes: Vec<String>,
}

/// Aggregated market-regime view for a symbol at a moment, combining MTF
/// bias, macro class, regime type, liquidity, space, and optional gamma
/// overlay. Owned and kept current by `store::BiasStateStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedBiasState {
    pub symbol: String,
    pub bias: Bias,
    pub bias_score: f64,
    pub confidence: f64,
    pub alignment_score: f64,
    pub conflict_score: f64,
    pub regime_type: RegimeType,
    pub chop_score: f64,
    pub macro_class: String,
    pub macro_confidence: f64,
    pub intent_type: IntentType,
    pub trend_phase: TrendPhase,
    pub levels: Levels,
    pub trigger: Trigger,
    pub liquidity: Liquidity,
    pub space: Space,
    pub risk_context: RiskContext,
    pub atr_state_15m: AtrState,
    pub gamma: Option<GammaOverlay>,
    pub transitions: Transitions,
    pub acceleration: Option<Acceleration>,
    pub is_stale: bool,
    pub updated_at_ms: i64,
    pub source: String,
    pub effective: Effective,
}
