// =============================================================================
// Engine Invokers
// =============================================================================
//
// Two pluggable decision producers sharing one contract: given the same
// (Signal, MarketContext, UnifiedBiasState), each returns an optional
// TradeRecommendation. The orchestrator depends only on this trait — neither
// invoker knows the other exists, and neither is told whether it is live or
// shadow for a given signal.
// =============================================================================

pub mod engine_a;
pub mod engine_b;

use async_trait::async_trait;

use crate::bias::UnifiedBiasState;
use crate::error::PipelineError;
use crate::types::{MarketContext, Signal, TradeRecommendation, Variant};

/// The byte-identical bundle both engines are invoked with. Built once per
/// signal by the orchestrator and shared by reference so neither invoker can
/// observe a structurally different copy of the other's input.
pub struct EngineInputs<'a> {
    pub signal: &'a Signal,
    pub context: &'a MarketContext,
    pub bias_state: &'a UnifiedBiasState,
}

#[async_trait]
pub trait EngineInvoker: Send + Sync {
    fn variant(&self) -> Variant;

    async fn invoke(
        &self,
        inputs: &EngineInputs<'_>,
    ) -> Result<Option<TradeRecommendation>, PipelineError>;
}
