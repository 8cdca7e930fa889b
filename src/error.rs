// =============================================================================
// Error Taxonomy — shared across ingestion, orchestration, and workers
// =============================================================================
//
// Every fallible operation in the pipeline returns `Result<T, PipelineError>`.
// The variants mirror the kinds enumerated for the signal-processing
// pipeline: ingestion-layer rejections, enrichment/engine failures, policy
// rejections, and the transient/fatal split that governs retry behaviour.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("duplicate signal (hash {0})")]
    Duplicate(String),

    #[error("enrichment failed: {0}")]
    EnrichmentFailed(String),

    #[error("engine failed: {0}")]
    EngineFailed(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("trade suppressed by risk model")]
    RiskSuppressed,

    #[error("no price available for order pricing")]
    OrderPricingMissing,

    #[error("transient error: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PipelineError {
    /// Whether this error kind should be retried by its caller (worker loop
    /// or provider-aware backoff), as opposed to terminally rejecting the
    /// unit of work.
    pub fn is_retriable(&self) -> bool {
        matches!(self, PipelineError::Transient(_) | PipelineError::Database(_))
    }

    /// The machine-readable rejection reason persisted on a `Signal` row or
    /// surfaced in audit output. Stable across releases — dashboards and
    /// tests match on these strings.
    pub fn reason_code(&self) -> &'static str {
        match self {
            PipelineError::InvalidSignature => "INVALID_SIGNATURE",
            PipelineError::InvalidPayload(_) => "INVALID_PAYLOAD",
            PipelineError::Duplicate(_) => "DUPLICATE",
            PipelineError::EnrichmentFailed(_) => "ENRICHMENT_FAILED",
            PipelineError::EngineFailed(_) => "ENGINE_FAILED",
            PipelineError::PolicyViolation(_) => "POLICY_VIOLATION",
            PipelineError::RiskSuppressed => "RISK_SUPPRESSED",
            PipelineError::OrderPricingMissing => "ORDER_PRICING_MISSING",
            PipelineError::Transient(_) => "TRANSIENT",
            PipelineError::Database(_) => "TRANSIENT",
            PipelineError::Fatal(_) => "FATAL",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
