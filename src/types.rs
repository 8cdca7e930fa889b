// =============================================================================
// Domain types shared across the signal-processing pipeline
// =============================================================================
//
// These mirror the entities of the data model: Signal, WebhookEvent,
// MarketContext, Experiment, ExecutionPolicy, TradeRecommendation, Order,
// Trade, Position. UnifiedBiasState lives in `bias::mod` since it is owned
// by the bias aggregator; the two config documents live in `adaptive_tuner.rs`.
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(format!("invalid direction: {other}")),
        }
    }
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum SignalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum WebhookStatus {
    Accepted,
    Duplicate,
    InvalidSignature,
    InvalidPayload,
    Error,
}

/// A normalized trading-opportunity record, subject to dedup and enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: String,
    pub source_timestamp: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
    pub signal_hash: String,
    pub status: SignalStatus,
    pub processed: bool,
    pub processing_lock: bool,
    pub processing_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub experiment_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub is_test: bool,
    pub created_at: DateTime<Utc>,
}

/// A request-scoped webhook-delivery audit row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub signal_id: Option<Uuid>,
    pub status: WebhookStatus,
    pub request_id: String,
    pub processing_time_ms: i64,
    pub error_message: Option<String>,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Gamma-regime overlay carried on a `MarketContext`, when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketIntel {
    pub gamma_regime: String,
    pub zero_gamma_level: f64,
    pub distance_atrs: f64,
}

/// Immutable snapshot of market state at signal time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub snapshot_timestamp: DateTime<Utc>,
    pub symbol: String,
    pub current_price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    /// Named-number map of indicators. A `BTreeMap` (not `HashMap`) so
    /// serialization and hashing are key-order independent by construction —
    /// see `context_hash` in `market_data::indicators`.
    pub indicators: BTreeMap<String, f64>,
    pub market_intel: Option<MarketIntel>,
    pub context_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum Variant {
    A,
    B,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

impl Variant {
    pub fn other(self) -> Variant {
        match self {
            Variant::A => Variant::B,
            Variant::B => Variant::A,
        }
    }
}

/// The A/B assignment record linking a signal to a variant.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Experiment {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub variant: Variant,
    pub assignment_hash: String,
    pub split_percentage: f64,
    pub policy_version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    ShadowOnly,
    EngineAPrimary,
    EngineBPrimary,
    SplitCapital,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHADOW_ONLY" => Ok(Self::ShadowOnly),
            "ENGINE_A_PRIMARY" => Ok(Self::EngineAPrimary),
            "ENGINE_B_PRIMARY" => Ok(Self::EngineBPrimary),
            "SPLIT_CAPITAL" => Ok(Self::SplitCapital),
            other => Err(format!("invalid execution mode: {other}")),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ShadowOnly => "SHADOW_ONLY",
            Self::EngineAPrimary => "ENGINE_A_PRIMARY",
            Self::EngineBPrimary => "ENGINE_B_PRIMARY",
            Self::SplitCapital => "SPLIT_CAPITAL",
        };
        write!(f, "{s}")
    }
}

/// Declarative record of which engine runs live vs shadow for an experiment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExecutionPolicy {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub execution_mode: ExecutionMode,
    pub executed_engine: Option<Variant>,
    pub shadow_engine: Option<Variant>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// A decision producer's output for one engine on one experiment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeRecommendation {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub engine: Variant,
    pub symbol: String,
    pub direction: Direction,
    pub strike: f64,
    pub expiration: DateTime<Utc>,
    pub quantity: i32,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub is_shadow: bool,
    /// Snapshot of the bias state that produced this recommendation, carried
    /// forward onto Order and Position so the adaptive tuner can compute its
    /// rolling statistics without re-deriving them from historical state.
    pub strategy_type: Option<String>,
    pub regime_at_entry: Option<String>,
    pub trend_phase_at_entry: Option<String>,
    pub high_acceleration_entry: bool,
    pub macro_class_at_entry: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum OrderStatus {
    PendingExecution,
    Filled,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub recommendation_id: Uuid,
    pub option_symbol: String,
    pub strike: f64,
    pub expiration: DateTime<Utc>,
    pub option_type: OptionType,
    pub quantity: i32,
    pub order_type: String,
    pub status: OrderStatus,
    pub engine: Variant,
    pub stop_loss: Option<f64>,
    pub strategy_type: Option<String>,
    pub regime_at_entry: Option<String>,
    pub trend_phase_at_entry: Option<String>,
    pub high_acceleration_entry: bool,
    pub macro_class_at_entry: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub order_id: Uuid,
    pub fill_price: f64,
    pub quantity: i32,
    pub filled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Position {
    pub id: Uuid,
    pub order_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub current_price: f64,
    pub quantity: i32,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub status: PositionStatus,
    /// Macro class recorded at entry, used by the portfolio guard's
    /// macro-bias-cluster rule to find correlated open positions.
    pub macro_class_at_entry: Option<String>,
    pub strategy_type: Option<String>,
    pub regime_at_entry: Option<String>,
    pub trend_phase_at_entry: Option<String>,
    pub high_acceleration_entry: bool,
    pub stop_loss: Option<f64>,
    /// Tag of the exit_intelligence rule that forced the exit, when any.
    pub exit_reason: Option<String>,
    /// Serialized `UnifiedBiasState` observed for the symbol at fill time,
    /// reconstructed into `ExitInputs.entry_state` by the position refresher
    /// so entry-vs-current bias delta rules (acceleration decay) have a real
    /// entry snapshot instead of `None`.
    pub entry_bias_state: Option<serde_json::Value>,
    pub entry_timestamp: DateTime<Utc>,
    pub exit_timestamp: Option<DateTime<Utc>>,
}

/// Payload accepted by the webhook ingestor, before it becomes a `Signal`.
/// Required fields are named explicitly; anything else the sender included
/// is captured in `extra` and preserved verbatim in `raw_payload`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub symbol: String,
    pub direction: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
