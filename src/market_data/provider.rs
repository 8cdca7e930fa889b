// =============================================================================
// Market-Data Provider Contract
// =============================================================================
//
// A single trait every upstream data vendor implements. The multiplex
// (`market_data::mod`) wraps each provider with a circuit breaker, a rate
// limiter, and a cache, and tries providers in priority order.
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single OHLCV candle, vendor-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum ProviderId {
    Alpaca,
    Polygon,
    MarketDataApp,
    TwelveData,
    UnusualWhales,
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Alpaca => "alpaca",
            Self::Polygon => "polygon",
            Self::MarketDataApp => "marketdata",
            Self::TwelveData => "twelvedata",
            Self::UnusualWhales => "unusual_whales",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotedPrice {
    pub current_price: f64,
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub option_symbol: String,
    pub mid_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GexSnapshot {
    pub zero_gamma_level: f64,
    pub gamma_regime: String,
}

/// Contract every market-data vendor must satisfy. Methods return
/// `anyhow::Result` — vendor-specific HTTP/parse failures are opaque to the
/// caller, which only cares whether the call succeeded or not (the circuit
/// breaker and retry logic classify failures, not the provider itself).
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    async fn get_stock_price(&self, symbol: &str) -> anyhow::Result<QuotedPrice>;

    async fn get_option_price(&self, option_symbol: &str) -> anyhow::Result<OptionQuote>;

    /// Options chain/flow and GEX are only meaningfully implemented by
    /// Unusual Whales in this multiplex; other providers return an error
    /// which the caller treats like any other provider failure (falls
    /// through the priority list).
    async fn get_gex(&self, symbol: &str) -> anyhow::Result<GexSnapshot>;
}
