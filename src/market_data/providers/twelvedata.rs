// =============================================================================
// TwelveData Provider — fallback candles and quotes
// =============================================================================
//
// Kept deliberately simple: TwelveData's free tier is almost always the
// fallback, not the primary, provider in the priority list (see Scenario F:
// Alpaca fails, TwelveData answers).
// =============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::market_data::provider::{
    Candle, GexSnapshot, MarketDataProvider, OptionQuote, ProviderId, QuotedPrice,
};

#[derive(Clone)]
pub struct TwelveDataProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl TwelveDataProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key: api_key.into(),
            base_url: "https://api.twelvedata.com".to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(default)]
    values: Vec<TimeSeriesBar>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesBar {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: String,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    close: String,
    bid: Option<String>,
    ask: Option<String>,
}

impl TimeSeriesBar {
    fn into_candle(self) -> Option<Candle> {
        let ts = chrono::NaiveDateTime::parse_from_str(&self.datetime, "%Y-%m-%d %H:%M:%S")
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(0);
        Some(Candle {
            open_time: ts,
            close_time: ts,
            open: self.open.parse().ok()?,
            high: self.high.parse().ok()?,
            low: self.low.parse().ok()?,
            close: self.close.parse().ok()?,
            volume: self.volume.parse().unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl MarketDataProvider for TwelveDataProvider {
    fn id(&self) -> ProviderId {
        ProviderId::TwelveData
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let resp = self
            .client
            .get(format!("{}/time_series", self.base_url))
            .query(&[
                ("symbol", symbol),
                ("interval", timeframe),
                ("outputsize", &limit.to_string()),
                ("apikey", &self.api_key),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<TimeSeriesResponse>()
            .await?;

        debug!(symbol, timeframe, count = resp.values.len(), "twelvedata series fetched");

        let mut candles: Vec<Candle> = resp.values.into_iter().filter_map(|b| b.into_candle()).collect();
        candles.reverse();
        Ok(candles)
    }

    async fn get_stock_price(&self, symbol: &str) -> anyhow::Result<QuotedPrice> {
        let resp = self
            .client
            .get(format!("{}/quote", self.base_url))
            .query(&[("symbol", symbol), ("apikey", &self.api_key)])
            .send()
            .await?
            .error_for_status()?
            .json::<QuoteResponse>()
            .await?;

        let current_price: f64 = resp.close.parse().unwrap_or(0.0);
        let bid: f64 = resp.bid.and_then(|s| s.parse().ok()).unwrap_or(current_price);
        let ask: f64 = resp.ask.and_then(|s| s.parse().ok()).unwrap_or(current_price);

        Ok(QuotedPrice {
            current_price,
            bid,
            ask,
        })
    }

    async fn get_option_price(&self, _option_symbol: &str) -> anyhow::Result<OptionQuote> {
        anyhow::bail!("twelvedata provider does not support option quotes")
    }

    async fn get_gex(&self, _symbol: &str) -> anyhow::Result<GexSnapshot> {
        anyhow::bail!("twelvedata provider does not support GEX")
    }
}
