// =============================================================================
// Polygon.io Provider — aggregated bars and last trade/quote
// =============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::market_data::provider::{
    Candle, GexSnapshot, MarketDataProvider, OptionQuote, ProviderId, QuotedPrice,
};

#[derive(Clone)]
pub struct PolygonProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl PolygonProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key: api_key.into(),
            base_url: "https://api.polygon.io".to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AggsResponse {
    #[serde(default)]
    results: Vec<AggBar>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct LastQuoteResponse {
    results: LastQuote,
}

#[derive(Debug, Deserialize)]
struct LastQuote {
    #[serde(rename = "P")]
    ask: f64,
    #[serde(rename = "p")]
    bid: f64,
}

/// Translate a multiplex timeframe (e.g. "5m", "1h") into Polygon's
/// multiplier/timespan pair.
fn to_polygon_range(timeframe: &str) -> (u32, &'static str) {
    if let Some(stripped) = timeframe.strip_suffix('m') {
        (stripped.parse().unwrap_or(5), "minute")
    } else if let Some(stripped) = timeframe.strip_suffix('h') {
        (stripped.parse().unwrap_or(1), "hour")
    } else if let Some(stripped) = timeframe.strip_suffix('d') {
        (stripped.parse().unwrap_or(1), "day")
    } else {
        (5, "minute")
    }
}

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Polygon
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let (multiplier, timespan) = to_polygon_range(timeframe);
        let to = chrono::Utc::now();
        let from = to - chrono::Duration::days(30);
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            self.base_url,
            symbol,
            multiplier,
            timespan,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d"),
        );

        let resp = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str()), ("limit", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json::<AggsResponse>()
            .await?;

        debug!(symbol, timeframe, count = resp.results.len(), "polygon aggs fetched");

        Ok(resp
            .results
            .into_iter()
            .rev()
            .take(limit)
            .rev()
            .map(|b| Candle {
                open_time: b.t,
                close_time: b.t,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
            })
            .collect())
    }

    async fn get_stock_price(&self, symbol: &str) -> anyhow::Result<QuotedPrice> {
        let url = format!("{}/v2/last/nbbo/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<LastQuoteResponse>()
            .await?;

        let mid = (resp.results.ask + resp.results.bid) / 2.0;
        Ok(QuotedPrice {
            current_price: mid,
            bid: resp.results.bid,
            ask: resp.results.ask,
        })
    }

    async fn get_option_price(&self, option_symbol: &str) -> anyhow::Result<OptionQuote> {
        let url = format!("{}/v3/quotes/{}", self.base_url, option_symbol);
        let resp = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<LastQuoteResponse>()
            .await?;

        Ok(OptionQuote {
            option_symbol: option_symbol.to_string(),
            mid_price: (resp.results.ask + resp.results.bid) / 2.0,
        })
    }

    async fn get_gex(&self, _symbol: &str) -> anyhow::Result<GexSnapshot> {
        anyhow::bail!("polygon provider does not support GEX")
    }
}
