// =============================================================================
// Alpaca Provider — stock candles, quotes, and (paper) option quotes
// =============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::market_data::provider::{
    Candle, GexSnapshot, MarketDataProvider, OptionQuote, ProviderId, QuotedPrice,
};

#[derive(Clone)]
pub struct AlpacaProvider {
    api_key: String,
    api_secret: String,
    base_url: String,
    data_url: String,
    client: reqwest::Client,
}

impl AlpacaProvider {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            base_url: "https://paper-api.alpaca.markets".to_string(),
            data_url: "https://data.alpaca.markets".to_string(),
            client,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    bars: Vec<AlpacaBar>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    quote: AlpacaQuote,
}

#[derive(Debug, Deserialize)]
struct AlpacaQuote {
    ap: f64,
    bp: f64,
}

#[async_trait]
impl MarketDataProvider for AlpacaProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Alpaca
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let url = format!("{}/v2/stocks/{}/bars", self.data_url, symbol);
        let resp = self
            .authed(self.client.get(&url))
            .query(&[("timeframe", timeframe), ("limit", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json::<BarsResponse>()
            .await?;

        debug!(symbol, timeframe, count = resp.bars.len(), "alpaca bars fetched");

        Ok(resp
            .bars
            .into_iter()
            .map(|b| {
                let ts = chrono::DateTime::parse_from_rfc3339(&b.t)
                    .map(|dt| dt.timestamp_millis())
                    .unwrap_or(0);
                Candle {
                    open_time: ts,
                    close_time: ts,
                    open: b.o,
                    high: b.h,
                    low: b.l,
                    close: b.c,
                    volume: b.v,
                }
            })
            .collect())
    }

    async fn get_stock_price(&self, symbol: &str) -> anyhow::Result<QuotedPrice> {
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_url, symbol);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await?
            .error_for_status()?
            .json::<QuoteResponse>()
            .await?;

        let mid = (resp.quote.ap + resp.quote.bp) / 2.0;
        Ok(QuotedPrice {
            current_price: mid,
            bid: resp.quote.bp,
            ask: resp.quote.ap,
        })
    }

    async fn get_option_price(&self, _option_symbol: &str) -> anyhow::Result<OptionQuote> {
        anyhow::bail!("alpaca provider does not support option quotes in this deployment")
    }

    async fn get_gex(&self, _symbol: &str) -> anyhow::Result<GexSnapshot> {
        anyhow::bail!("alpaca provider does not support GEX")
    }
}
