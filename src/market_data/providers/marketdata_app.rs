// =============================================================================
// MarketData.app Provider — primarily used for option quotes
// =============================================================================

use async_trait::async_trait;
use serde::Deserialize;

use crate::market_data::provider::{
    Candle, GexSnapshot, MarketDataProvider, OptionQuote, ProviderId, QuotedPrice,
};

#[derive(Clone)]
pub struct MarketDataAppProvider {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl MarketDataAppProvider {
    pub fn new(token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            token: token.into(),
            base_url: "https://api.marketdata.app".to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OptionQuoteResponse {
    #[serde(default)]
    mid: Vec<f64>,
}

#[async_trait]
impl MarketDataProvider for MarketDataAppProvider {
    fn id(&self) -> ProviderId {
        ProviderId::MarketDataApp
    }

    async fn get_candles(
        &self,
        _symbol: &str,
        _timeframe: &str,
        _limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        anyhow::bail!("marketdata.app provider is configured for options only in this deployment")
    }

    async fn get_stock_price(&self, _symbol: &str) -> anyhow::Result<QuotedPrice> {
        anyhow::bail!("marketdata.app provider is configured for options only in this deployment")
    }

    async fn get_option_price(&self, option_symbol: &str) -> anyhow::Result<OptionQuote> {
        let url = format!("{}/v1/options/quotes/{}/", self.base_url, option_symbol);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json::<OptionQuoteResponse>()
            .await?;

        let mid_price = resp.mid.first().copied().unwrap_or(0.0);
        Ok(OptionQuote {
            option_symbol: option_symbol.to_string(),
            mid_price,
        })
    }

    async fn get_gex(&self, _symbol: &str) -> anyhow::Result<GexSnapshot> {
        anyhow::bail!("marketdata.app provider does not support GEX")
    }
}
