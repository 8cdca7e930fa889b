// =============================================================================
// Unusual Whales Provider — options flow and gamma exposure (GEX)
// =============================================================================
//
// The only provider in the priority list that answers `get_gex`; every other
// provider's `get_gex` is a hard error so the multiplex falls straight
// through to this one.
// =============================================================================

use async_trait::async_trait;
use serde::Deserialize;

use crate::market_data::provider::{
    Candle, GexSnapshot, MarketDataProvider, OptionQuote, ProviderId, QuotedPrice,
};

#[derive(Clone)]
pub struct UnusualWhalesProvider {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl UnusualWhalesProvider {
    pub fn new(token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            token: token.into(),
            base_url: "https://api.unusualwhales.com".to_string(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GexResponse {
    zero_gamma: f64,
    #[serde(default)]
    regime: String,
}

#[async_trait]
impl MarketDataProvider for UnusualWhalesProvider {
    fn id(&self) -> ProviderId {
        ProviderId::UnusualWhales
    }

    async fn get_candles(
        &self,
        _symbol: &str,
        _timeframe: &str,
        _limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        anyhow::bail!("unusual whales provider does not supply candles")
    }

    async fn get_stock_price(&self, _symbol: &str) -> anyhow::Result<QuotedPrice> {
        anyhow::bail!("unusual whales provider does not supply stock quotes")
    }

    async fn get_option_price(&self, _option_symbol: &str) -> anyhow::Result<OptionQuote> {
        anyhow::bail!("unusual whales provider does not supply option last-price in this deployment")
    }

    async fn get_gex(&self, symbol: &str) -> anyhow::Result<GexSnapshot> {
        let url = format!("{}/api/stock/{}/greek-exposure", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json::<GexResponse>()
            .await?;

        let regime = if resp.regime.is_empty() {
            "unknown".to_string()
        } else {
            resp.regime
        };

        Ok(GexSnapshot {
            zero_gamma_level: resp.zero_gamma,
            gamma_regime: regime,
        })
    }
}
