// =============================================================================
// Market Data Multiplex
// =============================================================================
//
// Presents one interface for candles, stock price, option price, and GEX
// across five vendor providers. Each provider is wrapped with its own
// circuit breaker, rate limiter, and response cache; calls are tried in
// priority order and concurrent callers for the same key are coalesced
// through a single-flight map.
// =============================================================================

pub mod cache;
pub mod circuit_breaker;
pub mod indicators;
pub mod provider;
pub mod providers;
pub mod rate_limiter;
pub mod single_flight;

pub use provider::{Candle, GexSnapshot, MarketDataProvider, OptionQuote, ProviderId, QuotedPrice};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::PipelineError;
use cache::{CacheRead, TtlCache};
use circuit_breaker::CircuitBreaker;
use rate_limiter::RateLimiter;
use single_flight::SingleFlight;

const CANDLES_TTL: Duration = Duration::from_secs(60);
const PRICE_TTL: Duration = Duration::from_secs(30);
const INDICATORS_TTL: Duration = Duration::from_secs(60);
const OPTION_TTL: Duration = Duration::from_secs(60);
const GEX_TTL: Duration = Duration::from_secs(300);

struct ProviderSlot {
    provider: Arc<dyn MarketDataProvider>,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
}

/// A value read through the multiplex, annotated with whether it came from a
/// live call or stale cache served after every provider failed.
#[derive(Debug, Clone)]
pub struct Reading<T> {
    pub value: T,
    pub stale: bool,
    pub source: Option<ProviderId>,
}

/// Wraps the provider priority list with circuit breakers, rate limiters,
/// per-method caches, and single-flight coalescing.
pub struct MarketDataMultiplex {
    slots: Vec<ProviderSlot>,
    candle_cache: TtlCache<(String, String), Vec<Candle>>,
    price_cache: TtlCache<String, QuotedPrice>,
    indicator_cache: TtlCache<(String, String), BTreeMap<String, f64>>,
    option_cache: TtlCache<String, OptionQuote>,
    gex_cache: TtlCache<String, GexSnapshot>,
    candle_flight: SingleFlight<(String, String), (Vec<Candle>, ProviderId)>,
    price_flight: SingleFlight<String, (QuotedPrice, ProviderId)>,
    option_flight: SingleFlight<String, (OptionQuote, ProviderId)>,
    gex_flight: SingleFlight<String, (GexSnapshot, ProviderId)>,
}

impl MarketDataMultiplex {
    /// Build a multiplex from an explicit provider priority list (highest
    /// priority first, matching `runtime_config`'s `market_data_provider_priority`).
    pub fn new(priority: Vec<Arc<dyn MarketDataProvider>>) -> Self {
        let slots = priority
            .into_iter()
            .map(|provider| ProviderSlot {
                provider,
                breaker: CircuitBreaker::new(5, 60_000),
                limiter: RateLimiter::new(5.0, 5.0),
            })
            .collect();

        Self {
            slots,
            candle_cache: TtlCache::new(CANDLES_TTL),
            price_cache: TtlCache::new(PRICE_TTL),
            indicator_cache: TtlCache::new(INDICATORS_TTL),
            option_cache: TtlCache::new(OPTION_TTL),
            gex_cache: TtlCache::new(GEX_TTL),
            candle_flight: SingleFlight::new(),
            price_flight: SingleFlight::new(),
            option_flight: SingleFlight::new(),
            gex_flight: SingleFlight::new(),
        }
    }

    pub async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Reading<Vec<Candle>>, PipelineError> {
        let key = (symbol.to_string(), timeframe.to_string());
        if let CacheRead::Fresh(v) = self.candle_cache.get(&key) {
            return Ok(Reading {
                value: v,
                stale: false,
                source: None,
            });
        }

        let result = self
            .candle_flight
            .run(key.clone(), || {
                self.try_providers(move |p| {
                    let symbol = symbol.to_string();
                    let timeframe = timeframe.to_string();
                    Box::pin(async move { p.get_candles(&symbol, &timeframe, limit).await })
                })
            })
            .await;

        self.finish(&key, &self.candle_cache, result)
    }

    pub async fn get_stock_price(&self, symbol: &str) -> Result<Reading<QuotedPrice>, PipelineError> {
        let key = symbol.to_string();
        if let CacheRead::Fresh(v) = self.price_cache.get(&key) {
            return Ok(Reading {
                value: v,
                stale: false,
                source: None,
            });
        }

        let result = self
            .price_flight
            .run(key.clone(), || {
                self.try_providers(move |p| {
                    let symbol = symbol.to_string();
                    Box::pin(async move { p.get_stock_price(&symbol).await })
                })
            })
            .await;

        self.finish(&key, &self.price_cache, result)
    }

    pub async fn get_option_price(&self, option_symbol: &str) -> Result<Reading<OptionQuote>, PipelineError> {
        let key = option_symbol.to_string();
        if let CacheRead::Fresh(v) = self.option_cache.get(&key) {
            return Ok(Reading {
                value: v,
                stale: false,
                source: None,
            });
        }

        let result = self
            .option_flight
            .run(key.clone(), || {
                self.try_providers(move |p| {
                    let option_symbol = option_symbol.to_string();
                    Box::pin(async move { p.get_option_price(&option_symbol).await })
                })
            })
            .await;

        self.finish(&key, &self.option_cache, result)
    }

    pub async fn get_gex(&self, symbol: &str) -> Result<Reading<GexSnapshot>, PipelineError> {
        let key = symbol.to_string();
        if let CacheRead::Fresh(v) = self.gex_cache.get(&key) {
            return Ok(Reading {
                value: v,
                stale: false,
                source: None,
            });
        }

        let result = self
            .gex_flight
            .run(key.clone(), || {
                self.try_providers(move |p| {
                    let symbol = symbol.to_string();
                    Box::pin(async move { p.get_gex(&symbol).await })
                })
            })
            .await;

        self.finish(&key, &self.gex_cache, result)
    }

    /// Derive indicators from cached/fresh candles and cache the result
    /// separately, keyed by (symbol, timeframe), under its own TTL.
    pub async fn get_indicators(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Reading<BTreeMap<String, f64>>, PipelineError> {
        let key = (symbol.to_string(), timeframe.to_string());
        if let CacheRead::Fresh(v) = self.indicator_cache.get(&key) {
            return Ok(Reading {
                value: v,
                stale: false,
                source: None,
            });
        }

        let candles = self.get_candles(symbol, timeframe, limit).await?;
        let derived = indicators::derive_indicators(&candles.value);
        self.indicator_cache.put(key, derived.clone());

        Ok(Reading {
            value: derived,
            stale: candles.stale,
            source: candles.source,
        })
    }

    /// Try each provider in priority order. Skips a provider whose breaker is
    /// open or whose bucket has no tokens; resets that provider's breaker on
    /// success, records a failure and moves on otherwise.
    async fn try_providers<T, F>(&self, mut call: F) -> Result<(T, ProviderId), String>
    where
        F: FnMut(
            Arc<dyn MarketDataProvider>,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<T>> + Send>>,
    {
        let mut last_err = "no providers configured".to_string();

        for slot in &self.slots {
            if !slot.breaker.allow_call() {
                debug!(provider = %slot.provider.id(), "skipping provider, breaker open");
                continue;
            }
            if !slot.limiter.try_acquire() {
                debug!(provider = %slot.provider.id(), "skipping provider, rate limited");
                continue;
            }

            match call(slot.provider.clone()).await {
                Ok(value) => {
                    slot.breaker.record_success();
                    return Ok((value, slot.provider.id()));
                }
                Err(e) => {
                    warn!(provider = %slot.provider.id(), error = %e, "provider call failed");
                    slot.breaker.record_failure();
                    last_err = e.to_string();
                }
            }
        }

        Err(last_err)
    }

    /// Turn a `try_providers` result into a `Reading`, falling back to stale
    /// cache on total failure, or a `Transient` error if nothing is cached.
    fn finish<K, V>(
        &self,
        key: &K,
        cache: &TtlCache<K, V>,
        result: Result<(V, ProviderId), String>,
    ) -> Result<Reading<V>, PipelineError>
    where
        K: std::hash::Hash + Eq + Clone,
        V: Clone,
    {
        match result {
            Ok((value, source)) => {
                cache.put(key.clone(), value.clone());
                Ok(Reading {
                    value,
                    stale: false,
                    source: Some(source),
                })
            }
            Err(e) => match cache.get(key) {
                CacheRead::Stale(v) => {
                    warn!(error = %e, "all providers failed, serving stale cache");
                    Ok(Reading {
                        value: v,
                        stale: true,
                        source: None,
                    })
                }
                _ => Err(PipelineError::Transient(format!(
                    "all market data providers failed and no cached value exists: {e}"
                ))),
            },
        }
    }
}
