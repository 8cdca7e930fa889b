// =============================================================================
// In-process indicator derivation
// =============================================================================
//
// Indicators are derived from candles in-process, no extra provider call.
// Reuses the pure functions in `crate::indicators`; cached by the multiplex
// alongside raw candles, keyed by (symbol, timeframe).
// =============================================================================

use std::collections::BTreeMap;

use crate::indicators::{adx, atr, bollinger, ema, roc, rsi};
use crate::market_data::Candle;

/// Compute the standard indicator set from a candle series, oldest first.
///
/// Returns a `BTreeMap`, not a `HashMap` — `MarketContext.context_hash` must
/// be independent of indicator-key iteration order.
pub fn derive_indicators(candles: &[Candle]) -> BTreeMap<String, f64> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut out = BTreeMap::new();

    if let Some(&v) = rsi::calculate_rsi(&closes, 14).last() {
        out.insert("rsi_14".to_string(), v);
    }
    if let Some(&v) = ema::calculate_ema(&closes, 9).last() {
        out.insert("ema_9".to_string(), v);
    }
    if let Some(&v) = ema::calculate_ema(&closes, 21).last() {
        out.insert("ema_21".to_string(), v);
    }
    if let Some(&v) = ema::calculate_ema(&closes, 55).last() {
        out.insert("ema_55".to_string(), v);
    }
    if let Some(v) = atr::calculate_atr(candles, 14) {
        out.insert("atr_14".to_string(), v);
    }
    if let Some(v) = adx::calculate_adx(candles, 14) {
        out.insert("adx_14".to_string(), v);
    }
    if let Some(bb) = bollinger::calculate_bollinger(&closes, 20, 2.0) {
        out.insert("bollinger_width".to_string(), bb.width);
    }
    if let Some(&v) = roc::calculate_roc(&closes, 14).last() {
        out.insert("roc_14".to_string(), v);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: usize) -> Candle {
        let base = 100.0 + i as f64;
        Candle {
            open_time: i as i64,
            close_time: i as i64,
            open: base,
            high: base + 1.0,
            low: base - 1.0,
            close: base + 0.5,
            volume: 1000.0,
        }
    }

    #[test]
    fn derives_full_set_with_enough_history() {
        let candles: Vec<Candle> = (0..60).map(candle).collect();
        let indicators = derive_indicators(&candles);
        assert!(indicators.contains_key("rsi_14"));
        assert!(indicators.contains_key("ema_9"));
        assert!(indicators.contains_key("atr_14"));
        assert!(indicators.contains_key("adx_14"));
        assert!(indicators.contains_key("bollinger_width"));
    }

    #[test]
    fn empty_on_insufficient_history() {
        let candles: Vec<Candle> = (0..3).map(candle).collect();
        let indicators = derive_indicators(&candles);
        assert!(indicators.is_empty());
    }

    #[test]
    fn key_order_is_deterministic() {
        let candles: Vec<Candle> = (0..60).map(candle).collect();
        let a = derive_indicators(&candles);
        let b = derive_indicators(&candles);
        let keys_a: Vec<&String> = a.keys().collect();
        let keys_b: Vec<&String> = b.keys().collect();
        assert_eq!(keys_a, keys_b);
    }
}
