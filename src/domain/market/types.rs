use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: i64,
}

/// Stddev of the log-returns over the last `window` closes, clamped to
/// `[0, 1]`. Returns 0.5 (mid volatility) when fewer than 2 candles exist.
pub fn volatility_context(candles: &[Candle], window: usize) -> f64 {
    if candles.len() < 2 {
        return 0.5;
    }
    let start = candles.len().saturating_sub(window);
    let closes: Vec<f64> = candles[start..]
        .iter()
        .filter_map(|c| c.close.to_f64())
        .filter(|p| *p > 0.0)
        .collect();
    if closes.len() < 2 {
        return 0.5;
    }
    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt().clamp(0.0, 1.0)
}

/// Stddev of the last `window` log-returns, as a fraction of price. Used as
/// the ATR proxy for stop-distance sizing. None when the series is too short.
pub fn log_return_stddev(candles: &[Candle], window: usize) -> Option<f64> {
    if candles.len() < 2 {
        return None;
    }
    let start = candles.len().saturating_sub(window + 1);
    let closes: Vec<f64> = candles[start..]
        .iter()
        .filter_map(|c| c.close.to_f64())
        .filter(|p| *p > 0.0)
        .collect();
    if closes.len() < 2 {
        return None;
    }
    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(close: Decimal) -> Candle {
        Candle {
            symbol: "BTC/USDT".to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            timestamp: 0,
        }
    }

    #[test]
    fn test_volatility_defaults_to_mid_when_sparse() {
        assert_eq!(volatility_context(&[], 20), 0.5);
        assert_eq!(volatility_context(&[candle(dec!(100))], 20), 0.5);
    }

    #[test]
    fn test_flat_series_has_zero_volatility() {
        let candles: Vec<Candle> = (0..30).map(|_| candle(dec!(100))).collect();
        assert_eq!(volatility_context(&candles, 20), 0.0);
        assert_eq!(log_return_stddev(&candles, 20), Some(0.0));
    }

    #[test]
    fn test_alternating_series_has_positive_volatility() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| candle(if i % 2 == 0 { dec!(100) } else { dec!(105) }))
            .collect();
        assert!(volatility_context(&candles, 20) > 0.0);
        assert!(log_return_stddev(&candles, 20).unwrap() > 0.0);
    }
}
