// =============================================================================
// Fibonacci retracement levels, swing detection, and EMA trend
// =============================================================================
//
// Swing-window scan and retracement math follow
// `original_source/backend/actions/mt5/market_data.py`'s
// `calculate_fibonacci_levels`/`detect_trend`/`calculate_momentum`, re-expressed
// as pure functions over `Candle` slices with an EMA(20)/EMA(50) dead-zone
// crossover in place of the original's simple average comparison.
// =============================================================================

use crate::broker::Candle;
use crate::indicators::ema::calculate_ema;
use crate::indicators::roc::calculate_roc;

/// `high - (high - low) * r` for the five standard retracement ratios.
pub const FIBO_RATIOS: [(&str, f64); 5] = [
    ("0.236", 0.236),
    ("0.382", 0.382),
    ("0.5", 0.5),
    ("0.618", 0.618),
    ("0.786", 0.786),
];

/// A swing high/low pair detected over the lookback window, plus every
/// retracement level derived from it.
#[derive(Debug, Clone, Copy)]
pub struct SwingLevels {
    pub swing_high: f64,
    pub swing_low: f64,
}

impl SwingLevels {
    /// The price for a named ratio (e.g. `"0.618"`), or `None` if `level` is
    /// not one of [`FIBO_RATIOS`]'s keys.
    pub fn level(&self, level: &str) -> Option<f64> {
        let (_, r) = FIBO_RATIOS.iter().find(|(name, _)| *name == level)?;
        Some(self.swing_high - (self.swing_high - self.swing_low) * r)
    }
}

/// A bar is a swing high (resp. low) iff its high (resp. low) is strictly
/// more extreme than `lookback` neighbors on each side (GLOSSARY). Scans the
/// most recent `window` candles and returns the most recent swing high and
/// the most recent swing low found in that window — not necessarily at the
/// same index, matching `original_source`'s independent high/low scan.
pub fn detect_swing_levels(candles: &[Candle], window: usize, lookback: usize) -> Option<SwingLevels> {
    if candles.len() < window || window <= 2 * lookback {
        return None;
    }
    let slice = &candles[candles.len() - window..];

    let mut swing_high = None;
    let mut swing_low = None;

    for i in lookback..(slice.len() - lookback) {
        let bar = &slice[i];
        let is_high = (i - lookback..i).chain(i + 1..=i + lookback).all(|j| slice[j].high < bar.high);
        if is_high {
            swing_high = Some(bar.high);
        }
        let is_low = (i - lookback..i).chain(i + 1..=i + lookback).all(|j| slice[j].low > bar.low);
        if is_low {
            swing_low = Some(bar.low);
        }
    }

    match (swing_high, swing_low) {
        (Some(high), Some(low)) if high > low => Some(SwingLevels { swing_high: high, swing_low: low }),
        _ => None,
    }
}

/// M5 trend direction from an EMA(20)/EMA(50) crossover, with a 0.05%
/// dead-zone around the crossover to avoid flapping on noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

const TREND_DEAD_ZONE_PCT: f64 = 0.05;

/// `closes` must be long enough to seed an EMA(50); returns `None` otherwise.
pub fn m5_trend(closes: &[f64]) -> Option<Trend> {
    let ema20 = calculate_ema(closes, 20).last().copied()?;
    let ema50 = calculate_ema(closes, 50).last().copied()?;
    if ema50.abs() < f64::EPSILON {
        return Some(Trend::Neutral);
    }
    let sep_pct = (ema20 - ema50) / ema50 * 100.0;
    if sep_pct > TREND_DEAD_ZONE_PCT {
        Some(Trend::Bullish)
    } else if sep_pct < -TREND_DEAD_ZONE_PCT {
        Some(Trend::Bearish)
    } else {
        Some(Trend::Neutral)
    }
}

/// Momentum reading for a timeframe: the most recent ROC(14) value, or
/// `None` when there aren't enough closes.
pub fn momentum(closes: &[f64]) -> Option<f64> {
    calculate_roc(closes, 14).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time: i64, high: f64, low: f64, close: f64) -> Candle {
        Candle { time, open: close, high, low, close, tick_volume: 0 }
    }

    #[test]
    fn detects_a_clean_swing_high_and_low() {
        let mut candles = Vec::new();
        for i in 0..20 {
            candles.push(candle(i, 1.10, 1.09, 1.095));
        }
        // Inject a clear swing high at index 10 and swing low at index 15,
        // each flanked by 3 strictly-less-extreme neighbors on both sides.
        candles[10] = candle(10, 1.20, 1.095, 1.15);
        candles[15] = candle(15, 1.10, 1.00, 1.05);

        let levels = detect_swing_levels(&candles, 20, 3).unwrap();
        assert!((levels.swing_high - 1.20).abs() < 1e-9);
        assert!((levels.swing_low - 1.00).abs() < 1e-9);
    }

    #[test]
    fn level_computes_retracement_price() {
        let levels = SwingLevels { swing_high: 1.20, swing_low: 1.00 };
        // 0.618 -> 1.20 - (0.20 * 0.618) = 1.0764
        let lvl = levels.level("0.618").unwrap();
        assert!((lvl - 1.0764).abs() < 1e-9);
        assert!(levels.level("not_a_ratio").is_none());
    }

    #[test]
    fn trend_requires_enough_closes() {
        let closes: Vec<f64> = (0..10).map(|i| 1.0 + i as f64 * 0.001).collect();
        assert!(m5_trend(&closes).is_none());
    }

    #[test]
    fn trend_detects_bullish_separation() {
        // Monotonically rising closes pull EMA20 well above EMA50.
        let closes: Vec<f64> = (0..60).map(|i| 1.0 + i as f64 * 0.01).collect();
        assert_eq!(m5_trend(&closes), Some(Trend::Bullish));
    }

    #[test]
    fn trend_neutral_inside_dead_zone() {
        let closes = vec![1.10000; 60];
        assert_eq!(m5_trend(&closes), Some(Trend::Neutral));
    }
}
