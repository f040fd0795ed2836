// =============================================================================
// ICT / SMC detector — optional market-structure context
// =============================================================================
//
// A real ICT/SMC engine (order blocks, fair value gaps, liquidity sweeps) is
// out of scope here; this module only names the contract a detector would
// satisfy if one were plugged in: `{highs, lows, closes} ->
// {market_structure, patterns_detected, liquidity_zones, recommendation}`,
// a structured read-only snapshot the prompt builder can fold in alongside
// trend/momentum/fibonacci context.
// =============================================================================

use async_trait::async_trait;

/// A single liquidity zone (equal highs/lows, order block, etc.) the detector
/// flags as relevant to the current price.
#[derive(Debug, Clone)]
pub struct LiquidityZone {
    pub label: String,
    pub price: f64,
}

/// A structured market-structure reading.
#[derive(Debug, Clone)]
pub struct IctSmcReading {
    pub market_structure: String,
    pub patterns_detected: Vec<String>,
    pub liquidity_zones: Vec<LiquidityZone>,
    pub recommendation: String,
}

/// Takes raw OHLC series and returns a structured market-structure reading.
/// Optional — the Strategy Agent must run its full cycle whether or not one
/// is configured.
#[async_trait]
pub trait IctSmcDetector: Send + Sync {
    async fn analyze(&self, highs: &[f64], lows: &[f64], closes: &[f64]) -> Option<IctSmcReading>;
}

/// No-op detector: a real ICT/SMC engine is out of scope, so this is the
/// implementation `main` wires by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIctSmcDetector;

#[async_trait]
impl IctSmcDetector for NullIctSmcDetector {
    async fn analyze(&self, _highs: &[f64], _lows: &[f64], _closes: &[f64]) -> Option<IctSmcReading> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_detector_returns_none() {
        let d = NullIctSmcDetector;
        assert!(d.analyze(&[1.0], &[0.9], &[0.95]).await.is_none());
    }
}
