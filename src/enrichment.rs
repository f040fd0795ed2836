// =============================================================================
// Enrichment — optional sentiment / futures-style context
// =============================================================================
//
// Sentiment and futures enrichers are optional and best-effort: a failure
// or absent data source must never block the Strategy Agent's cycle. Each
// is a trait contract with a no-op default, the same shape `ict_smc` uses
// for its own optional detector.
// =============================================================================

use async_trait::async_trait;

/// A best-effort, bounded `[-1.0, 1.0]` bias plus the label the decider
/// prompt should show a human/LLM reader.
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentSignal {
    pub bias: f64,
    pub label: &'static str,
}

/// Sentiment context (news/positioning) for a symbol. Optional — a failure
/// here must never block the Strategy Agent's cycle.
#[async_trait]
pub trait SentimentEnricher: Send + Sync {
    async fn sentiment(&self, symbol: &str) -> Option<EnrichmentSignal>;
}

/// Futures-market context (funding, open interest, long/short skew) for a
/// symbol. MT5 instruments have no futures-market equivalent in general, so
/// the default implementation is the one actually wired by `main`.
#[async_trait]
pub trait FuturesEnricher: Send + Sync {
    async fn futures_signal(&self, symbol: &str) -> Option<EnrichmentSignal>;
}

/// No-op enricher used when no real data source is configured. Always
/// returns `None`, which the Strategy Agent's prompt builder renders as
/// "not available" rather than omitting the section outright.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEnricher;

#[async_trait]
impl SentimentEnricher for NullEnricher {
    async fn sentiment(&self, _symbol: &str) -> Option<EnrichmentSignal> {
        None
    }
}

#[async_trait]
impl FuturesEnricher for NullEnricher {
    async fn futures_signal(&self, _symbol: &str) -> Option<EnrichmentSignal> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_enricher_is_always_none() {
        let e = NullEnricher;
        assert!(e.sentiment("EURUSD").await.is_none());
        assert!(e.futures_signal("EURUSD").await.is_none());
    }
}
