// =============================================================================
// Strategy Agent
// =============================================================================
//
// One agent's signal comes from a Fibonacci retracement read plus an external
// decider call — the actual weighing of trend/momentum/fibonacci/sentiment
// context is delegated entirely to that decider. Per-agent mutable state
// (`last_trade_time`) and three public operations (`can_trade`,
// `should_open_trade`, `mark_executed`) are evaluated under cooldown,
// max-positions, and spread gates before the decider is ever called.
// =============================================================================

use chrono::NaiveTime;
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::decider::{parse_decider_text, Decider, DeciderAction};
use crate::enrichment::{FuturesEnricher, SentimentEnricher};
use crate::fibonacci::{self, Trend};
use crate::ict_smc::IctSmcDetector;
use crate::types::Direction;

/// One cycle's worth of market data read for a single agent's symbol.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub spread_points: f64,
    /// Closes for the configured timeframe (M5 by convention), most-recent
    /// last; used for the Fibonacci swing/trend read.
    pub tf_closes: Vec<f64>,
    pub tf_highs: Vec<f64>,
    pub tf_lows: Vec<f64>,
    pub tf_candles: Vec<crate::broker::Candle>,
    /// M1 closes, for momentum, most-recent last.
    pub m1_closes: Vec<f64>,
}

/// A proposed trade, ready for execution by the Trading Loop.
#[derive(Debug, Clone)]
pub struct TradeSignal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub sl: f64,
    pub tp: f64,
    pub reason: String,
}

/// Per-agent runtime state the Trading Loop owns and mutates across cycles.
#[derive(Debug, Clone, Default)]
pub struct StrategyAgentState {
    pub last_trade_time: Option<i64>,
}

impl StrategyAgentState {
    /// Whether this agent may open a trade right now: enabled, under the
    /// position cap, and cooldown has elapsed since the last trade this
    /// process opened.
    pub fn can_trade(&self, config: &AgentConfig, open_positions_count: usize, now_unix: i64) -> bool {
        if !config.enabled {
            return false;
        }
        if open_positions_count >= config.max_positions as usize {
            return false;
        }
        match self.last_trade_time {
            Some(last) => now_unix - last >= config.cooldown_seconds as i64,
            None => true,
        }
    }

    pub fn mark_executed(&mut self, now_unix: i64) {
        self.last_trade_time = Some(now_unix);
    }
}

/// Killzone check (UTC wall clock), with wrap-around when `end < start`
/// (GLOSSARY "Killzone wrap-around") — e.g. `22:00-06:00` crosses midnight.
pub fn in_killzone(start: &str, end: &str, now: NaiveTime) -> bool {
    let (Ok(start), Ok(end)) = (parse_hhmm(start), parse_hhmm(end)) else {
        return true;
    };
    if start <= end {
        now >= start && now <= end
    } else {
        now >= start || now <= end
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, ()> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ())
}

fn system_prompt() -> &'static str {
    "You are a disciplined Fibonacci retracement trading assistant for a live MT5 account. \
     Respond with ACTION: BUY, ACTION: SELL, or ACTION: HOLD, followed by REASON: a one-line justification. \
     Prefer HOLD when signals conflict or data is incomplete."
}

/// Builds the decider prompt from market data. Follows
/// `original_source/backend/agents/prompt_builder.py`'s assembly order:
/// price/spread, then trend, then momentum, then Fibonacci levels, then the
/// optional enrichers, then the position budget.
#[allow(clippy::too_many_arguments)]
fn build_prompt(
    agent_id: &str,
    config: &AgentConfig,
    snapshot: &MarketSnapshot,
    trend: Option<Trend>,
    m5_momentum: Option<f64>,
    m1_momentum: Option<f64>,
    swing: Option<fibonacci::SwingLevels>,
    ict: Option<&crate::ict_smc::IctSmcReading>,
    sentiment: Option<&crate::enrichment::EnrichmentSignal>,
    futures: Option<&crate::enrichment::EnrichmentSignal>,
    open_positions_count: usize,
) -> String {
    use std::fmt::Write as _;
    let mut p = String::new();
    let _ = writeln!(p, "Agent: {agent_id}  Symbol: {}", snapshot.symbol);
    let _ = writeln!(
        p,
        "Bid: {:.5}  Ask: {:.5}  Spread(points): {:.1}",
        snapshot.bid, snapshot.ask, snapshot.spread_points
    );
    let _ = writeln!(
        p,
        "M5 trend (EMA20/EMA50): {}",
        trend.map(|t| t.to_string()).unwrap_or_else(|| "UNKNOWN".to_string())
    );
    let _ = writeln!(
        p,
        "Momentum M5 ROC(14): {}  M1 ROC(14): {}",
        m5_momentum.map(|v| format!("{v:.3}%")).unwrap_or_else(|| "n/a".to_string()),
        m1_momentum.map(|v| format!("{v:.3}%")).unwrap_or_else(|| "n/a".to_string()),
    );
    match swing {
        Some(s) => {
            let level = s.level(&config.fibo_level).unwrap_or(s.swing_high);
            let _ = writeln!(
                p,
                "Swing high {:.5} / swing low {:.5}; target fib level {} = {:.5} (tolerance {:.2}%)",
                s.swing_high, s.swing_low, config.fibo_level, level, config.fibo_tolerance_pct
            );
        }
        None => {
            let _ = writeln!(p, "Swing levels: not enough data this cycle");
        }
    }
    match ict {
        Some(r) => {
            let _ = writeln!(
                p,
                "ICT/SMC: structure={} patterns={:?} recommendation={}",
                r.market_structure, r.patterns_detected, r.recommendation
            );
        }
        None => {
            let _ = writeln!(p, "ICT/SMC: not available");
        }
    }
    match sentiment {
        Some(s) => {
            let _ = writeln!(p, "Sentiment bias: {:.2} ({})", s.bias, s.label);
        }
        None => {
            let _ = writeln!(p, "Sentiment: not available");
        }
    }
    match futures {
        Some(f) => {
            let _ = writeln!(p, "Futures bias: {:.2} ({})", f.bias, f.label);
        }
        None => {
            let _ = writeln!(p, "Futures: not available");
        }
    }
    let _ = writeln!(p, "Open positions: {}/{}", open_positions_count, config.max_positions);
    p
}

/// Runs the full open-trade decision pipeline for one market snapshot.
/// `decider`/`ict`/`sentiment`/`futures` are dyn trait objects so the Trading
/// Loop can wire the same instances across all three agents.
#[allow(clippy::too_many_arguments)]
pub async fn should_open_trade(
    agent_id: &str,
    config: &AgentConfig,
    snapshot: &MarketSnapshot,
    open_positions_count: usize,
    decider: &dyn Decider,
    ict: &dyn IctSmcDetector,
    sentiment: &dyn SentimentEnricher,
    futures: &dyn FuturesEnricher,
    log_decision: impl FnOnce(&str, &str, &str, f64, bool),
) -> Option<TradeSignal> {
    // Step 1: spread short-circuit.
    if config.tpsl_config.spread_check_enabled && snapshot.spread_points > config.tpsl_config.max_spread_points {
        debug!(agent_id, spread = snapshot.spread_points, "spread too wide, skipping decision phase");
        return None;
    }

    let trend = fibonacci::m5_trend(&snapshot.tf_closes);
    let m5_momentum = fibonacci::momentum(&snapshot.tf_closes);
    let m1_momentum = fibonacci::momentum(&snapshot.m1_closes);
    let swing = fibonacci::detect_swing_levels(&snapshot.tf_candles, 100, 3);

    let ict_reading = ict.analyze(&snapshot.tf_highs, &snapshot.tf_lows, &snapshot.tf_closes).await;
    let sentiment_signal = sentiment.sentiment(&snapshot.symbol).await;
    let futures_signal = futures.futures_signal(&snapshot.symbol).await;

    let prompt = build_prompt(
        agent_id,
        config,
        snapshot,
        trend,
        m5_momentum,
        m1_momentum,
        swing,
        ict_reading.as_ref(),
        sentiment_signal.as_ref(),
        futures_signal.as_ref(),
        open_positions_count,
    );

    // Step 3: external decider call. `None` (timeout/transport error) is
    // HOLD, same as an explicit HOLD response.
    let raw = decider.decide(agent_id, &prompt, system_prompt(), 256).await;
    let (action, reason) = match &raw {
        Some(text) => parse_decider_text(text),
        None => (DeciderAction::Hold, "decider unavailable".to_string()),
    };

    let mid = (snapshot.bid + snapshot.ask) / 2.0;

    // Step 4: log the decision regardless of outcome.
    let executed = !matches!(action, DeciderAction::Hold);
    let action_str = match action {
        DeciderAction::Buy => "BUY",
        DeciderAction::Sell => "SELL",
        DeciderAction::Hold => "HOLD",
    };
    log_decision(action_str, &reason, &snapshot.symbol, mid, executed);

    // Step 5: HOLD returns nothing; otherwise compute SL/TP from entry.
    let direction = match action {
        DeciderAction::Buy => Direction::Buy,
        DeciderAction::Sell => Direction::Sell,
        DeciderAction::Hold => return None,
    };

    let entry = match direction {
        Direction::Buy => snapshot.ask,
        Direction::Sell => snapshot.bid,
    };
    let sl_pct = config.tpsl_config.sl_pct / 100.0;
    let tp_pct = config.tpsl_config.tp_pct / 100.0;
    let (sl, tp) = match direction {
        Direction::Buy => (entry * (1.0 - sl_pct), entry * (1.0 + tp_pct)),
        Direction::Sell => (entry * (1.0 + sl_pct), entry * (1.0 - tp_pct)),
    };

    info!(agent_id, %direction, entry, sl, tp, reason = %reason, "Strategy Agent produced a trade signal");

    Some(TradeSignal {
        symbol: snapshot.symbol.clone(),
        direction,
        entry_price: entry,
        sl,
        tp,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decider::Decider;
    use crate::enrichment::NullEnricher;
    use crate::ict_smc::NullIctSmcDetector;
    use async_trait::async_trait;

    fn config() -> AgentConfig {
        let mut c = AgentConfig::default();
        c.symbol = "EURUSD".to_string();
        c
    }

    fn candles(n: usize, base: f64) -> Vec<crate::broker::Candle> {
        (0..n)
            .map(|i| crate::broker::Candle {
                time: i as i64,
                open: base,
                high: base + 0.001,
                low: base - 0.001,
                close: base + (i as f64) * 0.0001,
                tick_volume: 10,
            })
            .collect()
    }

    fn snapshot() -> MarketSnapshot {
        let candles = candles(120, 1.1000);
        MarketSnapshot {
            symbol: "EURUSD".to_string(),
            bid: 1.1050,
            ask: 1.1052,
            spread_points: 2.0,
            tf_closes: candles.iter().map(|c| c.close).collect(),
            tf_highs: candles.iter().map(|c| c.high).collect(),
            tf_lows: candles.iter().map(|c| c.low).collect(),
            tf_candles: candles,
            m1_closes: (0..30).map(|i| 1.1000 + i as f64 * 0.0001).collect(),
        }
    }

    struct StubDecider(Option<&'static str>);
    #[async_trait]
    impl Decider for StubDecider {
        async fn decide(&self, _agent_id: &str, _prompt: &str, _system_prompt: &str, _max_tokens: u32) -> Option<String> {
            self.0.map(|s| s.to_string())
        }
    }

    #[test]
    fn can_trade_respects_cooldown_and_cap() {
        let cfg = config();
        let mut state = StrategyAgentState::default();
        assert!(state.can_trade(&cfg, 0, 1000));
        state.mark_executed(1000);
        assert!(!state.can_trade(&cfg, 0, 1000 + 10));
        assert!(state.can_trade(&cfg, 0, 1000 + cfg.cooldown_seconds as i64));
    }

    #[test]
    fn can_trade_false_at_max_positions_even_after_cooldown() {
        let cfg = config();
        let state = StrategyAgentState::default();
        assert!(!state.can_trade(&cfg, cfg.max_positions as usize, 999_999));
    }

    #[test]
    fn killzone_handles_wraparound() {
        let t = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        assert!(in_killzone("22:00", "06:00", t));
        let t2 = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert!(!in_killzone("22:00", "06:00", t2));
    }

    #[tokio::test]
    async fn hold_produces_no_signal_but_logs() {
        let cfg = config();
        let snap = snapshot();
        let decider = StubDecider(Some("ACTION: HOLD\nREASON: no edge"));
        let mut logged = None;
        let signal = should_open_trade(
            "fibo1",
            &cfg,
            &snap,
            0,
            &decider,
            &NullIctSmcDetector,
            &NullEnricher,
            &NullEnricher,
            |action, reason, symbol, price, executed| {
                logged = Some((action.to_string(), reason.to_string(), symbol.to_string(), price, executed));
            },
        )
        .await;
        assert!(signal.is_none());
        let (action, _, _, _, executed) = logged.unwrap();
        assert_eq!(action, "HOLD");
        assert!(!executed);
    }

    #[tokio::test]
    async fn buy_signal_computes_sl_tp_from_entry() {
        let cfg = config();
        let snap = snapshot();
        let decider = StubDecider(Some("ACTION: BUY\nREASON: bullish fib bounce"));
        let signal = should_open_trade(
            "fibo1",
            &cfg,
            &snap,
            0,
            &decider,
            &NullIctSmcDetector,
            &NullEnricher,
            &NullEnricher,
            |_, _, _, _, _| {},
        )
        .await
        .unwrap();
        assert_eq!(signal.direction, Direction::Buy);
        assert!((signal.entry_price - snap.ask).abs() < 1e-9);
        let expected_sl = snap.ask * (1.0 - cfg.tpsl_config.sl_pct / 100.0);
        assert!((signal.sl - expected_sl).abs() < 1e-9);
        assert!(signal.tp > signal.entry_price);
    }

    #[tokio::test]
    async fn wide_spread_short_circuits_before_decider_call() {
        let mut cfg = config();
        cfg.tpsl_config.max_spread_points = 1.0;
        let snap = snapshot();
        let decider = StubDecider(Some("ACTION: BUY\nREASON: should never be reached"));
        let mut called = false;
        let signal = should_open_trade(
            "fibo1",
            &cfg,
            &snap,
            0,
            &decider,
            &NullIctSmcDetector,
            &NullEnricher,
            &NullEnricher,
            |_, _, _, _, _| called = true,
        )
        .await;
        assert!(signal.is_none());
        assert!(!called);
    }

    #[tokio::test]
    async fn decider_none_is_treated_as_hold() {
        let cfg = config();
        let snap = snapshot();
        let decider = StubDecider(None);
        let signal = should_open_trade(
            "fibo1",
            &cfg,
            &snap,
            0,
            &decider,
            &NullIctSmcDetector,
            &NullEnricher,
            &NullEnricher,
            |_, _, _, _, _| {},
        )
        .await;
        assert!(signal.is_none());
    }
}
