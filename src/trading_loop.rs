// =============================================================================
// Trading Loop — the scheduler
// =============================================================================
//
// One background worker, 10 s top-level tick, `fibo1 -> fibo2 -> fibo3` in
// strict order with the five phases run to completion before the next agent
// starts — this is how the single-broker-session invariant holds without
// any internal locking beyond the gate itself.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::broker::{BrokerClient, Candle, OrderAction, OrderRequest, SymbolInfo, Timeframe};
use crate::ledger::Ticket;
use crate::position_manager::{self, PositionSnapshot};
use crate::strategy::{self, MarketSnapshot};
use crate::sync as ledger_sync;
use crate::types::{Direction, RiskVerdict, TicketStatus};

pub const TICK_PERIOD: Duration = Duration::from_secs(10);
const STATS_CADENCE_SECS: i64 = 60;
const STRATEGIST_CADENCE_SECS: i64 = 300;

/// `magic = hash(agent) % 10^6`, deterministic per process run (no
/// `rand`/clock involved).
fn magic_number(agent_id: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    agent_id.hash(&mut hasher);
    (hasher.finish() % 1_000_000) as u32
}

/// Snap a raw requested volume to the symbol's step, floored, then clamp to
/// `[volume_min, volume_max]`.
fn snap_volume(raw: f64, info: &SymbolInfo) -> f64 {
    if info.volume_step <= 0.0 {
        return raw.clamp(info.volume_min, info.volume_max);
    }
    let steps = (raw / info.volume_step).floor();
    (steps * info.volume_step).clamp(info.volume_min, info.volume_max)
}

/// Run the Trading Loop forever while `state.is_running()`. Intended to be
/// spawned as a single background task by `main`; this function never
/// returns on success.
pub async fn run<C: BrokerClient + 'static>(state: Arc<AppState<C>>) {
    let mut interval = tokio::time::interval(TICK_PERIOD);
    loop {
        interval.tick().await;
        if !state.is_running() {
            continue;
        }

        let session = state.ledger.load_session();
        if session.status != crate::types::SessionStatus::Active {
            continue;
        }

        for agent_id in crate::types::AGENT_IDS {
            run_agent_cycle(&state, agent_id).await;
        }

        let now = Utc::now().timestamp();

        if now - state.last_stats_run.load(Ordering::SeqCst) >= STATS_CADENCE_SECS {
            run_stats_cadence(&state);
            state.last_stats_run.store(now, Ordering::SeqCst);
        }

        if now - state.last_strategist_run.load(Ordering::SeqCst) >= STRATEGIST_CADENCE_SECS {
            run_strategist_cadence(&state);
            state.last_strategist_run.store(now, Ordering::SeqCst);
        }
    }
}

/// Recompute stats + append a performance sample for every agent, plus the
/// aggregate `"master"` series.
fn run_stats_cadence<C: BrokerClient>(state: &AppState<C>) {
    let now = Utc::now().timestamp();
    let mut master_pnl = 0.0;

    for agent_id in crate::types::AGENT_IDS {
        let trades = state.ledger.load_closed_trades(agent_id);
        let stats = ledger_sync::calculate_stats(&trades);
        state.ledger.save_stats(agent_id, &stats);

        let closed_pnl = stats.total_profit;
        master_pnl += closed_pnl;
        let floating_pnl: f64 = state
            .ledger
            .load_open_positions(agent_id)
            .iter()
            .map(|p| p.profit)
            .sum();

        state.ledger.append_performance_sample(
            agent_id,
            crate::ledger::PerformanceSample {
                timestamp: now,
                closed_pnl,
                floating_pnl,
            },
        );
    }

    state.ledger.append_performance_sample(
        "master",
        crate::ledger::PerformanceSample {
            timestamp: now,
            closed_pnl: master_pnl,
            floating_pnl: 0.0,
        },
    );
}

fn run_strategist_cadence<C: BrokerClient>(state: &AppState<C>) {
    let mut configs = state.configs.write();
    let mut last_adjustment = state.last_adjustment_time.write();
    let changed = crate::strategist::run(&state.ledger, &mut configs, &mut last_adjustment, &state.config_path);
    if !changed.is_empty() {
        info!(?changed, "Strategist adjusted agent(s); live-position rewrite deferred to next cycle's Sync+Manage phase");
    }
}

/// Close every position this agent owns, as part of an `EmergencyClose`
/// risk verdict. Best-effort: a failure to close one position is logged and
/// the rest are still attempted.
async fn emergency_close_all<C: BrokerClient>(client: &C, agent_id: &str, positions: &[crate::broker::Position]) {
    for position in positions {
        let result = client
            .order_send(OrderRequest {
                action: OrderAction::Deal,
                symbol: position.symbol.clone(),
                volume: position.volume,
                direction: position.direction,
                position: Some(position.ticket),
                price: position.price_current,
                sl: None,
                tp: None,
                deviation: 20,
                magic: magic_number(agent_id),
                comment: String::new(),
            })
            .await;
        match result {
            Ok(res) if res.retcode == crate::broker::RETCODE_DONE => {
                info!(agent_id, ticket = position.ticket, "emergency close executed");
            }
            Ok(res) => warn!(agent_id, ticket = position.ticket, retcode = res.retcode, "emergency close rejected"),
            Err(err) => warn!(agent_id, ticket = position.ticket, error = %err, "emergency close failed"),
        }
    }
}

/// The five-phase per-agent cycle.
async fn run_agent_cycle<C: BrokerClient>(state: &AppState<C>, agent_id: &str) {
    let config = {
        let configs = state.configs.read();
        match configs.get(agent_id) {
            Some(c) if c.enabled => c.clone(),
            _ => return,
        }
    };

    // Phase 1: Connect.
    let (handle, account) = match state.gate.acquire(agent_id).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(agent_id, error = %err, "gate acquire failed, skipping agent this tick");
            return;
        }
    };
    let client = state.gate.client().clone();

    // Phase 2: Ingest + Risk Guard.
    let verdict = state.risk.check(agent_id, &account);
    let mut can_trade = true;
    if verdict == RiskVerdict::EmergencyClose {
        warn!(agent_id, "EmergencyClose verdict: closing all positions owned by this agent");
        match client.positions_get(Some(&config.symbol)).await {
            Ok(all) => {
                let owned = ledger_sync::positions_owned_by(&all, agent_id);
                emergency_close_all(client.as_ref(), agent_id, &owned).await;
            }
            Err(err) => warn!(agent_id, error = %err, "failed to read positions for emergency close"),
        }
        if let Ok(all) = client.positions_get(Some(&config.symbol)).await {
            let owned = ledger_sync::positions_owned_by(&all, agent_id);
            ledger_sync::sync_positions(&state.ledger, agent_id, &owned);
        }
        ledger_sync::sync_closed_trades(&state.ledger, client.as_ref(), agent_id).await;
        state.gate.release(handle).await;
        return;
    }
    if verdict == RiskVerdict::Block {
        can_trade = false;
    }

    // Phase 3: Sync + Manage.
    let owned_positions = match client.positions_get(Some(&config.symbol)).await {
        Ok(all) => ledger_sync::positions_owned_by(&all, agent_id),
        Err(err) => {
            warn!(agent_id, error = %err, "positions_get failed");
            Vec::new()
        }
    };
    ledger_sync::sync_positions(&state.ledger, agent_id, &owned_positions);
    ledger_sync::sync_closed_trades(&state.ledger, client.as_ref(), agent_id).await;

    let snapshots: Vec<PositionSnapshot> = owned_positions
        .iter()
        .map(|p| PositionSnapshot {
            ticket: p.ticket,
            direction: p.direction,
            entry: p.price_open,
            current: p.price_current,
            current_sl: p.sl,
        })
        .collect();
    let sl_decisions = position_manager::run(&snapshots, &config.tpsl_config, state.risk.winner_never_loser_enabled());
    for decision in &sl_decisions {
        let request = OrderRequest {
            action: OrderAction::Sltp,
            symbol: config.symbol.clone(),
            volume: 0.0,
            direction: Direction::Buy,
            position: Some(decision.ticket),
            price: 0.0,
            sl: Some(decision.new_sl),
            tp: None,
            deviation: 0,
            magic: magic_number(agent_id),
            comment: String::new(),
        };
        match client.order_send(request).await {
            Ok(res) if res.retcode == crate::broker::RETCODE_DONE => {
                info!(agent_id, ticket = decision.ticket, rule = %decision.rule, new_sl = decision.new_sl, "SL updated");
            }
            Ok(res) => warn!(agent_id, ticket = decision.ticket, retcode = res.retcode, "SL update rejected"),
            Err(err) => warn!(agent_id, ticket = decision.ticket, error = %err, "SL update failed"),
        }
    }

    // Phase 4: Read market, then release.
    let tf = config.timeframe.parse::<Timeframe>().unwrap_or(Timeframe::M5);
    let tf_candles: Vec<Candle> = client.copy_rates_from_pos(&config.symbol, tf, 150).await.unwrap_or_default();
    let m1_candles: Vec<Candle> = client.copy_rates_from_pos(&config.symbol, Timeframe::M1, 50).await.unwrap_or_default();
    let tick = client.tick(&config.symbol).await.ok();
    let symbol_info = client.symbol_info(&config.symbol).await.ok();

    state.gate.release(handle).await;

    if !can_trade {
        return;
    }

    let Some(tick) = tick else {
        debug_no_tick(agent_id);
        return;
    };
    if tf_candles.is_empty() {
        debug_no_market_data(agent_id);
        return;
    }

    // Phase 5: Decide + Execute (no broker held).
    let now_unix = Utc::now().timestamp();
    let now_time = Utc::now().time();

    if config.killzone_enabled && !strategy::in_killzone(&config.killzone_start, &config.killzone_end, now_time) {
        return;
    }

    let open_positions_count = owned_positions.len();
    let can_trade_now = {
        let runtime = state.agent_runtime.read();
        runtime
            .get(agent_id)
            .map(|s| s.can_trade(&config, open_positions_count, now_unix))
            .unwrap_or(true)
    };
    if !can_trade_now {
        return;
    }

    let spread_points = ((tick.ask - tick.bid) / symbol_info.map(|s| s.point).unwrap_or(0.00001)).abs();
    let snapshot = MarketSnapshot {
        symbol: config.symbol.clone(),
        bid: tick.bid,
        ask: tick.ask,
        spread_points,
        tf_closes: tf_candles.iter().map(|c| c.close).collect(),
        tf_highs: tf_candles.iter().map(|c| c.high).collect(),
        tf_lows: tf_candles.iter().map(|c| c.low).collect(),
        tf_candles: tf_candles.clone(),
        m1_closes: m1_candles.iter().map(|c| c.close).collect(),
    };

    let ledger_ref = &state.ledger;
    let signal = strategy::should_open_trade(
        agent_id,
        &config,
        &snapshot,
        open_positions_count,
        state.decider.as_ref(),
        state.ict.as_ref(),
        state.sentiment.as_ref(),
        state.futures.as_ref(),
        |action, reason, symbol, price, executed| {
            ledger_ref.log_decision(agent_id, action, reason, symbol, price, executed);
        },
    )
    .await;

    let Some(signal) = signal else { return };

    // Re-acquire the gate to execute.
    let (handle, _account) = match state.gate.acquire(agent_id).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(agent_id, error = %err, "gate re-acquire for execution failed, dropping this signal");
            return;
        }
    };
    let client = state.gate.client().clone();

    let info = match client.symbol_info(&signal.symbol).await {
        Ok(info) => info,
        Err(err) => {
            warn!(agent_id, error = %err, "symbol_info failed, cannot size order");
            state.gate.release(handle).await;
            return;
        }
    };
    let volume = snap_volume(config.position_size_pct, &info);

    let order = OrderRequest {
        action: OrderAction::Deal,
        symbol: signal.symbol.clone(),
        volume,
        direction: signal.direction,
        position: None,
        price: signal.entry_price,
        sl: Some(signal.sl),
        tp: Some(signal.tp),
        deviation: 10,
        magic: magic_number(agent_id),
        comment: format!("G13_{agent_id}"),
    };

    match client.order_send(order).await {
        Ok(result) if result.retcode == crate::broker::RETCODE_DONE => {
            info!(agent_id, ticket = result.order, %signal.direction, "trade executed");
            state.ledger.save_ticket(Ticket {
                ticket: result.order,
                agent_id: agent_id.to_string(),
                symbol: signal.symbol.clone(),
                direction: signal.direction,
                opened_at: Utc::now().to_rfc3339(),
                status: TicketStatus::Open,
            });
            let mut runtime = state.agent_runtime.write();
            runtime.entry(agent_id.to_string()).or_default().mark_executed(now_unix);
        }
        Ok(result) => {
            warn!(agent_id, retcode = result.retcode, "order rejected, last_trade_time unchanged");
        }
        Err(err) => {
            warn!(agent_id, error = %err, "order_send failed, last_trade_time unchanged");
        }
    }

    state.gate.release(handle).await;
}

fn debug_no_tick(agent_id: &str) {
    tracing::debug!(agent_id, "no tick available, skipping decision phase this cycle");
}

fn debug_no_market_data(agent_id: &str) {
    tracing::debug!(agent_id, "no market data available, skipping decision phase this cycle");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SymbolInfo;

    fn info() -> SymbolInfo {
        SymbolInfo {
            tick_size: 0.00001,
            tick_value: 1.0,
            volume_min: 0.01,
            volume_max: 10.0,
            volume_step: 0.01,
            digits: 5,
            contract_size: 100_000.0,
            point: 0.00001,
            trade_contract_size: 100_000.0,
            trade_tick_value: 1.0,
            visible: true,
        }
    }

    #[test]
    fn snap_volume_floors_to_step_and_clamps() {
        assert!((snap_volume(0.017, &info()) - 0.01).abs() < 1e-9);
        assert!((snap_volume(0.0, &info()) - 0.01).abs() < 1e-9);
        assert!((snap_volume(999.0, &info()) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn magic_number_is_deterministic_and_bounded() {
        let a = magic_number("fibo1");
        let b = magic_number("fibo1");
        let c = magic_number("fibo2");
        assert_eq!(a, b);
        assert!(a < 1_000_000);
        assert!(c < 1_000_000);
    }
}
