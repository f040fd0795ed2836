// =============================================================================
// Strategist & Auto-Adjust
// =============================================================================
//
// Runs on a 300 s cadence (driven by `trading_loop`). Produces exact target
// values per `(agent, parameter)` — either from an external decider (LLM) or
// a rule-based legacy fallback — then commits them through four sequential
// guard-rails before touching `AgentConfig`: a pipeline of independent
// checks, each of which can veto without touching the others.
// =============================================================================

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::{self, param_bounds, AgentConfig, AgentConfigMap};
use crate::ledger::{AdjustmentLogEntry, ClosedTrade, Ledger};

/// Derived performance metrics for one agent, computed from its closed-trade
/// ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentPerformance {
    pub trades: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub expectancy: f64,
    pub required_wr_to_break_even: f64,
    pub sl_tp_ratio: f64,
}

pub fn derive_performance(trades: &[ClosedTrade], tpsl: &crate::config::TpslConfig) -> AgentPerformance {
    let total = trades.len() as u32;
    if total == 0 {
        return AgentPerformance {
            sl_tp_ratio: if tpsl.tp_pct > 0.0 { tpsl.sl_pct / tpsl.tp_pct } else { 0.0 },
            ..Default::default()
        };
    }

    let wins: Vec<f64> = trades.iter().filter(|t| t.profit > 0.0).map(|t| t.profit).collect();
    let losses: Vec<f64> = trades.iter().filter(|t| t.profit < 0.0).map(|t| t.profit).collect();

    let win_rate = wins.len() as f64 / total as f64;
    let avg_win = if wins.is_empty() { 0.0 } else { wins.iter().sum::<f64>() / wins.len() as f64 };
    let avg_loss = if losses.is_empty() { 0.0 } else { losses.iter().sum::<f64>() / losses.len() as f64 };

    let gross_win: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|v| v.abs()).sum();
    let profit_factor = if gross_loss > 0.0 { gross_win / gross_loss } else { 0.0 };

    let expectancy = win_rate * avg_win - (1.0 - win_rate) * avg_loss.abs();
    let required_wr_to_break_even = if avg_win + avg_loss.abs() > 0.0 {
        avg_loss.abs() / (avg_win + avg_loss.abs())
    } else {
        0.0
    };

    AgentPerformance {
        trades: total,
        win_rate: win_rate * 100.0,
        profit_factor,
        avg_win,
        avg_loss,
        expectancy,
        required_wr_to_break_even: required_wr_to_break_even * 100.0,
        sl_tp_ratio: if tpsl.tp_pct > 0.0 { tpsl.sl_pct / tpsl.tp_pct } else { 0.0 },
    }
}

/// Proposed exact target values for one agent, keyed by field name
/// (`"fibo_tolerance_pct"`, `"cooldown_seconds"`, `"position_size_pct"`,
/// `"tp_pct"`, `"sl_pct"`). Unknown field names are rejected before reaching
/// here.
pub type ProposedChanges = HashMap<String, f64>;

/// Legacy rule-based fallback: if an agent is clearly under-performing
/// (negative expectancy with enough sample size) nudge `sl_pct` down and
/// `tp_pct` up a fixed step; if clearly over-performing, loosen `cooldown`
/// slightly to trade more. Conservative — only ever proposes the two TP/SL
/// fields and cooldown, leaving `fibo_tolerance_pct`/`position_size_pct` to
/// the LLM path.
pub fn rule_based_fallback(perf: &AgentPerformance, current: &AgentConfig) -> ProposedChanges {
    let mut changes = ProposedChanges::new();
    if perf.trades < 5 {
        return changes;
    }
    if perf.expectancy < 0.0 {
        changes.insert("sl_pct".to_string(), (current.tpsl_config.sl_pct - 0.05).max(0.0));
        changes.insert("tp_pct".to_string(), current.tpsl_config.tp_pct + 0.05);
    } else if perf.profit_factor > 1.5 {
        changes.insert(
            "cooldown_seconds".to_string(),
            (current.cooldown_seconds as f64 - 15.0).max(0.0),
        );
    }
    changes
}

fn field_current_value(current: &AgentConfig, field: &str) -> Option<f64> {
    match field {
        "fibo_tolerance_pct" => Some(current.fibo_tolerance_pct),
        "cooldown_seconds" => Some(current.cooldown_seconds as f64),
        "position_size_pct" => Some(current.position_size_pct),
        "tp_pct" => Some(current.tpsl_config.tp_pct),
        "sl_pct" => Some(current.tpsl_config.sl_pct),
        _ => None,
    }
}

fn apply_field(config: &mut AgentConfig, field: &str, value: f64) {
    match field {
        "fibo_tolerance_pct" => config.fibo_tolerance_pct = value,
        "cooldown_seconds" => config.cooldown_seconds = value.round() as u64,
        "position_size_pct" => config.position_size_pct = value,
        "tp_pct" => config.tpsl_config.tp_pct = value,
        "sl_pct" => config.tpsl_config.sl_pct = value,
        _ => {}
    }
}

/// Apply a batch of proposed exact-value changes for one agent through the
/// four sequential guard-rails. Returns the adjustment log entries actually
/// committed (and mutates `config` in place for survivors only).
pub fn apply_exact_values(
    agent_id: &str,
    config: &mut AgentConfig,
    proposed: &ProposedChanges,
    recent_adjustments: &[AdjustmentLogEntry],
    last_adjustment_time: Option<i64>,
    now_unix: i64,
) -> Vec<AdjustmentLogEntry> {
    // Reject unknown params and values out of bounds up front.
    let mut candidates: Vec<(String, f64, f64)> = Vec::new(); // (field, old, new)
    for (field, &new_value) in proposed {
        let Some(bounds) = param_bounds(field) else {
            warn!(agent_id, field, "Strategist proposed unknown parameter, rejected");
            continue;
        };
        let Some(old_value) = field_current_value(config, field) else {
            continue;
        };
        let clamped = new_value.clamp(bounds.0, bounds.1);
        candidates.push((field.clone(), old_value, clamped));
    }
    if candidates.is_empty() {
        return Vec::new();
    }

    // Guard-rail 4: rate limits — whole batch dropped if violated.
    if let Some(last) = last_adjustment_time {
        if now_unix - last < 15 * 60 {
            info!(agent_id, "Strategist batch dropped: min_interval (15 min) not elapsed");
            return Vec::new();
        }
    }
    let one_hour_ago = now_unix - 3600;
    let recent_count = recent_adjustments
        .iter()
        .filter(|e| e.agent_id == agent_id && e.timestamp >= one_hour_ago)
        .count();
    if recent_count >= 4 {
        info!(agent_id, "Strategist batch dropped: rolling-hour rate limit (4) reached");
        return Vec::new();
    }

    // Guard-rail 2: amplitude — per field, |new - old| <= 50% * old, then re-clamp.
    let mut survivors = Vec::new();
    for (field, old, mut new) in candidates {
        if old.abs() > f64::EPSILON {
            let max_delta = old.abs() * 0.5;
            if (new - old).abs() > max_delta {
                new = if new > old { old + max_delta } else { old - max_delta };
            }
        }
        if let Some((lo, hi)) = param_bounds(&field) {
            new = new.clamp(lo, hi);
        }

        // Guard-rail 3: direction lock — no reversal of the same (agent,
        // field) within 4h.
        let sign = (new - old).signum();
        if sign != 0.0 {
            let four_hours_ago = now_unix - 4 * 3600;
            let reversed = recent_adjustments.iter().any(|e| {
                e.agent_id == agent_id
                    && e.field == field
                    && e.timestamp >= four_hours_ago
                    && (e.new_value - e.old_value).signum() == -sign
            });
            if reversed {
                info!(agent_id, field = %field, "Strategist change dropped: direction-lock (opposite move within 4h)");
                continue;
            }
        }

        survivors.push((field, old, new));
    }

    if survivors.is_empty() {
        return Vec::new();
    }

    // Guard-rail 1: ratio guard-rail — recompute post-change sl_pct/tp_pct
    // and clamp sl_pct <= 1.5 * tp_pct.
    let mut next_sl = config.tpsl_config.sl_pct;
    let mut next_tp = config.tpsl_config.tp_pct;
    for (field, _, new) in &survivors {
        match field.as_str() {
            "sl_pct" => next_sl = *new,
            "tp_pct" => next_tp = *new,
            _ => {}
        }
    }
    if next_sl > 1.5 * next_tp {
        next_sl = 1.5 * next_tp;
        if let Some(entry) = survivors.iter_mut().find(|(f, _, _)| f == "sl_pct") {
            entry.2 = next_sl;
        } else {
            survivors.push(("sl_pct".to_string(), config.tpsl_config.sl_pct, next_sl));
        }
    }

    let mut entries = Vec::new();
    for (field, old, new) in survivors {
        apply_field(config, &field, new);
        config.clamp_field(&field);
        let applied = field_current_value(config, &field).unwrap_or(new);
        info!(agent_id, field = %field, old, new = applied, "Strategist applied exact value");
        entries.push(AdjustmentLogEntry {
            timestamp: now_unix,
            agent_id: agent_id.to_string(),
            kind: "exact_value".to_string(),
            field,
            old_value: old,
            new_value: applied,
            reason: Some("strategist".to_string()),
        });
    }
    entries
}

/// Live-position SL/TP rewrite when `tp_pct`/`sl_pct` actually changed. The
/// position manager's monotonicity invariant still applies: if the freshly
/// computed SL would retreat, keep the current SL and only rewrite TP.
pub struct PositionRewrite {
    pub ticket: u64,
    pub new_sl: Option<f64>,
    pub new_tp: Option<f64>,
}

pub fn compute_position_rewrites(
    positions: &[crate::position_manager::PositionSnapshot],
    config: &AgentConfig,
) -> Vec<PositionRewrite> {
    use crate::position_manager::is_favorable_move;
    let sl_pct = config.tpsl_config.sl_pct / 100.0;
    let tp_pct = config.tpsl_config.tp_pct / 100.0;

    positions
        .iter()
        .map(|p| {
            let (candidate_sl, candidate_tp) = match p.direction {
                crate::types::Direction::Buy => (p.entry * (1.0 - sl_pct), p.entry * (1.0 + tp_pct)),
                crate::types::Direction::Sell => (p.entry * (1.0 + sl_pct), p.entry * (1.0 - tp_pct)),
            };
            let new_sl = if is_favorable_move(p.direction, p.current_sl, candidate_sl) {
                Some(candidate_sl)
            } else {
                None
            };
            PositionRewrite {
                ticket: p.ticket,
                new_sl,
                new_tp: Some(candidate_tp),
            }
        })
        .collect()
}

/// Run the Strategist for every enabled agent, skipping disabled ones, and
/// persist survivors to the ledger/config files. Returns the
/// updated `AgentConfigMap` for the caller to hand back to the Trading Loop,
/// plus the set of agents whose `tp_pct`/`sl_pct` actually changed (so the
/// caller knows which agents need a live-position rewrite).
pub fn run(
    ledger: &Ledger,
    configs: &mut AgentConfigMap,
    last_adjustment_time: &mut HashMap<String, i64>,
    config_path: &std::path::Path,
) -> Vec<String> {
    let now_unix = Utc::now().timestamp();
    let recent = ledger.recent_adjustments(20);
    let mut changed_agents = Vec::new();

    for agent_id in crate::types::AGENT_IDS {
        let Some(config) = configs.get_mut(agent_id) else { continue };
        if !config.ia_adjust_enabled {
            continue;
        }

        let trades = ledger.load_closed_trades(agent_id);
        let perf = derive_performance(&trades, &config.tpsl_config);
        let proposed = rule_based_fallback(&perf, config);
        if proposed.is_empty() {
            continue;
        }

        let before_sl = config.tpsl_config.sl_pct;
        let before_tp = config.tpsl_config.tp_pct;

        let entries = apply_exact_values(
            agent_id,
            config,
            &proposed,
            &recent,
            last_adjustment_time.get(agent_id).copied(),
            now_unix,
        );

        if entries.is_empty() {
            continue;
        }

        for entry in &entries {
            ledger.append_adjustment(entry.clone());
        }
        last_adjustment_time.insert(agent_id.to_string(), now_unix);

        if (config.tpsl_config.sl_pct - before_sl).abs() > f64::EPSILON
            || (config.tpsl_config.tp_pct - before_tp).abs() > f64::EPSILON
        {
            changed_agents.push(agent_id.to_string());
        }
    }

    if let Err(err) = config::save_atomic(configs, config_path) {
        warn!(error = %err, "failed to persist agent config after Strategist run");
    }

    changed_agents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn trade(profit: f64) -> ClosedTrade {
        ClosedTrade {
            position_id: 1,
            agent_id: "fibo1".to_string(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            volume: 0.01,
            open_price: Some(1.0),
            open_time: Some(0),
            close_price: 1.01,
            close_time: 1,
            profit,
            swap: 0.0,
            commission: 0.0,
            synced_at: "x".to_string(),
        }
    }

    #[test]
    fn ratio_guard_rail_clamps_to_1_5x() {
        let mut config = AgentConfig::default();
        config.tpsl_config.tp_pct = 0.3;
        let mut proposed = ProposedChanges::new();
        // Requesting sl_pct = 1.9 * tp_pct(0.3) = 0.57 -> clamp to 1.5*0.3=0.45.
        proposed.insert("sl_pct".to_string(), 0.57);
        let entries = apply_exact_values("fibo1", &mut config, &proposed, &[], None, 10_000);
        assert_eq!(entries.len(), 1);
        assert!((config.tpsl_config.sl_pct - 0.45).abs() < 1e-6);
    }

    #[test]
    fn amplitude_guard_rail_caps_delta_to_50_pct() {
        let mut config = AgentConfig::default();
        config.tpsl_config.tp_pct = 0.4;
        // 80% jump requested -> reduced to 50%.
        let mut proposed = ProposedChanges::new();
        proposed.insert("tp_pct".to_string(), 0.4 * 1.8);
        let entries = apply_exact_values("fibo1", &mut config, &proposed, &[], None, 10_000);
        assert_eq!(entries.len(), 1);
        assert!((config.tpsl_config.tp_pct - 0.6).abs() < 1e-6);
    }

    #[test]
    fn direction_lock_drops_reversal_within_4h() {
        let mut config = AgentConfig::default();
        let prior = AdjustmentLogEntry {
            timestamp: 10_000 - 3600,
            agent_id: "fibo1".to_string(),
            kind: "exact_value".to_string(),
            field: "fibo_tolerance_pct".to_string(),
            old_value: 2.0,
            new_value: 1.5,
            reason: None,
        };
        config.fibo_tolerance_pct = 1.5;
        let mut proposed = ProposedChanges::new();
        proposed.insert("fibo_tolerance_pct".to_string(), 2.0);
        let entries = apply_exact_values("fibo1", &mut config, &proposed, &[prior], None, 10_000);
        assert!(entries.is_empty());
        assert!((config.fibo_tolerance_pct - 1.5).abs() < 1e-9);
    }

    #[test]
    fn rate_limit_min_interval_drops_whole_batch() {
        let mut config = AgentConfig::default();
        let mut proposed = ProposedChanges::new();
        proposed.insert("cooldown_seconds".to_string(), 120.0);
        let entries = apply_exact_values("fibo1", &mut config, &proposed, &[], Some(10_000 - 300), 10_000);
        assert!(entries.is_empty());
    }

    #[test]
    fn rate_limit_max_4_per_hour_drops_batch() {
        let mut config = AgentConfig::default();
        let recent: Vec<_> = (0..4)
            .map(|i| AdjustmentLogEntry {
                timestamp: 10_000 - i * 60,
                agent_id: "fibo1".to_string(),
                kind: "exact_value".to_string(),
                field: "cooldown_seconds".to_string(),
                old_value: 180.0,
                new_value: 170.0,
                reason: None,
            })
            .collect();
        let mut proposed = ProposedChanges::new();
        proposed.insert("cooldown_seconds".to_string(), 160.0);
        let entries = apply_exact_values("fibo1", &mut config, &proposed, &recent, None, 10_000);
        assert!(entries.is_empty());
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let mut config = AgentConfig::default();
        let mut proposed = ProposedChanges::new();
        proposed.insert("not_a_real_field".to_string(), 1.0);
        let entries = apply_exact_values("fibo1", &mut config, &proposed, &[], None, 10_000);
        assert!(entries.is_empty());
    }

    #[test]
    fn rule_based_fallback_tightens_sl_on_negative_expectancy() {
        let trades: Vec<_> = (0..6).map(|_| trade(-5.0)).collect();
        let config = AgentConfig::default();
        let perf = derive_performance(&trades, &config.tpsl_config);
        assert!(perf.expectancy < 0.0);
        let changes = rule_based_fallback(&perf, &config);
        assert!(changes.contains_key("sl_pct"));
    }

    #[test]
    fn derive_performance_empty_trades_is_zeroed() {
        let config = AgentConfig::default();
        let perf = derive_performance(&[], &config.tpsl_config);
        assert_eq!(perf.trades, 0);
        assert_eq!(perf.win_rate, 0.0);
    }
}
