// =============================================================================
// Position Manager — trailing / break-even / winner-never-loser SL rules
// =============================================================================
//
// This manager never closes a position — it only ever proposes a new
// stop-loss, gated by a strict monotonicity invariant. Closing is the
// broker's job (SL/TP hit) or the Risk Guard's (emergency liquidation);
// this module just keeps SL marching toward profit as gain accrues.
// =============================================================================

use tracing::{debug, info};

use crate::config::TpslConfig;
use crate::types::Direction;

/// Which rule produced a proposed SL move, in priority order (first match
/// wins: trailing beats break-even beats winner-never-loser).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlRuleKind {
    Trailing,
    BreakEven,
    WinnerNeverLoser,
}

impl std::fmt::Display for SlRuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trailing => write!(f, "Trailing"),
            Self::BreakEven => write!(f, "BreakEven"),
            Self::WinnerNeverLoser => write!(f, "WinnerNeverLoser"),
        }
    }
}

/// Buffer applied for break-even / winner-never-loser moves: 0.02% of entry.
const BREAK_EVEN_BUFFER_PCT: f64 = 0.0002;
/// Minimum gain% to trigger the winner-never-loser rule.
const WINNER_NEVER_LOSER_TRIGGER_PCT: f64 = 0.05;

/// Gain percentage for a position currently at `current` relative to `entry`,
/// signed by direction: BUY -> (c-e)/e*100, SELL -> (e-c)/e*100.
pub fn gain_pct(direction: Direction, entry: f64, current: f64) -> f64 {
    if entry == 0.0 {
        return 0.0;
    }
    match direction {
        Direction::Buy => (current - entry) / entry * 100.0,
        Direction::Sell => (entry - current) / entry * 100.0,
    }
}

/// Compute a candidate new stop-loss for one position, applying the first
/// rule (in priority order) whose trigger condition is met. Returns `None`
/// if no rule fires.
pub fn candidate_sl(
    direction: Direction,
    entry: f64,
    current: f64,
    tpsl: &TpslConfig,
    winner_never_loser_enabled: bool,
) -> Option<(SlRuleKind, f64)> {
    let gain = gain_pct(direction, entry, current);

    if tpsl.trailing_enabled && gain >= tpsl.trailing_start_pct {
        let k = entry * tpsl.trailing_distance_pct / 100.0;
        let sl = match direction {
            Direction::Buy => current - k,
            Direction::Sell => current + k,
        };
        return Some((SlRuleKind::Trailing, sl));
    }

    if tpsl.break_even_enabled && gain >= tpsl.break_even_pct {
        let buffer = entry * BREAK_EVEN_BUFFER_PCT;
        let sl = match direction {
            Direction::Buy => entry + buffer,
            Direction::Sell => entry - buffer,
        };
        return Some((SlRuleKind::BreakEven, sl));
    }

    if winner_never_loser_enabled && gain >= WINNER_NEVER_LOSER_TRIGGER_PCT {
        let buffer = entry * BREAK_EVEN_BUFFER_PCT;
        let sl = match direction {
            Direction::Buy => entry + buffer,
            Direction::Sell => entry - buffer,
        };
        return Some((SlRuleKind::WinnerNeverLoser, sl));
    }

    None
}

/// Monotonicity gate: a new SL may only move toward profit. For BUY the new
/// SL must be strictly greater than the current SL (or the current SL is
/// unset/zero); for SELL strictly less (or unset/zero). Any candidate that
/// would retreat is discarded — this also gates Strategist-initiated SL
/// rewrites, not just this module's own proposals.
pub fn is_favorable_move(direction: Direction, current_sl: f64, new_sl: f64) -> bool {
    if current_sl == 0.0 {
        return true;
    }
    match direction {
        Direction::Buy => new_sl > current_sl,
        Direction::Sell => new_sl < current_sl,
    }
}

/// Result of running the Position Manager over one position: either a
/// favorable SL move to emit to the broker, or nothing to do.
pub struct SlDecision {
    pub ticket: u64,
    pub rule: SlRuleKind,
    pub new_sl: f64,
}

/// One position's inputs to the Position Manager, as read from the broker's
/// open-positions snapshot.
pub struct PositionSnapshot {
    pub ticket: u64,
    pub direction: Direction,
    pub entry: f64,
    pub current: f64,
    pub current_sl: f64,
}

/// Run the Position Manager over every position owned by one agent. Returns
/// the SL edits that should actually be sent to the broker — candidates that
/// fail the monotonicity gate are silently dropped (logged at debug), not
/// surfaced as errors.
pub fn run(
    positions: &[PositionSnapshot],
    tpsl: &TpslConfig,
    winner_never_loser_enabled: bool,
) -> Vec<SlDecision> {
    let mut decisions = Vec::new();

    for p in positions {
        let Some((rule, new_sl)) = candidate_sl(p.direction, p.entry, p.current, tpsl, winner_never_loser_enabled)
        else {
            continue;
        };

        if !is_favorable_move(p.direction, p.current_sl, new_sl) {
            debug!(
                ticket = p.ticket,
                rule = %rule,
                current_sl = p.current_sl,
                candidate_sl = new_sl,
                "SL candidate discarded: not a favorable move"
            );
            continue;
        }

        info!(ticket = p.ticket, rule = %rule, new_sl, "SL adjustment proposed");
        decisions.push(SlDecision {
            ticket: p.ticket,
            rule,
            new_sl,
        });
    }

    decisions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tpsl() -> TpslConfig {
        TpslConfig {
            tp_pct: 0.4,
            sl_pct: 0.5,
            trailing_start_pct: 0.3,
            trailing_distance_pct: 0.1,
            trailing_enabled: true,
            break_even_pct: 0.15,
            break_even_enabled: true,
            max_spread_points: 50.0,
            spread_check_enabled: true,
        }
    }

    #[test]
    fn gain_pct_buy_and_sell() {
        assert!((gain_pct(Direction::Buy, 100.0, 101.0) - 1.0).abs() < 1e-9);
        assert!((gain_pct(Direction::Sell, 100.0, 99.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_wins_over_break_even_when_both_trigger() {
        // gain of 0.3% triggers both trailing (>=0.3) and break-even (>=0.15);
        // trailing has priority.
        let (rule, _) = candidate_sl(Direction::Buy, 100000.0, 100300.0, &tpsl(), true).unwrap();
        assert_eq!(rule, SlRuleKind::Trailing);
    }

    #[test]
    fn scenario_3_sl_monotonicity_from_spec() {
        // Open BUY at 100000, SL 99500. Trailing cycle sees price=100300.
        let tp = tpsl();
        let (rule, sl) = candidate_sl(Direction::Buy, 100000.0, 100300.0, &tp, true).unwrap();
        assert_eq!(rule, SlRuleKind::Trailing);
        // k = entry * trailing_distance_pct/100 = 100000*0.1/100 = 100
        assert!((sl - 100200.0).abs() < 1e-6);
        assert!(is_favorable_move(Direction::Buy, 99500.0, sl));

        // Strategist lowers sl_pct 0.5->0.3, which alone would compute a
        // retreating SL of 99700 relative to the now-advanced 100200 — must
        // be discarded by the same monotonicity gate.
        assert!(!is_favorable_move(Direction::Buy, 100200.0, 99700.0));
    }

    #[test]
    fn break_even_buffer_is_tiny() {
        let mut tp = tpsl();
        tp.trailing_enabled = false;
        let (rule, sl) = candidate_sl(Direction::Buy, 100.0, 100.2, &tp, true).unwrap();
        assert_eq!(rule, SlRuleKind::BreakEven);
        assert!((sl - 100.02).abs() < 1e-9);
    }

    #[test]
    fn winner_never_loser_requires_global_flag() {
        let mut tp = tpsl();
        tp.trailing_enabled = false;
        tp.break_even_enabled = false;
        assert!(candidate_sl(Direction::Buy, 100.0, 100.06, &tp, false).is_none());
        let (rule, _) = candidate_sl(Direction::Buy, 100.0, 100.06, &tp, true).unwrap();
        assert_eq!(rule, SlRuleKind::WinnerNeverLoser);
    }

    #[test]
    fn no_rule_fires_below_all_thresholds() {
        let tp = tpsl();
        assert!(candidate_sl(Direction::Buy, 100.0, 100.01, &tp, true).is_none());
    }

    #[test]
    fn is_favorable_move_accepts_unset_sl() {
        assert!(is_favorable_move(Direction::Buy, 0.0, 99.0));
        assert!(is_favorable_move(Direction::Sell, 0.0, 101.0));
    }

    #[test]
    fn sell_direction_candidate_sl_moves_down() {
        let tp = tpsl();
        let (rule, sl) = candidate_sl(Direction::Sell, 100000.0, 99700.0, &tp, true).unwrap();
        assert_eq!(rule, SlRuleKind::Trailing);
        assert!(sl < 99700.0);
        assert!(is_favorable_move(Direction::Sell, 99900.0, sl));
    }

    #[test]
    fn run_drops_unfavorable_and_keeps_favorable() {
        let tp = tpsl();
        let positions = vec![
            PositionSnapshot {
                ticket: 1,
                direction: Direction::Buy,
                entry: 100000.0,
                current: 100300.0,
                current_sl: 99500.0,
            },
            PositionSnapshot {
                ticket: 2,
                direction: Direction::Buy,
                entry: 100000.0,
                current: 100300.0,
                current_sl: 100250.0, // already ahead of the 100200 candidate
            },
        ];
        let decisions = run(&positions, &tp, true);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].ticket, 1);
    }
}
