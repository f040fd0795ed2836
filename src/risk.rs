// =============================================================================
// Risk Guard — drawdown / daily-loss / emergency-close verdicts
// =============================================================================
//
// Stateful per process: holds two reference balances per agent —
// `session_start_balance` (first sight of the account this session) and
// `day_start_balance` (first sight that calendar day). A day rollover wipes
// the day-start map and any "blocked" markers. Every check returns one of
// three verdicts, computed directly off equity vs. those two reference
// points — there is no consecutive-loss or trade-count breaker here.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::types::{AccountInfo, RiskVerdict};

struct Inner {
    session_start_balance: HashMap<String, f64>,
    day_start_balance: HashMap<String, f64>,
    blocked: HashSet<String>,
    current_date: String,
}

/// Computes `RiskVerdict`s for agents against their reference balances.
pub struct RiskGuard {
    state: RwLock<Inner>,
    config: RiskConfig,
}

impl RiskGuard {
    pub fn new(config: RiskConfig) -> Self {
        info!(
            max_drawdown_pct = config.max_drawdown_pct,
            max_daily_loss_pct = config.max_daily_loss_pct,
            emergency_close_pct = config.emergency_close_pct,
            "RiskGuard initialised"
        );
        Self {
            state: RwLock::new(Inner {
                session_start_balance: HashMap::new(),
                day_start_balance: HashMap::new(),
                blocked: HashSet::new(),
                current_date: Utc::now().format("%Y-%m-%d").to_string(),
            }),
            config,
        }
    }

    /// Whether the Winner-Never-Loser break-even rule is enabled globally
    /// (`config/risk_config.json`). Exposed here because `RiskConfig` itself
    /// is private to this module once wrapped in a `RiskGuard`.
    pub fn winner_never_loser_enabled(&self) -> bool {
        self.config.winner_never_loser
    }

    /// Compute the verdict for `agent` given its current account snapshot.
    ///
    /// First sight of an agent seeds both reference balances from `equity`;
    /// every later call checks against whichever reference was captured
    /// first (session start never moves; day start moves once per rollover).
    pub fn check(&self, agent: &str, account: &AccountInfo) -> RiskVerdict {
        self.maybe_reset_daily();

        let mut s = self.state.write();

        let session_start = *s
            .session_start_balance
            .entry(agent.to_string())
            .or_insert(account.equity);
        let day_start = *s
            .day_start_balance
            .entry(agent.to_string())
            .or_insert(account.equity);

        let emergency_dd = if session_start > 0.0 {
            (session_start - account.equity) / session_start * 100.0
        } else {
            0.0
        };
        if emergency_dd >= self.config.emergency_close_pct {
            warn!(
                agent,
                emergency_dd,
                threshold = self.config.emergency_close_pct,
                "EmergencyClose: equity breached emergency threshold from session start"
            );
            return RiskVerdict::EmergencyClose;
        }

        let drawdown_pct = if session_start > 0.0 {
            (session_start - account.equity) / session_start * 100.0
        } else {
            0.0
        };
        let daily_loss_pct = if day_start > 0.0 {
            (day_start - account.equity) / day_start * 100.0
        } else {
            0.0
        };

        if drawdown_pct >= self.config.max_drawdown_pct || daily_loss_pct >= self.config.max_daily_loss_pct {
            if s.blocked.insert(agent.to_string()) {
                warn!(
                    agent,
                    drawdown_pct,
                    daily_loss_pct,
                    "Block: agent entered blocked set"
                );
            }
            return RiskVerdict::Block;
        }

        if s.blocked.remove(agent) {
            info!(agent, "unblocked: drawdown and daily loss back within bounds");
        }

        RiskVerdict::Ok
    }

    /// Whether `agent` is currently in the blocked set.
    pub fn is_blocked(&self, agent: &str) -> bool {
        self.state.read().blocked.contains(agent)
    }

    /// If the calendar date has changed since the last check, wipe the
    /// day-start reference map and blocked set. Double-checked: the cheap
    /// read-lock path covers the common case where the date hasn't rolled.
    fn maybe_reset_daily(&self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        if s.current_date != today {
            info!(old_date = %s.current_date, new_date = %today, "date rolled — resetting day-start balances");
            s.day_start_balance.clear();
            s.blocked.clear();
            s.current_date = today;
        }
    }
}

impl std::fmt::Debug for RiskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("RiskGuard")
            .field("agents_tracked", &s.session_start_balance.len())
            .field("blocked", &s.blocked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(equity: f64) -> AccountInfo {
        AccountInfo {
            login: 1,
            balance: equity,
            equity,
            margin: 0.0,
            margin_free: equity,
        }
    }

    fn guard() -> RiskGuard {
        RiskGuard::new(RiskConfig {
            max_drawdown_pct: 10.0,
            max_daily_loss_pct: 5.0,
            emergency_close_pct: 15.0,
            winner_never_loser: true,
        })
    }

    #[test]
    fn first_sight_seeds_reference_and_returns_ok() {
        let g = guard();
        assert_eq!(g.check("fibo1", &account(10_000.0)), RiskVerdict::Ok);
    }

    #[test]
    fn emergency_close_at_threshold() {
        let g = guard();
        g.check("fibo1", &account(10_000.0));
        // 15% drawdown from 10000 -> 8500
        assert_eq!(g.check("fibo1", &account(8_400.0)), RiskVerdict::EmergencyClose);
    }

    #[test]
    fn block_on_drawdown_and_unblock_on_recovery() {
        let g = guard();
        g.check("fibo1", &account(10_000.0));
        assert_eq!(g.check("fibo1", &account(8_950.0)), RiskVerdict::Block);
        assert!(g.is_blocked("fibo1"));
        assert_eq!(g.check("fibo1", &account(9_999.0)), RiskVerdict::Ok);
        assert!(!g.is_blocked("fibo1"));
    }

    #[test]
    fn block_does_not_escalate_to_emergency_below_threshold() {
        let g = guard();
        g.check("fibo1", &account(10_000.0));
        assert_eq!(g.check("fibo1", &account(9_000.0)), RiskVerdict::Block);
    }

    #[test]
    fn agents_tracked_independently() {
        let g = guard();
        g.check("fibo1", &account(10_000.0));
        g.check("fibo2", &account(5_000.0));
        assert_eq!(g.check("fibo2", &account(4_200.0)), RiskVerdict::EmergencyClose);
        assert_eq!(g.check("fibo1", &account(10_000.0)), RiskVerdict::Ok);
    }
}
