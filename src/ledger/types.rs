// =============================================================================
// Ledger data model
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Direction, SessionStatus, TicketStatus};

/// `session.json`. Created on first Start; mutated only by session lifecycle
/// operations; never deleted — replaced on explicit "New Session", which
/// first archives prior contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub start_time: String,
    #[serde(default)]
    pub balance_start: Option<f64>,
    #[serde(default)]
    pub status: SessionStatus,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: String::new(),
            start_time: String::new(),
            balance_start: None,
            status: SessionStatus::Stopped,
        }
    }
}

/// One row of `session_tickets.json`. Created when a trade is opened; status
/// flipped to `closed` when its closing deal is observed. Never deleted
/// within a session; cleared on session reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket: u64,
    pub agent_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub opened_at: String,
    pub status: TicketStatus,
}

/// `closed_trades/<agent>.json`. The broker's closing deal record plus
/// `agent_id`, the opening price/time when observable, and `synced_at`.
/// Keyed by position id (MT5's "ticket" field and "position id" name the same
/// underlying broker-assigned identifier); append-only within a session;
/// sorted by close-time descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position_id: u64,
    pub agent_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    #[serde(default)]
    pub open_price: Option<f64>,
    #[serde(default)]
    pub open_time: Option<i64>,
    pub close_price: f64,
    pub close_time: i64,
    pub profit: f64,
    #[serde(default)]
    pub swap: f64,
    #[serde(default)]
    pub commission: f64,
    pub synced_at: String,
}

/// `open_positions/<agent>.json`. Rewritten wholesale on each sync from
/// broker truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    pub sl: f64,
    pub tp: f64,
    pub profit: f64,
    pub comment: String,
}

/// `stats/<agent>.json`. Rederived from `ClosedTrade[]` — never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub winrate: f64,
    pub total_profit: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    /// `avg_win / |avg_loss|`, 0 when `avg_loss` is 0. Used by the session
    /// archive's "per-agent summary" section.
    #[serde(default)]
    pub risk_reward: f64,
    pub best: f64,
    pub worst: f64,
    pub updated_at: String,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_trades: 0,
            wins: 0,
            losses: 0,
            winrate: 0.0,
            total_profit: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            profit_factor: 0.0,
            risk_reward: 0.0,
            best: 0.0,
            worst: 0.0,
            updated_at: String::new(),
        }
    }
}

/// One row of `performance_history.json`'s per-agent (or `"master"`) series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: i64,
    pub closed_pnl: f64,
    pub floating_pnl: f64,
}

/// One row of `adjustments_log.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentLogEntry {
    pub timestamp: i64,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub field: String,
    pub old_value: f64,
    pub new_value: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One row of `decisions/decisions.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: i64,
    pub agent_id: String,
    pub action: String,
    pub reason: String,
    pub symbol: String,
    pub price: f64,
    pub executed: bool,
}
