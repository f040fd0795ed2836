// =============================================================================
// Shared types used across the G13 trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Account snapshot returned by `BrokerClient::account_info`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub margin_free: f64,
}

/// Trade side. Carried through from signal to ticket to closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Whether the Trading Loop is currently allowed to act on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Stopped,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifecycle of a ticket: open while the broker still reports the position,
/// closed once a matching closing deal has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Open,
    Closed,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Risk Guard verdict for a given agent/account pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskVerdict {
    EmergencyClose,
    Block,
    Ok,
}

/// The three named agents this engine drives. `original_source` has no class
/// hierarchy for these — a single concrete agent type parameterized by
/// config is sufficient, so this is just an id, not a type tag.
pub const AGENT_IDS: [&str; 3] = ["fibo1", "fibo2", "fibo3"];
