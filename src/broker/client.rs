// =============================================================================
// BrokerClient — the broker gateway contract
// =============================================================================
//
// Pure function wrappers that assume the Broker Gate token is already held.
// None of these acquire or release anything; the gate is the only thing that
// may do so (see `gate.rs`).
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{AccountInfo, Direction};

/// Timeframes a candle request may be made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H4 => "H4",
            Self::D1 => "D1",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M1" => Ok(Self::M1),
            "M5" => Ok(Self::M5),
            "M15" => Ok(Self::M15),
            "M30" => Ok(Self::M30),
            "H1" => Ok(Self::H1),
            "H4" => Ok(Self::H4),
            "D1" => Ok(Self::D1),
            other => anyhow::bail!("unknown timeframe {other}"),
        }
    }
}

/// A single OHLC bar as returned by `CopyRatesFromPos`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: u64,
}

/// Current bid/ask for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
    pub time: i64,
}

/// Static trading parameters for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub tick_size: f64,
    pub tick_value: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub digits: u32,
    pub contract_size: f64,
    pub point: f64,
    /// Contract size used for margin/P&L math; distinct from `contract_size`
    /// when a broker quotes a different lot convention for trading vs display.
    pub trade_contract_size: f64,
    /// Per-tick value used for trading calculations (may differ from
    /// `tick_value` for symbols quoted in a non-deposit currency).
    pub trade_tick_value: f64,
    /// Whether the symbol is currently selected/visible in Market Watch.
    pub visible: bool,
}

/// A currently open position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    pub sl: f64,
    pub tp: f64,
    pub profit: f64,
    pub comment: String,
}

/// Entry semantics for a historical deal: `IN` opens a position, `OUT` closes
/// (or partially closes) one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealEntry {
    In,
    Out,
}

/// One leg of a position's history, as returned by `HistoryDealsGet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    pub position_id: u64,
    pub entry: DealEntry,
    pub price: f64,
    pub profit: f64,
    pub swap: f64,
    pub commission: f64,
    pub time: i64,
}

/// `OrderSend` action kind: open/close a deal, or edit an existing position's
/// SL/TP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Deal,
    Sltp,
}

/// Request body for `OrderSend`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub action: OrderAction,
    pub symbol: String,
    pub volume: f64,
    pub direction: Direction,
    /// Ticket of the position being edited/closed; `None` for a fresh open.
    pub position: Option<u64>,
    pub price: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub deviation: u32,
    pub magic: u32,
    pub comment: String,
}

/// Result of an `OrderSend` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub retcode: u32,
    pub order: u64,
    pub price: f64,
    pub volume: f64,
    pub comment: String,
}

/// `TRADE_RETCODE_DONE` equivalent — the only retcode this engine treats as
/// success.
pub const RETCODE_DONE: u32 = 10009;

/// The broker gateway contract. Every method assumes the caller already
/// holds the Broker Gate token; none of these acquire or release it.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn initialize(&self, login: u64, password: &str, server: &str, timeout_ms: u64) -> anyhow::Result<()>;
    async fn account_info(&self) -> anyhow::Result<AccountInfo>;
    async fn symbol_info(&self, symbol: &str) -> anyhow::Result<SymbolInfo>;
    async fn symbol_select(&self, symbol: &str, visible: bool) -> anyhow::Result<()>;
    async fn tick(&self, symbol: &str) -> anyhow::Result<Tick>;
    async fn copy_rates_from_pos(&self, symbol: &str, timeframe: Timeframe, count: usize) -> anyhow::Result<Vec<Candle>>;
    async fn positions_get(&self, symbol: Option<&str>) -> anyhow::Result<Vec<Position>>;
    async fn position_by_ticket(&self, ticket: u64) -> anyhow::Result<Option<Position>>;
    async fn history_deals_get(&self, position_id: u64) -> anyhow::Result<Vec<Deal>>;
    async fn order_send(&self, request: OrderRequest) -> anyhow::Result<OrderResult>;
    async fn shutdown(&self) -> anyhow::Result<()>;
}
