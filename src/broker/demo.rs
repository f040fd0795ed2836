// =============================================================================
// DemoBrokerClient — deterministic paper-trading implementation of BrokerClient
// =============================================================================
//
// The vendor SDK itself is out of scope; this is the in-repo stand-in so the
// rest of the engine is fully exercised without one, simulating a fill
// locally instead of reaching the real terminal. Fills are deterministic:
// an order always fills at the last observed tick, and ticks are driven by
// whatever the caller feeds via `set_price` (a test harness or a replay
// feed), never by a clock or RNG — nondeterminism has no place in a paper
// client meant to make unit tests reproducible.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::client::{
    BrokerClient, Candle, Deal, DealEntry, OrderAction, OrderRequest, OrderResult, Position,
    SymbolInfo, Tick, Timeframe, RETCODE_DONE,
};
use crate::types::{AccountInfo, Direction};

struct Inner {
    connected: bool,
    login: u64,
    balance: f64,
    equity: f64,
    prices: HashMap<String, f64>,
    positions: Vec<Position>,
    deals: HashMap<u64, Vec<Deal>>,
}

/// A deterministic, in-memory `BrokerClient`. One instance represents one
/// broker-terminal session, mirroring the real vendor API's process-wide
/// singleton shape closely enough that `BrokerGate` exercises the same
/// acquire/init/verify/release sequence it would against a live adapter.
pub struct DemoBrokerClient {
    state: RwLock<Inner>,
    next_ticket: AtomicU64,
}

impl DemoBrokerClient {
    pub fn new(login: u64, starting_balance: f64) -> Self {
        Self {
            state: RwLock::new(Inner {
                connected: false,
                login,
                balance: starting_balance,
                equity: starting_balance,
                prices: HashMap::new(),
                positions: Vec::new(),
                deals: HashMap::new(),
            }),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Feed a price for `symbol`. Drives both `tick()` and fills.
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state.write().prices.insert(symbol.to_string(), price);
    }

    /// Override the account equity directly (for Risk Guard test scenarios).
    pub fn set_equity(&self, equity: f64) {
        self.state.write().equity = equity;
    }

    fn require_connected(&self) -> anyhow::Result<()> {
        if !self.state.read().connected {
            bail!("demo broker not connected");
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for DemoBrokerClient {
    async fn initialize(&self, login: u64, _password: &str, _server: &str, _timeout_ms: u64) -> anyhow::Result<()> {
        let mut s = self.state.write();
        if login != s.login {
            bail!("demo broker configured for login {}, got {login}", s.login);
        }
        s.connected = true;
        Ok(())
    }

    async fn account_info(&self) -> anyhow::Result<AccountInfo> {
        self.require_connected()?;
        let s = self.state.read();
        Ok(AccountInfo {
            login: s.login,
            balance: s.balance,
            equity: s.equity,
            margin: 0.0,
            margin_free: s.equity,
        })
    }

    async fn symbol_info(&self, _symbol: &str) -> anyhow::Result<SymbolInfo> {
        self.require_connected()?;
        Ok(SymbolInfo {
            tick_size: 0.00001,
            tick_value: 1.0,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            digits: 5,
            contract_size: 100_000.0,
            point: 0.00001,
            trade_contract_size: 100_000.0,
            trade_tick_value: 1.0,
            visible: true,
        })
    }

    async fn symbol_select(&self, _symbol: &str, _visible: bool) -> anyhow::Result<()> {
        self.require_connected()
    }

    async fn tick(&self, symbol: &str) -> anyhow::Result<Tick> {
        self.require_connected()?;
        let price = *self
            .state
            .read()
            .prices
            .get(symbol)
            .ok_or_else(|| anyhow::anyhow!("no price fed for {symbol}"))?;
        Ok(Tick {
            bid: price,
            ask: price,
            time: 0,
        })
    }

    async fn copy_rates_from_pos(&self, symbol: &str, _timeframe: Timeframe, count: usize) -> anyhow::Result<Vec<Candle>> {
        self.require_connected()?;
        let price = *self.state.read().prices.get(symbol).unwrap_or(&0.0);
        // Flat synthetic series at the last observed price — enough for
        // callers that just need *some* closes to compute indicators over in
        // tests; a live adapter returns real history here.
        Ok((0..count)
            .map(|i| Candle {
                time: i as i64,
                open: price,
                high: price,
                low: price,
                close: price,
                tick_volume: 0,
            })
            .collect())
    }

    async fn positions_get(&self, symbol: Option<&str>) -> anyhow::Result<Vec<Position>> {
        self.require_connected()?;
        let s = self.state.read();
        Ok(s.positions
            .iter()
            .filter(|p| symbol.map(|sym| sym == p.symbol).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn position_by_ticket(&self, ticket: u64) -> anyhow::Result<Option<Position>> {
        self.require_connected()?;
        Ok(self.state.read().positions.iter().find(|p| p.ticket == ticket).cloned())
    }

    async fn history_deals_get(&self, position_id: u64) -> anyhow::Result<Vec<Deal>> {
        self.require_connected()?;
        Ok(self.state.read().deals.get(&position_id).cloned().unwrap_or_default())
    }

    async fn order_send(&self, request: OrderRequest) -> anyhow::Result<OrderResult> {
        self.require_connected()?;
        let mut s = self.state.write();

        match request.action {
            OrderAction::Deal if request.position.is_none() => {
                // Open.
                let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
                let price = *s.prices.get(&request.symbol).unwrap_or(&request.price);
                s.positions.push(Position {
                    ticket,
                    symbol: request.symbol.clone(),
                    direction: request.direction,
                    volume: request.volume,
                    price_open: price,
                    price_current: price,
                    sl: request.sl.unwrap_or(0.0),
                    tp: request.tp.unwrap_or(0.0),
                    profit: 0.0,
                    comment: request.comment.clone(),
                });
                s.deals.entry(ticket).or_default().push(Deal {
                    ticket,
                    position_id: ticket,
                    entry: DealEntry::In,
                    price,
                    profit: 0.0,
                    swap: 0.0,
                    commission: 0.0,
                    time: 0,
                });
                Ok(OrderResult {
                    retcode: RETCODE_DONE,
                    order: ticket,
                    price,
                    volume: request.volume,
                    comment: "opened".to_string(),
                })
            }
            OrderAction::Deal => {
                // Close: position must be present.
                let ticket = request.position.expect("checked above");
                let idx = s
                    .positions
                    .iter()
                    .position(|p| p.ticket == ticket)
                    .ok_or_else(|| anyhow::anyhow!("no such position {ticket}"))?;
                let pos = s.positions.remove(idx);
                let price = *s.prices.get(&pos.symbol).unwrap_or(&pos.price_current);
                let direction_sign = match pos.direction {
                    Direction::Buy => 1.0,
                    Direction::Sell => -1.0,
                };
                let profit = direction_sign * (price - pos.price_open) * pos.volume;
                s.balance += profit;
                s.equity = s.balance;
                s.deals.entry(ticket).or_default().push(Deal {
                    ticket,
                    position_id: ticket,
                    entry: DealEntry::Out,
                    price,
                    profit,
                    swap: 0.0,
                    commission: 0.0,
                    time: 0,
                });
                Ok(OrderResult {
                    retcode: RETCODE_DONE,
                    order: ticket,
                    price,
                    volume: pos.volume,
                    comment: "closed".to_string(),
                })
            }
            OrderAction::Sltp => {
                let ticket = request
                    .position
                    .ok_or_else(|| anyhow::anyhow!("SLTP edit requires a position ticket"))?;
                let pos = s
                    .positions
                    .iter_mut()
                    .find(|p| p.ticket == ticket)
                    .ok_or_else(|| anyhow::anyhow!("no such position {ticket}"))?;
                if let Some(sl) = request.sl {
                    pos.sl = sl;
                }
                if let Some(tp) = request.tp {
                    pos.tp = tp;
                }
                Ok(OrderResult {
                    retcode: RETCODE_DONE,
                    order: ticket,
                    price: pos.price_current,
                    volume: pos.volume,
                    comment: "sltp updated".to_string(),
                })
            }
        }
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.state.write().connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_then_close_realizes_pnl() {
        let client = DemoBrokerClient::new(1001, 10_000.0);
        client.initialize(1001, "x", "srv", 1000).await.unwrap();
        client.set_price("EURUSD", 1.1000);

        let opened = client
            .order_send(OrderRequest {
                action: OrderAction::Deal,
                symbol: "EURUSD".to_string(),
                volume: 1.0,
                direction: Direction::Buy,
                position: None,
                price: 1.1000,
                sl: Some(1.0950),
                tp: Some(1.1050),
                deviation: 5,
                magic: 42,
                comment: "G13_fibo1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(opened.retcode, RETCODE_DONE);

        client.set_price("EURUSD", 1.1050);
        let closed = client
            .order_send(OrderRequest {
                action: OrderAction::Deal,
                symbol: "EURUSD".to_string(),
                volume: 1.0,
                direction: Direction::Buy,
                position: Some(opened.order),
                price: 1.1050,
                sl: None,
                tp: None,
                deviation: 5,
                magic: 42,
                comment: "".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(closed.retcode, RETCODE_DONE);

        let account = client.account_info().await.unwrap();
        assert!((account.balance - 10_005.0).abs() < 1e-6);

        let deals = client.history_deals_get(opened.order).await.unwrap();
        assert_eq!(deals.len(), 2);
        assert_eq!(deals[0].entry, DealEntry::In);
        assert_eq!(deals[1].entry, DealEntry::Out);
    }

    #[tokio::test]
    async fn sltp_edit_mutates_existing_position_only() {
        let client = DemoBrokerClient::new(1001, 10_000.0);
        client.initialize(1001, "x", "srv", 1000).await.unwrap();
        client.set_price("EURUSD", 1.1000);

        let opened = client
            .order_send(OrderRequest {
                action: OrderAction::Deal,
                symbol: "EURUSD".to_string(),
                volume: 1.0,
                direction: Direction::Buy,
                position: None,
                price: 1.1000,
                sl: Some(1.0950),
                tp: Some(1.1050),
                deviation: 5,
                magic: 1,
                comment: "G13_fibo1".to_string(),
            })
            .await
            .unwrap();

        client
            .order_send(OrderRequest {
                action: OrderAction::Sltp,
                symbol: "EURUSD".to_string(),
                volume: 1.0,
                direction: Direction::Buy,
                position: Some(opened.order),
                price: 0.0,
                sl: Some(1.0980),
                tp: None,
                deviation: 0,
                magic: 1,
                comment: "".to_string(),
            })
            .await
            .unwrap();

        let pos = client.position_by_ticket(opened.order).await.unwrap().unwrap();
        assert!((pos.sl - 1.0980).abs() < 1e-9);
        assert!((pos.tp - 1.1050).abs() < 1e-9); // untouched
    }

    #[tokio::test]
    async fn operations_require_initialize_first() {
        let client = DemoBrokerClient::new(1001, 10_000.0);
        assert!(client.account_info().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_disconnects() {
        let client = DemoBrokerClient::new(1001, 10_000.0);
        client.initialize(1001, "x", "srv", 1000).await.unwrap();
        client.shutdown().await.unwrap();
        assert!(client.account_info().await.is_err());
    }
}
