// =============================================================================
// Broker — gateway abstraction, mutual-exclusion gate, and demo implementation
// =============================================================================
//
// This engine's broker is a singleton MT5-style terminal session: one
// process-wide connection, one account at a time, serialized by `gate`. The
// vendor SDK itself is out of scope — `client` only defines the trait
// contract a real adapter would implement; `demo` is the in-repo paper-mode
// implementation that exercises the rest of the engine without one.
// =============================================================================

pub mod client;
pub mod demo;
pub mod gate;

pub use client::{
    BrokerClient, Candle, Deal, DealEntry, OrderAction, OrderRequest, OrderResult, Position,
    SymbolInfo, Tick, Timeframe,
};
pub use demo::DemoBrokerClient;
pub use gate::{AccountCredentials, BrokerGate, GateError, GateHandle};
