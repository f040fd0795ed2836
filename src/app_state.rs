// =============================================================================
// Central Application State — G13 Trading Engine
// =============================================================================
//
// The single source of truth the Trading Loop (and, read-only, the thin
// control API) shares. The broker session is owned by `BrokerGate`, the
// ledger files are their own locking domain, so the only genuinely mutable
// in-process state held here is per-agent runtime bookkeeping and the
// session-running flag. Thread safety: `parking_lot::RwLock` for mutable
// collections, `Arc` for subsystem engines, atomics for flags.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::broker::{BrokerClient, BrokerGate};
use crate::config::{AgentConfigMap, RiskConfig};
use crate::decider::Decider;
use crate::enrichment::{FuturesEnricher, SentimentEnricher};
use crate::ict_smc::IctSmcDetector;
use crate::ledger::Ledger;
use crate::risk::RiskGuard;
use crate::strategy::StrategyAgentState;

/// Everything the Trading Loop needs across ticks, for one running engine
/// instance. Generic over the broker implementation so the same state shape
/// serves both `DemoBrokerClient` and a real MT5 adapter.
pub struct AppState<C: BrokerClient> {
    pub ledger: Ledger,
    pub gate: BrokerGate<C>,
    pub risk: RiskGuard,

    pub database_root: PathBuf,
    pub history_dir: PathBuf,
    pub config_path: PathBuf,

    pub configs: RwLock<AgentConfigMap>,
    pub agent_runtime: RwLock<HashMap<String, StrategyAgentState>>,
    pub last_adjustment_time: RwLock<HashMap<String, i64>>,

    pub decider: Arc<dyn Decider>,
    pub ict: Arc<dyn IctSmcDetector>,
    pub sentiment: Arc<dyn SentimentEnricher>,
    pub futures: Arc<dyn FuturesEnricher>,

    /// Cooperative stop flag: the loop checks this at each tick boundary,
    /// not mid-cycle.
    pub is_running: AtomicBool,
    pub last_stats_run: AtomicI64,
    pub last_strategist_run: AtomicI64,
}

impl<C: BrokerClient> AppState<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database_root: PathBuf,
        gate: BrokerGate<C>,
        risk_config: RiskConfig,
        configs: AgentConfigMap,
        decider: Arc<dyn Decider>,
        ict: Arc<dyn IctSmcDetector>,
        sentiment: Arc<dyn SentimentEnricher>,
        futures: Arc<dyn FuturesEnricher>,
    ) -> Self {
        let history_dir = database_root.join("history");
        let config_path = database_root.join("config").join("agents.json");
        Self {
            ledger: Ledger::new(database_root.clone()),
            gate,
            risk: RiskGuard::new(risk_config),
            database_root,
            history_dir,
            config_path,
            configs: RwLock::new(configs),
            agent_runtime: RwLock::new(
                crate::types::AGENT_IDS
                    .iter()
                    .map(|id| (id.to_string(), StrategyAgentState::default()))
                    .collect(),
            ),
            last_adjustment_time: RwLock::new(HashMap::new()),
            decider,
            ict,
            sentiment,
            futures,
            is_running: AtomicBool::new(true),
            last_stats_run: AtomicI64::new(0),
            last_strategist_run: AtomicI64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.is_running.store(running, Ordering::SeqCst);
    }
}
