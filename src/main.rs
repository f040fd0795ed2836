// =============================================================================
// G13 Trading Engine — Main Entry Point
// =============================================================================
//
// Three independent strategy agents (`fibo1`/`fibo2`/`fibo3`) share one
// physical MT5 terminal session through the Broker Gate, so this entry point
// owns exactly one background worker — the Trading Loop — plus a thin
// read-mostly control API. The engine starts against the in-process
// `DemoBrokerClient` until a real MT5 adapter is wired in; nothing below
// assumes which `BrokerClient` impl is live.
// =============================================================================

mod api;
mod app_state;
mod broker;
mod config;
mod decider;
mod enrichment;
mod fibonacci;
mod ict_smc;
mod indicators;
mod ledger;
mod position_manager;
mod risk;
mod session;
mod strategist;
mod strategy;
mod sync;
mod trading_loop;
mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::{AccountCredentials, BrokerGate, DemoBrokerClient};
use crate::config::{AgentConfigMap, RiskConfig};
use crate::decider::{ApiKeysFile, ApiSelectionsFile, Decider, HttpDecider};
use crate::enrichment::{FuturesEnricher, NullEnricher, SentimentEnricher};
use crate::ict_smc::{IctSmcDetector, NullIctSmcDetector};

fn default_accounts() -> HashMap<String, AccountCredentials> {
    crate::types::AGENT_IDS
        .iter()
        .enumerate()
        .map(|(i, id)| {
            (
                id.to_string(),
                AccountCredentials {
                    login: 1001 + i as u64,
                    password: String::new(),
                    server: "Demo-Server".to_string(),
                    path: None,
                    enabled: true,
                },
            )
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        G13 Trading Engine — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let database_root = std::env::var("G13_DATABASE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./database"));
    std::fs::create_dir_all(&database_root)?;
    std::fs::create_dir_all(database_root.join("config"))?;
    info!(root = %database_root.display(), "database root ready");

    // ── Load config files, each falling back to a safe default on first run ──
    let configs: AgentConfigMap =
        config::load_or_default(database_root.join("config").join("agents.json"), config::default_agent_config_map);
    let risk_config: RiskConfig =
        config::load_or_default(database_root.join("config").join("risk_config.json"), RiskConfig::default);
    let accounts: HashMap<String, AccountCredentials> =
        config::load_or_default(database_root.join("config").join("mt5_accounts.json"), default_accounts);
    let api_keys: ApiKeysFile =
        config::load_or_default(database_root.join("config").join("api_keys.json"), ApiKeysFile::default);
    let api_selections: ApiSelectionsFile =
        config::load_or_default(database_root.join("config").join("api_selections.json"), ApiSelectionsFile::default);

    // ── Broker + Gate ─────────────────────────────────────────────────────
    let seed_login = accounts.get("fibo1").map(|a| a.login).unwrap_or(1001);
    let broker_client = Arc::new(DemoBrokerClient::new(seed_login, 10_000.0));
    let gate = BrokerGate::new(broker_client, accounts);

    // ── Decider + enrichers ───────────────────────────────────────────────
    let decider_endpoint =
        std::env::var("G13_DECIDER_ENDPOINT").unwrap_or_else(|_| "http://localhost:8000/decide".to_string());
    let decider: Arc<dyn Decider> = Arc::new(HttpDecider::new(decider_endpoint, api_keys, api_selections));
    let sentiment: Arc<dyn SentimentEnricher> = Arc::new(NullEnricher);
    let futures: Arc<dyn FuturesEnricher> = Arc::new(NullEnricher);
    let ict: Arc<dyn IctSmcDetector> = Arc::new(NullIctSmcDetector);

    let state = Arc::new(AppState::new(database_root, gate, risk_config, configs, decider, ict, sentiment, futures));

    // ── Session lifecycle: resume whatever was on disk, or start fresh ────
    let initial_balance = std::env::var("G13_INITIAL_BALANCE").ok().and_then(|s| s.parse().ok());
    let session = session::start_resume(&state.ledger, initial_balance);
    info!(session_id = %session.id, status = %session.status, "session resumed");

    // ── Trading Loop ───────────────────────────────────────────────────────
    let loop_state = state.clone();
    tokio::spawn(async move {
        trading_loop::run(loop_state).await;
    });

    // ── Control API ────────────────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("G13_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind control API");
        info!(addr = %bind_addr, "control API listening");
        axum::serve(listener, app).await.expect("control API failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");
    state.set_running(false);
    session::end(&state.ledger, &state.history_dir);

    info!("G13 Trading Engine shut down complete.");
    Ok(())
}
