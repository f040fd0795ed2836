// =============================================================================
// Broker Gate — the single mutual-exclusion token over the broker session
// =============================================================================
//
// Grounded on `original_source/backend/actions/mt5/mt5_lock.py` and
// `connect.py`: the vendor terminal API is a process-wide singleton, so the
// only safe abstraction is one lock plus a two-phase Acquire/Release
// contract. `mt5_lock.py`'s own docstring states the lock is only ever taken
// by `connect_mt5`/released by `disconnect_mt5` — callers never touch it
// directly, which is why every other `BrokerClient` method above assumes the
// token is already held rather than taking it itself.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use super::client::BrokerClient;
use crate::types::AccountInfo;

/// Matches `original_source`'s `MT5_LOCK_TIMEOUT = 30` (seconds).
pub const GATE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
/// Matches `original_source`'s `MT5_TIMEOUT = 60000` (milliseconds).
pub const BROKER_INIT_TIMEOUT_MS: u64 = 60_000;

/// One row of `config/mt5_accounts.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub login: u64,
    pub password: String,
    pub server: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

/// Non-fatal failure modes from `Acquire`. The caller always decides to
/// skip the agent and retry next tick — none of these are treated as fatal
/// by the Trading Loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GateError {
    #[error("timed out waiting {0:?} for the broker gate token")]
    LockTimeout(Duration),
    #[error("agent {0} is disabled in mt5_accounts.json")]
    AgentDisabled(String),
    #[error("agent {0} has no entry in mt5_accounts.json")]
    AgentUnknown(String),
    #[error("broker initialize failed: {0}")]
    InitFailed(String),
    #[error("login mismatch: expected {expected}, broker reports {actual}")]
    LoginMismatch { expected: u64, actual: u64 },
    #[error("broker returned no account info after initialize")]
    NoAccountInfo,
}

/// Proof that the caller currently holds the gate token. Dropping it releases
/// the token (even on an unwinding panic, satisfying the "every Acquire is
/// paired with exactly one Release on all paths" invariant) but does **not**
/// itself call `BrokerClient::shutdown` — async drop does not exist in safe
/// Rust, so callers should prefer `BrokerGate::release`, which tears the
/// broker session down before dropping the guard. A bare drop still leaves
/// the token safe to re-acquire; only the underlying terminal connection is
/// left dangling until the next `acquire` tears it down anyway (step (b)).
pub struct GateHandle<'g> {
    _permit: MutexGuard<'g, ()>,
}

/// The process-wide gate. One instance is shared (`Arc`) across the whole
/// engine; the Trading Loop is its only caller.
pub struct BrokerGate<C: BrokerClient> {
    client: Arc<C>,
    token: Mutex<()>,
    accounts: HashMap<String, AccountCredentials>,
}

impl<C: BrokerClient> BrokerGate<C> {
    pub fn new(client: Arc<C>, accounts: HashMap<String, AccountCredentials>) -> Self {
        Self {
            client,
            token: Mutex::new(()),
            accounts,
        }
    }

    /// Acquire the gate for `agent_id`. On any failure the token (if taken)
    /// is released before returning.
    pub async fn acquire(&self, agent_id: &str) -> Result<(GateHandle<'_>, AccountInfo), GateError> {
        let creds = self
            .accounts
            .get(agent_id)
            .ok_or_else(|| GateError::AgentUnknown(agent_id.to_string()))?;
        if !creds.enabled {
            return Err(GateError::AgentDisabled(agent_id.to_string()));
        }

        let permit = tokio::time::timeout(GATE_ACQUIRE_TIMEOUT, self.token.lock())
            .await
            .map_err(|_| GateError::LockTimeout(GATE_ACQUIRE_TIMEOUT))?;

        // (b) tear down any prior session, unconditionally.
        let _ = self.client.shutdown().await;

        // (c) initialize with this agent's credentials.
        if let Err(err) = self
            .client
            .initialize(creds.login, &creds.password, &creds.server, BROKER_INIT_TIMEOUT_MS)
            .await
        {
            warn!(agent = agent_id, error = %err, "broker initialize failed");
            drop(permit);
            return Err(GateError::InitFailed(err.to_string()));
        }

        // (d) verify the active login matches the expected login.
        let account = match self.client.account_info().await {
            Ok(account) => account,
            Err(_) => {
                drop(permit);
                return Err(GateError::NoAccountInfo);
            }
        };
        if account.login != creds.login {
            warn!(
                agent = agent_id,
                expected = creds.login,
                actual = account.login,
                "broker login mismatch"
            );
            let _ = self.client.shutdown().await;
            drop(permit);
            return Err(GateError::LoginMismatch {
                expected: creds.login,
                actual: account.login,
            });
        }

        info!(agent = agent_id, login = account.login, "broker gate acquired");
        Ok((GateHandle { _permit: permit }, account))
    }

    /// Release the gate: shuts the broker session down, then drops the
    /// token. Idempotent in the sense that calling `shutdown` on an already
    /// torn-down client is safe (the demo client and a real MT5 adapter both
    /// treat it as a no-op when nothing is connected).
    pub async fn release(&self, handle: GateHandle<'_>) {
        let _ = self.client.shutdown().await;
        drop(handle);
        info!("broker gate released");
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::demo::DemoBrokerClient;

    fn accounts() -> HashMap<String, AccountCredentials> {
        let mut m = HashMap::new();
        m.insert(
            "fibo1".to_string(),
            AccountCredentials {
                login: 1001,
                password: "x".to_string(),
                server: "Demo-Server".to_string(),
                path: None,
                enabled: true,
            },
        );
        m.insert(
            "fibo2".to_string(),
            AccountCredentials {
                login: 1002,
                password: "x".to_string(),
                server: "Demo-Server".to_string(),
                path: None,
                enabled: false,
            },
        );
        m
    }

    #[tokio::test]
    async fn acquire_unknown_agent_fails() {
        let gate = BrokerGate::new(Arc::new(DemoBrokerClient::new(1001, 10_000.0)), accounts());
        let err = gate.acquire("nope").await.unwrap_err();
        assert!(matches!(err, GateError::AgentUnknown(_)));
    }

    #[tokio::test]
    async fn acquire_disabled_agent_fails() {
        let gate = BrokerGate::new(Arc::new(DemoBrokerClient::new(1002, 10_000.0)), accounts());
        let err = gate.acquire("fibo2").await.unwrap_err();
        assert!(matches!(err, GateError::AgentDisabled(_)));
    }

    #[tokio::test]
    async fn acquire_then_release_round_trip() {
        let gate = BrokerGate::new(Arc::new(DemoBrokerClient::new(1001, 10_000.0)), accounts());
        let (handle, account) = gate.acquire("fibo1").await.unwrap();
        assert_eq!(account.login, 1001);
        gate.release(handle).await;

        // Token must be free again.
        let (handle2, _) = gate.acquire("fibo1").await.unwrap();
        gate.release(handle2).await;
    }

    #[tokio::test]
    async fn login_mismatch_releases_token() {
        let mut accts = accounts();
        accts.get_mut("fibo1").unwrap().login = 9999; // client is seeded with 1001
        let gate = BrokerGate::new(Arc::new(DemoBrokerClient::new(1001, 10_000.0)), accts);
        let err = gate.acquire("fibo1").await.unwrap_err();
        assert!(matches!(err, GateError::LoginMismatch { .. }));

        // Token must not be left locked even though the prior attempt failed
        // after taking it — a second attempt on the same gate must not hang.
        let err2 = tokio::time::timeout(Duration::from_secs(1), gate.acquire("fibo1"))
            .await
            .expect("should not time out waiting for the token")
            .unwrap_err();
        assert!(matches!(err2, GateError::LoginMismatch { .. }));
    }
}
