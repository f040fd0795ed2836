// =============================================================================
// Decider — the external LLM/rule decider contract
// =============================================================================
//
// Grounded on `original_source/backend/agents/ai_decision.py`'s `call_ai`
// (one `requests.post` with a 30s timeout, `None` on any failure) and
// `original_source/backend/agents/prompt_builder.py`'s prompt assembly.
// `HttpDecider` wraps one POST and maps every transport failure to `None` —
// the Strategy Agent's decision step treats a `None` return as HOLD.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Requests past this timeout are treated as a transport failure.
pub const DECIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// A single API key entry from `config/api_keys.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub id: String,
    pub key: String,
    pub model: String,
    pub provider: String,
}

/// `config/api_keys.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeysFile {
    #[serde(default)]
    pub keys: Vec<ApiKeyEntry>,
}

/// `config/api_selections.json`: which key id each agent (or `"strategist"`)
/// uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSelectionsFile {
    #[serde(default)]
    pub selections: std::collections::HashMap<String, String>,
}

/// `Decide(agent_id, prompt, system_prompt, max_tokens) -> text | null`.
/// A `None` return is treated as `HOLD` by every caller — never an error the
/// cycle needs to propagate.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, agent_id: &str, prompt: &str, system_prompt: &str, max_tokens: u32) -> Option<String>;
}

/// Default HTTP-backed decider. Any transport error or timeout maps to
/// `None` rather than propagating — callers never need to distinguish
/// "HOLD" from "the decider is down".
pub struct HttpDecider {
    client: reqwest::Client,
    endpoint: String,
    keys: ApiKeysFile,
    selections: ApiSelectionsFile,
}

impl HttpDecider {
    pub fn new(endpoint: impl Into<String>, keys: ApiKeysFile, selections: ApiSelectionsFile) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            keys,
            selections,
        }
    }

    fn key_for(&self, agent_id: &str) -> Option<&ApiKeyEntry> {
        let key_id = self.selections.selections.get(agent_id)?;
        self.keys.keys.iter().find(|k| &k.id == key_id)
    }
}

#[derive(Serialize)]
struct DecideRequest<'a> {
    model: &'a str,
    system_prompt: &'a str,
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct DecideResponse {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl Decider for HttpDecider {
    async fn decide(&self, agent_id: &str, prompt: &str, system_prompt: &str, max_tokens: u32) -> Option<String> {
        let Some(key) = self.key_for(agent_id) else {
            warn!(agent_id, "no api key selection configured — treating as HOLD");
            return None;
        };

        let body = DecideRequest {
            model: &key.model,
            system_prompt,
            prompt,
            max_tokens,
        };

        let result = tokio::time::timeout(
            DECIDER_TIMEOUT,
            self.client
                .post(&self.endpoint)
                .bearer_auth(&key.key)
                .json(&body)
                .send(),
        )
        .await;

        match result {
            Err(_) => {
                warn!(agent_id, "decider call timed out — treating as HOLD");
                None
            }
            Ok(Err(err)) => {
                warn!(agent_id, error = %err, "decider HTTP error — treating as HOLD");
                None
            }
            Ok(Ok(resp)) => match resp.json::<DecideResponse>().await {
                Ok(parsed) => parsed.text,
                Err(err) => {
                    warn!(agent_id, error = %err, "decider returned unparseable body — treating as HOLD");
                    None
                }
            },
        }
    }
}

/// Raw `{BUY, SELL, HOLD}` verdict parsed from decider text, plus the
/// free-text reason that follows it. `original_source`'s decider returns
/// `"ACTION: BUY\nREASON: ..."` style text; this parser is tolerant of
/// case and of the action appearing as the first non-empty line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeciderAction {
    Buy,
    Sell,
    Hold,
}

pub fn parse_decider_text(text: &str) -> (DeciderAction, String) {
    let upper = text.to_uppercase();
    let action = if upper.contains("BUY") {
        DeciderAction::Buy
    } else if upper.contains("SELL") {
        DeciderAction::Sell
    } else {
        DeciderAction::Hold
    };
    let reason = text
        .lines()
        .find(|l| l.to_uppercase().contains("REASON"))
        .map(|l| l.to_string())
        .unwrap_or_else(|| text.trim().to_string());
    (action, reason)
}
