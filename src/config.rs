// =============================================================================
// Configuration — AgentConfig map + RiskConfig, with atomic save
// =============================================================================
//
// Every tunable the Strategist is allowed to touch lives here. Persistence
// uses the same atomic tmp + rename pattern as the rest of the ledger so a
// crash mid-write never leaves a truncated config file on disk. All fields
// carry `#[serde(default = "...")]` so that adding a field never breaks
// loading a config written by an older build.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Parameter bounds the Strategist is allowed to propose exact values within
// =============================================================================

pub const FIBO_TOLERANCE_PCT_MIN: f64 = 0.5;
pub const FIBO_TOLERANCE_PCT_MAX: f64 = 5.0;
pub const COOLDOWN_SECONDS_MIN: u64 = 60;
pub const COOLDOWN_SECONDS_MAX: u64 = 600;
pub const POSITION_SIZE_PCT_MIN: f64 = 0.005;
pub const POSITION_SIZE_PCT_MAX: f64 = 0.05;
pub const TP_PCT_MIN: f64 = 0.1;
pub const TP_PCT_MAX: f64 = 1.0;
pub const SL_PCT_MIN: f64 = 0.2;
pub const SL_PCT_MAX: f64 = 1.0;

/// Bounds table for every parameter the Strategist is allowed to set exact
/// target values for. Mirrors `original_source/backend/strategy/strategist_ai.py`'s
/// `PARAM_BOUNDS`; the rule-based fallback path does not get its own,
/// looser bounds — every caller clamps against this same table.
pub fn param_bounds(name: &str) -> Option<(f64, f64)> {
    match name {
        "fibo_tolerance_pct" => Some((FIBO_TOLERANCE_PCT_MIN, FIBO_TOLERANCE_PCT_MAX)),
        "cooldown_seconds" => Some((COOLDOWN_SECONDS_MIN as f64, COOLDOWN_SECONDS_MAX as f64)),
        "position_size_pct" => Some((POSITION_SIZE_PCT_MIN, POSITION_SIZE_PCT_MAX)),
        "tp_pct" => Some((TP_PCT_MIN, TP_PCT_MAX)),
        "sl_pct" => Some((SL_PCT_MIN, SL_PCT_MAX)),
        _ => None,
    }
}

fn default_true() -> bool {
    true
}

fn default_timeframe() -> String {
    "M5".to_string()
}

fn default_fibo_level() -> String {
    "0.618".to_string()
}

fn default_fibo_tolerance_pct() -> f64 {
    1.5
}

fn default_cooldown_seconds() -> u64 {
    180
}

fn default_position_size_pct() -> f64 {
    0.01
}

fn default_max_positions() -> u32 {
    1
}

fn default_killzone_start() -> String {
    "00:00".to_string()
}

fn default_killzone_end() -> String {
    "23:59".to_string()
}

fn default_tp_pct() -> f64 {
    0.4
}

fn default_sl_pct() -> f64 {
    0.5
}

fn default_trailing_start_pct() -> f64 {
    0.3
}

fn default_trailing_distance_pct() -> f64 {
    0.15
}

fn default_break_even_pct() -> f64 {
    0.15
}

fn default_max_spread_points() -> f64 {
    50.0
}

// =============================================================================
// TpslConfig
// =============================================================================

/// SL/TP and position-management tunables for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpslConfig {
    #[serde(default = "default_tp_pct")]
    pub tp_pct: f64,
    #[serde(default = "default_sl_pct")]
    pub sl_pct: f64,
    #[serde(default = "default_trailing_start_pct")]
    pub trailing_start_pct: f64,
    #[serde(default = "default_trailing_distance_pct")]
    pub trailing_distance_pct: f64,
    #[serde(default = "default_true")]
    pub trailing_enabled: bool,
    #[serde(default = "default_break_even_pct")]
    pub break_even_pct: f64,
    #[serde(default = "default_true")]
    pub break_even_enabled: bool,
    #[serde(default = "default_max_spread_points")]
    pub max_spread_points: f64,
    #[serde(default = "default_true")]
    pub spread_check_enabled: bool,
}

impl Default for TpslConfig {
    fn default() -> Self {
        Self {
            tp_pct: default_tp_pct(),
            sl_pct: default_sl_pct(),
            trailing_start_pct: default_trailing_start_pct(),
            trailing_distance_pct: default_trailing_distance_pct(),
            trailing_enabled: true,
            break_even_pct: default_break_even_pct(),
            break_even_enabled: true,
            max_spread_points: default_max_spread_points(),
            spread_check_enabled: true,
        }
    }
}

// =============================================================================
// AgentConfig
// =============================================================================

/// Per-agent configuration. One entry per `fibo1`/`fibo2`/`fibo3` in
/// `config/agents.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub symbol: String,

    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    #[serde(default = "default_fibo_level")]
    pub fibo_level: String,

    #[serde(default = "default_fibo_tolerance_pct")]
    pub fibo_tolerance_pct: f64,

    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: f64,

    #[serde(default = "default_max_positions")]
    pub max_positions: u32,

    #[serde(default)]
    pub killzone_enabled: bool,

    #[serde(default = "default_killzone_start")]
    pub killzone_start: String,

    #[serde(default = "default_killzone_end")]
    pub killzone_end: String,

    #[serde(default = "default_true")]
    pub ia_adjust_enabled: bool,

    #[serde(default)]
    pub tpsl_config: TpslConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            symbol: "EURUSD".to_string(),
            timeframe: default_timeframe(),
            fibo_level: default_fibo_level(),
            fibo_tolerance_pct: default_fibo_tolerance_pct(),
            cooldown_seconds: default_cooldown_seconds(),
            position_size_pct: default_position_size_pct(),
            max_positions: default_max_positions(),
            killzone_enabled: false,
            killzone_start: default_killzone_start(),
            killzone_end: default_killzone_end(),
            ia_adjust_enabled: true,
            tpsl_config: TpslConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Clamp a field named `field` to its bounds after a mutation. No-op for
    /// fields the Strategist/Auto-Adjust is not allowed to touch.
    pub fn clamp_field(&mut self, field: &str) {
        match field {
            "fibo_tolerance_pct" => {
                self.fibo_tolerance_pct = self
                    .fibo_tolerance_pct
                    .clamp(FIBO_TOLERANCE_PCT_MIN, FIBO_TOLERANCE_PCT_MAX)
            }
            "cooldown_seconds" => {
                self.cooldown_seconds = self
                    .cooldown_seconds
                    .clamp(COOLDOWN_SECONDS_MIN, COOLDOWN_SECONDS_MAX)
            }
            "position_size_pct" => {
                self.position_size_pct = self
                    .position_size_pct
                    .clamp(POSITION_SIZE_PCT_MIN, POSITION_SIZE_PCT_MAX)
            }
            "tp_pct" => self.tpsl_config.tp_pct = self.tpsl_config.tp_pct.clamp(TP_PCT_MIN, TP_PCT_MAX),
            "sl_pct" => self.tpsl_config.sl_pct = self.tpsl_config.sl_pct.clamp(SL_PCT_MIN, SL_PCT_MAX),
            _ => {}
        }
    }
}

// =============================================================================
// RiskConfig
// =============================================================================

fn default_max_drawdown_pct() -> f64 {
    10.0
}

fn default_max_daily_loss_pct_risk() -> f64 {
    5.0
}

fn default_emergency_close_pct() -> f64 {
    15.0
}

/// Global risk parameters shared across all agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_max_daily_loss_pct_risk")]
    pub max_daily_loss_pct: f64,
    #[serde(default = "default_emergency_close_pct")]
    pub emergency_close_pct: f64,
    #[serde(default = "default_true")]
    pub winner_never_loser: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: default_max_drawdown_pct(),
            max_daily_loss_pct: default_max_daily_loss_pct_risk(),
            emergency_close_pct: default_emergency_close_pct(),
            winner_never_loser: true,
        }
    }
}

// =============================================================================
// AgentConfigMap — the whole of config/agents.json
// =============================================================================

pub type AgentConfigMap = HashMap<String, AgentConfig>;

/// Default three-agent map matching `crate::types::AGENT_IDS`.
pub fn default_agent_config_map() -> AgentConfigMap {
    crate::types::AGENT_IDS
        .iter()
        .map(|id| (id.to_string(), AgentConfig::default()))
        .collect()
}

// =============================================================================
// Load / save (atomic tmp + rename, shared shape with the ledger module)
// =============================================================================

/// Load a `T: DeserializeOwned` from `path`, falling back to `default()` and
/// logging a warning when the file is missing or malformed. Config files are
/// not part of the ledger's never-raise contract — they are loaded once at
/// startup, not hot-pathed, so a clear error belongs in the log.
pub fn load_or_default<T>(path: impl AsRef<Path>, default: impl FnOnce() -> T) -> T
where
    T: serde::de::DeserializeOwned,
{
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "config file malformed, using defaults");
                default()
            }
        },
        Err(_) => {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            default()
        }
    }
}

/// Persist `value` to `path` using an atomic write: write to a `.tmp`
/// sibling, then rename over the original, so a crash mid-write never
/// leaves a truncated file in its place.
pub fn save_atomic<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();

    let content = serde_json::to_string_pretty(value).context("failed to serialise config to JSON")?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

    info!(path = %path.display(), "config saved (atomic)");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_agent_config_has_expected_values() {
        let cfg = AgentConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.timeframe, "M5");
        assert!((cfg.fibo_tolerance_pct - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.cooldown_seconds, 180);
        assert!((cfg.tpsl_config.tp_pct - 0.4).abs() < f64::EPSILON);
        assert!((cfg.tpsl_config.sl_pct - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: AgentConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.max_positions, 1);
        assert!(cfg.ia_adjust_enabled);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "GBPUSD", "fibo_tolerance_pct": 2.0 }"#;
        let cfg: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbol, "GBPUSD");
        assert!((cfg.fibo_tolerance_pct - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.timeframe, "M5");
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = AgentConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbol, cfg2.symbol);
        assert!((cfg.tpsl_config.sl_pct - cfg2.tpsl_config.sl_pct).abs() < f64::EPSILON);
    }

    #[test]
    fn clamp_field_respects_bounds() {
        let mut cfg = AgentConfig::default();
        cfg.fibo_tolerance_pct = 99.0;
        cfg.clamp_field("fibo_tolerance_pct");
        assert!((cfg.fibo_tolerance_pct - FIBO_TOLERANCE_PCT_MAX).abs() < f64::EPSILON);

        cfg.tpsl_config.sl_pct = 0.01;
        cfg.clamp_field("sl_pct");
        assert!((cfg.tpsl_config.sl_pct - SL_PCT_MIN).abs() < f64::EPSILON);
    }

    #[test]
    fn param_bounds_rejects_unknown() {
        assert!(param_bounds("not_a_real_param").is_none());
        assert_eq!(param_bounds("sl_pct"), Some((SL_PCT_MIN, SL_PCT_MAX)));
    }

    #[test]
    fn default_risk_config_has_expected_values() {
        let cfg = RiskConfig::default();
        assert!((cfg.emergency_close_pct - 15.0).abs() < f64::EPSILON);
        assert!(cfg.winner_never_loser);
    }

    #[test]
    fn save_and_load_roundtrip_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let map = default_agent_config_map();
        save_atomic(&map, &path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let loaded: AgentConfigMap = load_or_default(&path, HashMap::new);
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.json");
        let loaded: AgentConfigMap = load_or_default(&path, default_agent_config_map);
        assert_eq!(loaded.len(), 3);
    }
}
