// =============================================================================
// Ledger — thin atomic JSON store
// =============================================================================
//
// Grounded on the atomic tmp+rename load/save pattern used throughout this
// codebase's persistence layer, generalized to every file under the
// `database/` layout, and on
// `original_source/backend/actions/sync/sync_closed.py` for the dedup-by-
// ticket / sort-by-time-descending behavior of `append_closed_trade`.
//
// Contract: on malformed file or missing file, return the empty value for
// that type — never raise to the caller. Every file is guarded by a
// dedicated in-process lock so concurrent callers within this process never
// interleave a read-modify-write; the design explicitly does not guard
// against other processes writing the same directory.
// =============================================================================

mod types;

pub use types::{AdjustmentLogEntry, ClosedTrade, Decision, OpenPosition, PerformanceSample, Session, Stats, Ticket};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::types::{TicketStatus, AGENT_IDS};

pub const PERFORMANCE_HISTORY_RING: usize = 2000;
pub const ADJUSTMENTS_RING: usize = 100;
pub const DECISIONS_RING: usize = 100;

/// Read `T` from `path`. Malformed or missing file returns `default()` — the
/// ledger never raises to the caller.
fn read_or_default<T: DeserializeOwned>(path: &Path, default: impl FnOnce() -> T) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "ledger file malformed, using empty value");
            default()
        }),
        Err(_) => default(),
    }
}

/// Write `value` to `path` using the atomic write-tmp-then-rename pattern.
/// Failures are logged, not propagated — non-fatal, and the next write
/// retries.
fn write_atomic<T: Serialize>(path: &Path, value: &T) {
    let Some(parent) = path.parent() else { return };
    if let Err(err) = std::fs::create_dir_all(parent) {
        warn!(path = %parent.display(), error = %err, "ledger write failed: could not create directory");
        return;
    }
    let content = match serde_json::to_string_pretty(value) {
        Ok(c) => c,
        Err(err) => {
            warn!(error = %err, "ledger write failed: could not serialize");
            return;
        }
    };
    let tmp_path = path.with_extension("json.tmp");
    if let Err(err) = std::fs::write(&tmp_path, &content) {
        warn!(path = %tmp_path.display(), error = %err, "ledger write failed: could not write tmp file");
        return;
    }
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        warn!(path = %path.display(), error = %err, "ledger write failed: could not rename tmp file");
    }
}

/// One named lock per logical file this process may write, keyed by a
/// stable string (e.g. `"closed_trades:fibo1"`). Locks are created lazily —
/// only the fixed agent set and the handful of global files are ever used,
/// so the map never grows unbounded.
struct Locks {
    by_key: Mutex<HashMap<String, std::sync::Arc<Mutex<()>>>>,
}

impl Locks {
    fn new() -> Self {
        Self {
            by_key: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> std::sync::Arc<Mutex<()>> {
        let mut map = self.by_key.lock();
        map.entry(key.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone()
    }
}

/// The ledger root is `database/`; every method below addresses one named
/// file under it.
pub struct Ledger {
    root: PathBuf,
    locks: Locks,
}

impl Ledger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Locks::new(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.locks.get(key);
        let _guard = lock.lock();
        f()
    }

    // -------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------

    pub fn load_session(&self) -> Session {
        self.with_lock("session", || read_or_default(&self.path("session.json"), Session::default))
    }

    pub fn save_session(&self, session: &Session) {
        self.with_lock("session", || write_atomic(&self.path("session.json"), session));
    }

    // -------------------------------------------------------------------
    // Tickets
    // -------------------------------------------------------------------

    pub fn load_tickets(&self) -> Vec<Ticket> {
        self.with_lock("tickets", || read_or_default(&self.path("session_tickets.json"), Vec::new))
    }

    pub fn save_ticket(&self, ticket: Ticket) {
        self.with_lock("tickets", || {
            let path = self.path("session_tickets.json");
            let mut tickets: Vec<Ticket> = read_or_default(&path, Vec::new);
            tickets.push(ticket);
            write_atomic(&path, &tickets);
        });
    }

    /// Flip the ticket's status to `closed`. No-op if the ticket is not
    /// found — idempotent against repeated calls for the same ticket.
    pub fn mark_closed(&self, ticket_id: u64) {
        self.with_lock("tickets", || {
            let path = self.path("session_tickets.json");
            let mut tickets: Vec<Ticket> = read_or_default(&path, Vec::new);
            if let Some(t) = tickets.iter_mut().find(|t| t.ticket == ticket_id) {
                t.status = TicketStatus::Closed;
                write_atomic(&path, &tickets);
            }
        });
    }

    pub fn clear_tickets(&self) {
        self.with_lock("tickets", || {
            write_atomic(&self.path("session_tickets.json"), &Vec::<Ticket>::new());
        });
    }

    // -------------------------------------------------------------------
    // Closed trades
    // -------------------------------------------------------------------

    fn closed_trades_path(&self, agent: &str) -> PathBuf {
        self.root.join("closed_trades").join(format!("{agent}.json"))
    }

    pub fn load_closed_trades(&self, agent: &str) -> Vec<ClosedTrade> {
        let key = format!("closed_trades:{agent}");
        self.with_lock(&key, || read_or_default(&self.closed_trades_path(agent), Vec::new))
    }

    /// Dedup by position-id key, then sort by close-time descending.
    /// Running this twice in a row with the same (already-present) trade is
    /// a no-op — sync can re-report a closed trade it already recorded
    /// without creating a duplicate entry.
    pub fn append_closed_trade(&self, agent: &str, trade: ClosedTrade) {
        let key = format!("closed_trades:{agent}");
        self.with_lock(&key, || {
            let path = self.closed_trades_path(agent);
            let mut trades: Vec<ClosedTrade> = read_or_default(&path, Vec::new);
            if trades.iter().any(|t| t.position_id == trade.position_id) {
                return;
            }
            trades.push(trade);
            trades.sort_by(|a, b| b.close_time.cmp(&a.close_time));
            write_atomic(&path, &trades);
        });
    }

    // -------------------------------------------------------------------
    // Open positions
    // -------------------------------------------------------------------

    fn open_positions_path(&self, agent: &str) -> PathBuf {
        self.root.join("open_positions").join(format!("{agent}.json"))
    }

    pub fn load_open_positions(&self, agent: &str) -> Vec<OpenPosition> {
        let key = format!("open_positions:{agent}");
        self.with_lock(&key, || read_or_default(&self.open_positions_path(agent), Vec::new))
    }

    /// Rewritten wholesale on each sync from broker truth.
    pub fn rewrite_open_positions(&self, agent: &str, positions: Vec<OpenPosition>) {
        let key = format!("open_positions:{agent}");
        self.with_lock(&key, || write_atomic(&self.open_positions_path(agent), &positions));
    }

    // -------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------

    fn stats_path(&self, agent: &str) -> PathBuf {
        self.root.join("stats").join(format!("{agent}.json"))
    }

    pub fn load_stats(&self, agent: &str) -> Stats {
        let key = format!("stats:{agent}");
        self.with_lock(&key, || read_or_default(&self.stats_path(agent), Stats::default))
    }

    pub fn save_stats(&self, agent: &str, stats: &Stats) {
        let key = format!("stats:{agent}");
        self.with_lock(&key, || write_atomic(&self.stats_path(agent), stats));
    }

    // -------------------------------------------------------------------
    // Performance history
    // -------------------------------------------------------------------

    pub fn append_performance_sample(&self, key: &str, sample: PerformanceSample) {
        self.with_lock("performance_history", || {
            let path = self.path("performance_history.json");
            let mut all: HashMap<String, Vec<PerformanceSample>> = read_or_default(&path, HashMap::new);
            let series = all.entry(key.to_string()).or_default();
            series.push(sample);
            if series.len() > PERFORMANCE_HISTORY_RING {
                let overflow = series.len() - PERFORMANCE_HISTORY_RING;
                series.drain(0..overflow);
            }
            write_atomic(&path, &all);
        });
    }

    pub fn load_performance_history(&self) -> HashMap<String, Vec<PerformanceSample>> {
        self.with_lock("performance_history", || {
            read_or_default(&self.path("performance_history.json"), HashMap::new)
        })
    }

    // -------------------------------------------------------------------
    // Adjustments log
    // -------------------------------------------------------------------

    /// Insert at head, ring-trim to [`ADJUSTMENTS_RING`].
    pub fn append_adjustment(&self, entry: AdjustmentLogEntry) {
        self.with_lock("adjustments", || {
            let path = self.path("adjustments_log.json");
            let mut log: Vec<AdjustmentLogEntry> = read_or_default(&path, Vec::new);
            log.insert(0, entry);
            log.truncate(ADJUSTMENTS_RING);
            write_atomic(&path, &log);
        });
    }

    pub fn recent_adjustments(&self, limit: usize) -> Vec<AdjustmentLogEntry> {
        self.with_lock("adjustments", || {
            let log: Vec<AdjustmentLogEntry> = read_or_default(&self.path("adjustments_log.json"), Vec::new);
            log.into_iter().take(limit).collect()
        })
    }

    // -------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------

    pub fn log_decision(&self, agent: &str, action: &str, reason: &str, symbol: &str, price: f64, executed: bool) {
        self.with_lock("decisions", || {
            let path = self.path("decisions/decisions.json");
            let mut log: Vec<Decision> = read_or_default(&path, Vec::new);
            log.push(Decision {
                timestamp: Utc::now().timestamp(),
                agent_id: agent.to_string(),
                action: action.to_string(),
                reason: reason.to_string(),
                symbol: symbol.to_string(),
                price,
                executed,
            });
            if log.len() > DECISIONS_RING {
                let overflow = log.len() - DECISIONS_RING;
                log.drain(0..overflow);
            }
            write_atomic(&path, &log);
        });
    }

    pub fn load_decisions(&self) -> Vec<Decision> {
        self.with_lock("decisions", || read_or_default(&self.path("decisions/decisions.json"), Vec::new))
    }

    // -------------------------------------------------------------------
    // Session reset (force_new)
    // -------------------------------------------------------------------

    /// Resets `closed_trades`, `stats`, `open_positions`, `decisions`,
    /// `logs`, `session_tickets`, and `performance_history` — preserving
    /// only `config/` and `history/`. Broader than
    /// `original_source/backend/actions/session/start.py`'s `_reset_all_data`,
    /// which omits `session_tickets`/`performance_history`; this engine
    /// resets all seven so a fresh session never inherits stale ring
    /// buffers from the last one.
    pub fn reset_for_new_session(&self) {
        self.clear_tickets();
        self.with_lock("performance_history", || {
            write_atomic(&self.path("performance_history.json"), &HashMap::<String, Vec<PerformanceSample>>::new());
        });
        self.with_lock("decisions", || {
            let _ = std::fs::remove_file(self.path("decisions/decisions.json"));
        });
        self.with_lock("logs", || {
            let logs_dir = self.path("logs");
            if logs_dir.is_dir() {
                let _ = std::fs::remove_dir_all(&logs_dir);
            }
        });
        for agent in AGENT_IDS {
            let key = format!("closed_trades:{agent}");
            self.with_lock(&key, || write_atomic(&self.closed_trades_path(agent), &Vec::<ClosedTrade>::new()));
            let key = format!("open_positions:{agent}");
            self.with_lock(&key, || write_atomic(&self.open_positions_path(agent), &Vec::<OpenPosition>::new()));
            let key = format!("stats:{agent}");
            self.with_lock(&key, || write_atomic(&self.stats_path(agent), &Stats::default()));
        }
    }
}
