// =============================================================================
// Session Lifecycle
// =============================================================================
//
// Follows `original_source/backend/actions/session/start.py` (resume vs.
// force_new) and `.../session/end.py` (archive-then-stop), re-expressed with
// the same atomic-write discipline as the rest of the ledger. The archive
// report format follows `original_source/backend/actions/session/
// session_history.py`'s section order: header, per-agent summary, per-agent
// trades, tickets, decisions, adjustments.
//
// This engine archives once, on whichever event fires first after the last
// archive — `force_new` and `end` both route through `archive_if_pending`,
// which is a no-op if the session has nothing to archive (no closed trade,
// decision, or ticket recorded) or if it was already archived since the
// last reset. That also keeps a second `force_new` in a row a no-op rather
// than a second archive file.
// =============================================================================

use std::fmt::Write as _;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::ledger::{Ledger, Session};
use crate::types::SessionStatus;

/// Build the human-readable session report archived under
/// `history/YYYY-MM-DD_HHhMM_±X.XX$.txt`. Pure function of ledger state so
/// it's trivially testable without touching the filesystem.
pub fn build_report(ledger: &Ledger, session: &Session) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== G13 Session Report ===");
    let _ = writeln!(out, "Session ID: {}", session.id);
    let _ = writeln!(out, "Start: {}", session.start_time);
    let _ = writeln!(out, "Archived: {}", Utc::now().to_rfc3339());
    let _ = writeln!(out);

    let mut total_pnl = 0.0;
    for agent in crate::types::AGENT_IDS {
        let trades = ledger.load_closed_trades(agent);
        let stats = ledger.load_stats(agent);
        let agent_pnl: f64 = trades.iter().map(|t| t.profit).sum();
        total_pnl += agent_pnl;

        let _ = writeln!(out, "--- Agent: {agent} ---");
        let _ = writeln!(
            out,
            "Trades: {}  Wins: {}  Losses: {}  Winrate: {:.1}%  PF: {:.2}  R:R: {:.2}",
            stats.total_trades, stats.wins, stats.losses, stats.winrate, stats.profit_factor, stats.risk_reward
        );
        let _ = writeln!(out, "P/L: {:.2}", agent_pnl);
        for t in &trades {
            let _ = writeln!(
                out,
                "  [{}] {} {} vol={:.2} open={:.5} close={:.5} profit={:.2}",
                t.close_time, t.symbol, t.direction, t.volume, t.open_price.unwrap_or(0.0), t.close_price, t.profit
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "--- Session Tickets ---");
    for ticket in ledger.load_tickets() {
        let _ = writeln!(
            out,
            "  #{} {} {} {} opened={} status={}",
            ticket.ticket, ticket.agent_id, ticket.symbol, ticket.direction, ticket.opened_at, ticket.status
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "--- AI Decisions ---");
    for d in ledger.load_decisions() {
        let _ = writeln!(
            out,
            "  [{}] {} {} {} @ {:.5} reason=\"{}\" executed={}",
            d.timestamp, d.agent_id, d.action, d.symbol, d.price, d.reason, d.executed
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "--- Adjustments ---");
    for a in ledger.recent_adjustments(100) {
        let _ = writeln!(
            out,
            "  [{}] {} {}.{}: {:.4} -> {:.4} ({})",
            a.timestamp,
            a.agent_id,
            a.kind,
            a.field,
            a.old_value,
            a.new_value,
            a.reason.as_deref().unwrap_or("")
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "=== Total session P/L: {total_pnl:+.2} ===");
    out
}

fn archive_filename(total_pnl: f64) -> String {
    let now = Utc::now();
    format!("{}_{:+.2}$.txt", now.format("%Y-%m-%d_%Hh%M"), total_pnl)
}

/// Whether the current session has anything worth archiving — at least one
/// closed trade, decision, or ticket recorded.
fn has_archivable_activity(ledger: &Ledger) -> bool {
    if !ledger.load_tickets().is_empty() {
        return true;
    }
    if !ledger.load_decisions().is_empty() {
        return true;
    }
    crate::types::AGENT_IDS
        .iter()
        .any(|agent| !ledger.load_closed_trades(agent).is_empty())
}

/// Archive the current session to `history/` if it has recorded any activity
/// since the last archive, then return whether a file was written. Both
/// `force_new` and `end` call this — see the module-level note on the
/// resolved open question.
pub fn archive_if_pending(ledger: &Ledger, session: &Session, history_dir: &std::path::Path) -> bool {
    if !has_archivable_activity(ledger) {
        return false;
    }
    let total_pnl: f64 = crate::types::AGENT_IDS
        .iter()
        .flat_map(|agent| ledger.load_closed_trades(agent))
        .map(|t| t.profit)
        .sum();

    let report = build_report(ledger, session);
    let filename = archive_filename(total_pnl);
    if let Err(err) = std::fs::create_dir_all(history_dir) {
        tracing::warn!(error = %err, "failed to create history directory");
        return false;
    }
    let path = history_dir.join(&filename);
    if let Err(err) = std::fs::write(&path, report) {
        tracing::warn!(error = %err, path = %path.display(), "failed to write session archive");
        return false;
    }
    info!(path = %path.display(), "session archived");
    true
}

/// Resume: if a session exists, mark it active and patch a missing balance;
/// never resets ledgers. Idempotent — this is what a process restart uses.
pub fn start_resume(ledger: &Ledger, initial_balance: Option<f64>) -> Session {
    let mut session = ledger.load_session();
    if session.id.is_empty() {
        session = Session {
            id: Uuid::new_v4().to_string(),
            start_time: Utc::now().to_rfc3339(),
            balance_start: initial_balance,
            status: SessionStatus::Active,
        };
    } else {
        session.status = SessionStatus::Active;
        if session.balance_start.is_none() {
            session.balance_start = initial_balance;
        }
    }
    ledger.save_session(&session);
    session
}

/// Force a new session: archive pending activity, reset every per-session
/// ledger file (preserving `config/` and `history/`), then create a fresh
/// session record.
pub fn start_force_new(ledger: &Ledger, history_dir: &std::path::Path, initial_balance: Option<f64>) -> Session {
    let current = ledger.load_session();
    if !current.id.is_empty() {
        archive_if_pending(ledger, &current, history_dir);
    }
    ledger.reset_for_new_session();

    let session = Session {
        id: Uuid::new_v4().to_string(),
        start_time: Utc::now().to_rfc3339(),
        balance_start: initial_balance,
        status: SessionStatus::Active,
    };
    ledger.save_session(&session);
    session
}

/// End: archive, then mark the session `stopped`. Does not itself stop the
/// Trading Loop — that's a separate flag so a later `resume` reconnects
/// into the same, now-stopped, session.
pub fn end(ledger: &Ledger, history_dir: &std::path::Path) -> Session {
    let mut session = ledger.load_session();
    if !session.id.is_empty() {
        archive_if_pending(ledger, &session, history_dir);
    }
    session.status = SessionStatus::Stopped;
    ledger.save_session(&session);
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ticket;
    use crate::types::{Direction, TicketStatus};

    #[test]
    fn start_resume_creates_session_on_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        let session = start_resume(&ledger, Some(10_000.0));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.balance_start, Some(10_000.0));
        assert!(!ledger.load_session().id.is_empty());
    }

    #[test]
    fn start_resume_is_idempotent_and_preserves_balance() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        let first = start_resume(&ledger, Some(10_000.0));
        let second = start_resume(&ledger, Some(99_999.0));
        assert_eq!(first.id, second.id);
        assert_eq!(second.balance_start, Some(10_000.0));
    }

    #[test]
    fn force_new_archives_only_when_activity_present() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        let history = dir.path().join("history");
        start_resume(&ledger, Some(10_000.0));

        // No activity yet -> no archive file.
        start_force_new(&ledger, &history, Some(10_000.0));
        assert!(!history.exists() || std::fs::read_dir(&history).unwrap().count() == 0);

        ledger.save_ticket(Ticket {
            ticket: 1,
            agent_id: "fibo1".to_string(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            opened_at: Utc::now().to_rfc3339(),
            status: TicketStatus::Open,
        });
        start_force_new(&ledger, &history, Some(10_000.0));
        assert_eq!(std::fs::read_dir(&history).unwrap().count(), 1);

        // Tickets were cleared by the reset, so a second force_new
        // immediately after has nothing new to archive.
        start_force_new(&ledger, &history, Some(10_000.0));
        assert_eq!(std::fs::read_dir(&history).unwrap().count(), 1);
    }

    #[test]
    fn end_marks_session_stopped_without_clearing_ledgers() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        let history = dir.path().join("history");
        start_resume(&ledger, Some(10_000.0));
        ledger.save_ticket(Ticket {
            ticket: 1,
            agent_id: "fibo1".to_string(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Buy,
            opened_at: Utc::now().to_rfc3339(),
            status: TicketStatus::Open,
        });
        let session = end(&ledger, &history);
        assert_eq!(session.status, SessionStatus::Stopped);
        assert_eq!(ledger.load_tickets().len(), 1);
    }

    #[test]
    fn build_report_contains_total_pnl_line() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        let session = start_resume(&ledger, Some(10_000.0));
        let report = build_report(&ledger, &session);
        assert!(report.contains("Total session P/L"));
    }
}
