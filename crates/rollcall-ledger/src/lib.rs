//! rollcall-ledger — Attendance entries and their durable store.

pub mod entry;
pub mod export;
pub mod ledger;

pub use entry::{LedgerEntry, SessionId, SessionSummary};
pub use export::{export_csv, write_csv, ExportError};
pub use ledger::{AttendanceLedger, LedgerError, MemoryLedger, RecordOutcome, SqliteLedger};

use std::path::PathBuf;

/// Default database location: `$XDG_DATA_HOME/rollcall/attendance.db`,
/// falling back to `~/.local/share`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("attendance.db")
}
