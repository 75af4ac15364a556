//! Attendance persistence.
//!
//! A ledger accepts at most one entry per identity per session. A second
//! write for the same pair is not an error; it reports
//! [`RecordOutcome::AlreadyRecorded`] and leaves the first entry untouched.

use crate::entry::{LedgerEntry, SessionId, SessionSummary};
use chrono::{DateTime, Local};
use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to create ledger directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// What happened to a record request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyRecorded,
}

/// Durable store of attendance entries.
pub trait AttendanceLedger {
    fn record(&mut self, entry: &LedgerEntry) -> Result<RecordOutcome, LedgerError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    id        TEXT PRIMARY KEY,
    identity  TEXT NOT NULL,
    emotion   TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    session   TEXT NOT NULL,
    UNIQUE (identity, session)
);
CREATE INDEX IF NOT EXISTS attendance_session ON attendance (session);
";

/// SQLite-backed ledger.
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Open (or create) the ledger database, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "attendance ledger opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Entries ordered by time, optionally restricted to one session.
    pub fn entries(&self, session: Option<&SessionId>) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identity, emotion, timestamp, session FROM attendance
             WHERE ?1 IS NULL OR session = ?1
             ORDER BY timestamp, identity",
        )?;
        let rows = stmt.query_map(params![session.map(SessionId::as_str)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, identity, emotion, timestamp, session) = row?;
            entries.push(LedgerEntry {
                id: Uuid::parse_str(&id)
                    .map_err(|e| LedgerError::Corrupt(format!("id {id}: {e}")))?,
                identity,
                emotion,
                timestamp: parse_timestamp(&timestamp)?,
                session: SessionId::from(session),
            });
        }
        Ok(entries)
    }

    /// One summary per session, most recent first.
    pub fn sessions(&self) -> Result<Vec<SessionSummary>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT session, COUNT(*), MIN(timestamp), MAX(timestamp) FROM attendance
             GROUP BY session ORDER BY session DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (session, count, first, last) = row?;
            sessions.push(SessionSummary {
                session: SessionId::from(session),
                entries: count as usize,
                first: parse_timestamp(&first)?,
                last: parse_timestamp(&last)?,
            });
        }
        Ok(sessions)
    }
}

impl AttendanceLedger for SqliteLedger {
    fn record(&mut self, entry: &LedgerEntry) -> Result<RecordOutcome, LedgerError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO attendance (id, identity, emotion, timestamp, session)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id.to_string(),
                entry.identity,
                entry.emotion,
                entry.timestamp.to_rfc3339(),
                entry.session.as_str(),
            ],
        )?;

        if inserted == 0 {
            tracing::debug!(identity = %entry.identity, session = %entry.session, "already recorded");
            Ok(RecordOutcome::AlreadyRecorded)
        } else {
            Ok(RecordOutcome::Recorded)
        }
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Local>, LedgerError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Local))
        .map_err(|e| LedgerError::Corrupt(format!("timestamp {s}: {e}")))
}

/// Ledger that keeps entries in memory. Used for dry runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Vec<LedgerEntry>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }
}

impl AttendanceLedger for MemoryLedger {
    fn record(&mut self, entry: &LedgerEntry) -> Result<RecordOutcome, LedgerError> {
        let duplicate = self
            .entries
            .iter()
            .any(|e| e.identity == entry.identity && e.session == entry.session);
        if duplicate {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        self.entries.push(entry.clone());
        Ok(RecordOutcome::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_record_once_per_session() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let s = SessionId::from("20261018_090000");

        let first = LedgerEntry::new("alice", "happy", s.clone());
        assert_eq!(ledger.record(&first).unwrap(), RecordOutcome::Recorded);

        let again = LedgerEntry::new("alice", "sad", s.clone());
        assert_eq!(ledger.record(&again).unwrap(), RecordOutcome::AlreadyRecorded);

        let entries = ledger.entries(Some(&s)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].emotion, "happy");
        assert_eq!(entries[0].id, first.id);
    }

    #[test]
    fn test_sqlite_same_identity_new_session() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let a = LedgerEntry::new("alice", "happy", SessionId::from("s1"));
        let b = LedgerEntry::new("alice", "neutral", SessionId::from("s2"));
        assert_eq!(ledger.record(&a).unwrap(), RecordOutcome::Recorded);
        assert_eq!(ledger.record(&b).unwrap(), RecordOutcome::Recorded);
        assert_eq!(ledger.entries(None).unwrap().len(), 2);
    }

    #[test]
    fn test_sqlite_sessions_summary() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        for who in ["alice", "bob"] {
            ledger
                .record(&LedgerEntry::new(who, "neutral", SessionId::from("s1")))
                .unwrap();
        }
        ledger
            .record(&LedgerEntry::new("carol", "happy", SessionId::from("s2")))
            .unwrap();

        let sessions = ledger.sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session.as_str(), "s2");
        assert_eq!(sessions[0].entries, 1);
        assert_eq!(sessions[1].entries, 2);
        assert!(sessions[1].first <= sessions[1].last);
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/attendance.db");
        let s = SessionId::from("s1");
        {
            let mut ledger = SqliteLedger::open(&path).unwrap();
            ledger
                .record(&LedgerEntry::new("alice", "happy", s.clone()))
                .unwrap();
        }
        let mut ledger = SqliteLedger::open(&path).unwrap();
        assert_eq!(
            ledger
                .record(&LedgerEntry::new("alice", "happy", s.clone()))
                .unwrap(),
            RecordOutcome::AlreadyRecorded
        );
        assert_eq!(ledger.entries(Some(&s)).unwrap().len(), 1);
    }

    #[test]
    fn test_memory_ledger_rejects_duplicates() {
        let mut ledger = MemoryLedger::new();
        let s = SessionId::from("s1");
        assert_eq!(
            ledger.record(&LedgerEntry::new("bob", "sad", s.clone())).unwrap(),
            RecordOutcome::Recorded
        );
        assert_eq!(
            ledger.record(&LedgerEntry::new("bob", "happy", s)).unwrap(),
            RecordOutcome::AlreadyRecorded
        );
        assert_eq!(ledger.entries().len(), 1);
    }
}
