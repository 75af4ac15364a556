use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one run of the kiosk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh id for a kiosk run: the local start time plus a short random
    /// tag, e.g. `20261018_091502_7f3a`. Runs started within the same second
    /// still get distinct sessions.
    pub fn now() -> Self {
        let tag = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}", Self::at(Local::now()), &tag[..4]))
    }

    /// Time-only id, e.g. `20261018_091502`.
    pub fn at(time: DateTime<Local>) -> Self {
        Self(time.format("%Y%m%d_%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One attendance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub identity: String,
    /// Expression at the moment the person was logged.
    pub emotion: String,
    pub timestamp: DateTime<Local>,
    pub session: SessionId,
}

impl LedgerEntry {
    /// New entry stamped with the current local time.
    pub fn new(identity: impl Into<String>, emotion: impl Into<String>, session: SessionId) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.into(),
            emotion: emotion.into(),
            timestamp: Local::now(),
            session,
        }
    }
}

/// Per-session totals for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session: SessionId,
    pub entries: usize,
    pub first: DateTime<Local>,
    pub last: DateTime<Local>,
}
