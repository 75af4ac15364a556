//! Spreadsheet export of ledger entries.

use crate::entry::LedgerEntry;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Write `entries` as CSV with a header row
/// (`id,identity,emotion,timestamp,session`). Timestamps are RFC 3339.
/// Returns the number of data rows written.
pub fn write_csv<W: Write>(entries: &[LedgerEntry], out: W) -> Result<usize, ExportError> {
    let mut writer = csv::Writer::from_writer(out);
    if entries.is_empty() {
        writer.write_record(["id", "identity", "emotion", "timestamp", "session"])?;
    }
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(entries.len())
}

/// [`write_csv`] into a new file at `path`, replacing any existing file.
pub fn export_csv(entries: &[LedgerEntry], path: &Path) -> Result<usize, ExportError> {
    let rows = write_csv(entries, File::create(path)?)?;
    tracing::info!(rows, path = %path.display(), "attendance exported");
    Ok(rows)
}
