//! Rename conflict audit log
//!
//! Append-only JSONL record of every interface that was moved out of the way
//! so a stable alias could be bound. Nothing in the engine reads it back; it
//! exists for the operator and for post-mortems.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Default file name inside the state directory
pub const CONFLICT_LOG_NAME: &str = "rename_conflicts.jsonl";

/// One relocated alias holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameConflictRecord {
    /// The alias that was reclaimed
    pub alias: String,
    /// PCI address of the device that held it
    pub prior_occupant_pci: Option<String>,
    /// MAC of the device that held it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_occupant_mac: Option<String>,
    /// Temporary name the holder was moved to
    pub relocated_to: String,
    pub timestamp: DateTime<Local>,
}

/// JSONL-backed conflict log
#[derive(Debug, Clone)]
pub struct ConflictLog {
    path: PathBuf,
}

impl ConflictLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log inside a state directory
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CONFLICT_LOG_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record, fsynced
    pub fn append(&self, record: &RenameConflictRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;
        Ok(())
    }

    /// All readable records; malformed lines are skipped
    pub fn records(&self) -> io::Result<Vec<RenameConflictRecord>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Ok(record) = serde_json::from_str(&line) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(alias: &str, to: &str) -> RenameConflictRecord {
        RenameConflictRecord {
            alias: alias.to_string(),
            prior_occupant_pci: Some("0000:03:00.0".to_string()),
            prior_occupant_mac: None,
            relocated_to: to.to_string(),
            timestamp: Local::now(),
        }
    }

    #[test]
    fn test_append_then_read() {
        let dir = TempDir::new().unwrap();
        let log = ConflictLog::in_dir(dir.path());
        assert!(log.records().unwrap().is_empty());

        log.append(&record("mgt", "mgto0")).unwrap();
        log.append(&record("clu", "cluo0")).unwrap();

        let records = log.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].alias, "mgt");
        assert_eq!(records[1].relocated_to, "cluo0");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let log = ConflictLog::in_dir(dir.path());
        log.append(&record("mgt", "mgto0")).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "{{not json").unwrap();

        assert_eq!(log.records().unwrap().len(), 1);
    }
}
