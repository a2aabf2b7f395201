//! Timestamped copies of the domain XML written at each phase boundary.
//!
//! Files are named `<timestamp>_<domain>_<label>` and are the recovery trail
//! after an aborted run. Only a completed run removes them.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{MigrationError, Result};

/// `strftime` format of the run timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Snapshot files recorded during one run.
#[derive(Debug)]
pub struct SnapshotLog {
    dir: PathBuf,
    prefix: String,
    recorded: Vec<PathBuf>,
}

impl SnapshotLog {
    /// Start a log for `domain` in `dir`, stamped with the current local time.
    pub fn new(dir: impl Into<PathBuf>, domain: &str) -> Self {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        Self::with_timestamp(dir, domain, &timestamp)
    }

    /// Start a log with an explicit run timestamp.
    pub fn with_timestamp(dir: impl Into<PathBuf>, domain: &str, timestamp: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: format!("{}_{}_", timestamp, domain),
            recorded: Vec::new(),
        }
    }

    /// Write `content` to a new snapshot file and return its path.
    pub fn record(&mut self, label: &str, content: &str) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}{}", self.prefix, label));
        std::fs::write(&path, content).map_err(|e| MigrationError::Snapshot {
            path: path.clone(),
            source: e,
        })?;
        debug!(path = %path.display(), "Snapshot written");
        self.recorded.push(path.clone());
        Ok(path)
    }

    /// Files written so far, oldest first.
    pub fn recorded(&self) -> &[PathBuf] {
        &self.recorded
    }

    /// The most recent snapshot, the one to recover from.
    pub fn last(&self) -> Option<&Path> {
        self.recorded.last().map(PathBuf::as_path)
    }

    /// Remove every file recorded during this run.
    pub fn discard_all(&mut self) -> Result<()> {
        for path in std::mem::take(&mut self.recorded) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "Snapshot already gone");
                }
                Err(e) => return Err(MigrationError::Snapshot { path, source: e }),
            }
        }
        info!("Snapshots discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_names_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let unrelated = dir.path().join("keep-me");
        std::fs::write(&unrelated, "x").unwrap();

        let mut log = SnapshotLog::with_timestamp(dir.path(), "web01", "2024-05-01_10-00-00");
        let first = log.record("initial_state", "<domain/>").unwrap();
        let second = log.record("after_vda", "<domain></domain>").unwrap();

        assert_eq!(first, dir.path().join("2024-05-01_10-00-00_web01_initial_state"));
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "<domain></domain>");
        assert_eq!(log.last(), Some(second.as_path()));
        assert_eq!(log.recorded().len(), 2);

        log.discard_all().unwrap();
        assert!(!first.exists());
        assert!(!second.exists());
        assert!(unrelated.exists());
        assert!(log.recorded().is_empty());
    }

    #[test]
    fn test_default_timestamp_shape() {
        let log = SnapshotLog::new(".", "web01");
        // e.g. 2024-05-01_10-00-00_web01_
        assert_eq!(log.prefix.len(), "2024-05-01_10-00-00_web01_".len());
        assert!(log.prefix.ends_with("_web01_"));
    }

    #[test]
    fn test_record_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SnapshotLog::with_timestamp(dir.path().join("missing"), "web01", "ts");
        let err = log.record("initial_state", "x").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert!(log.recorded().is_empty());
    }
}
