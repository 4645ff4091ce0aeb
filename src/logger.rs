use crate::error::Result;
use crate::rules::Mode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const LOG_FILE: &str = "history.log";

/// One executed apply, stored as a JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRecord {
    pub timestamp: DateTime<Utc>,
    pub interface: String,
    pub mode: Mode,
    pub addresses: usize,
    pub inserted: usize,
    pub removed: usize,
}

pub struct ApplyLog {
    log_dir: PathBuf,
    max_log_size: u64,
    max_log_files: usize,
}

impl ApplyLog {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            max_log_size: 1024 * 1024, // 1MB
            max_log_files: 3,
        }
    }

    pub fn with_limits(mut self, max_log_size: u64, max_log_files: usize) -> Self {
        self.max_log_size = max_log_size;
        self.max_log_files = max_log_files;
        self
    }

    fn current(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE)
    }

    fn rotated(&self, index: usize) -> PathBuf {
        self.log_dir.join(format!("history.{}.log", index))
    }

    pub fn log_apply(&self, record: &ApplyRecord) -> Result<()> {
        let log_file = self.current();

        if let Ok(metadata) = fs::metadata(&log_file) {
            if metadata.len() > self.max_log_size {
                self.rotate_logs()?;
            }
        }

        fs::create_dir_all(&self.log_dir)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;

        let entry = serde_json::to_string(record)?;
        writeln!(file, "{}", entry)?;

        Ok(())
    }

    fn rotate_logs(&self) -> Result<()> {
        for i in (1..self.max_log_files).rev() {
            let old_path = self.rotated(i);
            if old_path.exists() {
                fs::rename(old_path, self.rotated(i + 1))?;
            }
        }

        let current = self.current();
        if current.exists() {
            fs::rename(current, self.rotated(1))?;
        }

        Ok(())
    }

    /// Records in the current log, oldest first.
    pub fn history(&self) -> Result<Vec<ApplyRecord>> {
        read_records(&self.current())
    }
}

fn read_records(path: &Path) -> Result<Vec<ApplyRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut history = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str(line) {
            Ok(record) => history.push(record),
            Err(e) => warn!("Skipping unreadable history entry in {}: {}", path.display(), e),
        }
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(interface: &str) -> ApplyRecord {
        ApplyRecord {
            timestamp: Utc::now(),
            interface: interface.to_string(),
            mode: Mode::Whitelist,
            addresses: 2,
            inserted: 3,
            removed: 1,
        }
    }

    #[test]
    fn test_log_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = ApplyLog::new(dir.path());

        log.log_apply(&record("eth0")).unwrap();
        log.log_apply(&record("eth0.10")).unwrap();

        let history = log.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].interface, "eth0.10");
        assert_eq!(history[1].mode, Mode::Whitelist);
    }

    #[test]
    fn test_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let log = ApplyLog::new(dir.path()).with_limits(10, 2);

        log.log_apply(&record("eth0")).unwrap();
        log.log_apply(&record("eth1")).unwrap();
        log.log_apply(&record("eth2")).unwrap();

        let current = log.history().unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].interface, "eth2");
        assert!(dir.path().join("history.1.log").exists());
        assert!(dir.path().join("history.2.log").exists());
        assert!(!dir.path().join("history.3.log").exists());
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = ApplyLog::new(dir.path());
        log.log_apply(&record("eth0")).unwrap();
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(LOG_FILE))
            .unwrap();
        writeln!(file, "{{not json").unwrap();

        assert_eq!(log.history().unwrap().len(), 1);
    }
}
