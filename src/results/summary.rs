//! Machine-readable run summary
//!
//! Written next to the textual report so downstream tooling can pick up the
//! run outcome without parsing report lines.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::RunSummary;

/// File name of the summary artifact at the run root.
pub const SUMMARY_FILE: &str = "run_summary.json";

/// Stored outcome of one full run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRunSummary {
    /// Tool profile the run used.
    pub profile: String,

    /// Path of the invoked tool binary.
    pub tool: String,

    /// Timestamp when the run started.
    pub started_at: DateTime<Utc>,

    /// Timestamp when the run completed.
    pub completed_at: DateTime<Utc>,

    /// Number of worker threads.
    pub workers: usize,

    /// Jobs counted.
    pub total: usize,

    /// Jobs that passed.
    pub passed: usize,

    /// Jobs that failed.
    pub failed: usize,

    /// Whether the run was cut short by an abort or interrupt.
    pub aborted: bool,
}

impl StoredRunSummary {
    pub fn new(
        profile: &str,
        tool: &Path,
        started_at: DateTime<Utc>,
        workers: usize,
        summary: RunSummary,
        aborted: bool,
    ) -> Self {
        Self {
            profile: profile.to_string(),
            tool: tool.display().to_string(),
            started_at,
            completed_at: Utc::now(),
            workers,
            total: summary.total,
            passed: summary.passed,
            failed: summary.failed(),
            aborted,
        }
    }

    /// Write the summary to `<root>/run_summary.json`.
    pub fn save(&self, root: &Path) -> Result<PathBuf> {
        let path = root.join(SUMMARY_FILE);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self).context("Failed to write run summary")?;

        info!("Saved run summary to {}", path.display());
        Ok(path)
    }

    /// Load a previously stored summary.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(SUMMARY_FILE);
        let file =
            File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        let reader = BufReader::new(file);
        let summary: Self =
            serde_json::from_reader(reader).context("Failed to parse run summary")?;

        debug!("Loaded run summary from {}", path.display());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let summary = StoredRunSummary::new(
            "characterize",
            Path::new("/opt/panda/bin/eucalyptus"),
            Utc::now(),
            4,
            RunSummary {
                total: 10,
                passed: 8,
            },
            false,
        );

        let path = summary.save(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), SUMMARY_FILE);

        let loaded = StoredRunSummary::load(dir.path()).unwrap();
        assert_eq!(loaded.total, 10);
        assert_eq!(loaded.passed, 8);
        assert_eq!(loaded.failed, 2);
        assert!(!loaded.aborted);
        assert_eq!(loaded.profile, "characterize");
    }

    #[test]
    fn test_load_missing_summary_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StoredRunSummary::load(dir.path()).is_err());
    }
}
