//! Persisted per-job state and restart decisions
//!
//! The return-value file is the single source of truth for "this job is
//! done". It is written with flush-and-fsync discipline so a crash leaves
//! either the old state or the fully written new one, never a torn write
//! visible to a later restart.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::tool::ToolAdapter;

/// Name of the global failure-counter file at the run root.
pub const FAILED_COUNT_FILE: &str = "failed";

/// Name of the per-job args file.
pub const ARGS_FILE: &str = "args";

/// Write `content` to `path` durably: flushed and fsynced before returning.
pub fn write_durable(path: &Path, content: &str) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.flush()?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    Ok(())
}

/// Persist a job's exit code.
pub fn write_return_value(job_dir: &Path, adapter: &dyn ToolAdapter, code: i32) -> Result<()> {
    write_durable(&job_dir.join(adapter.return_value_file()), &code.to_string())
}

/// Read a job's persisted exit code, if the job ever finished.
pub fn read_return_value(job_dir: &Path, adapter: &dyn ToolAdapter) -> Option<i32> {
    let content = fs::read_to_string(job_dir.join(adapter.return_value_file())).ok()?;
    content.trim().parse().ok()
}

/// Persist the literal argument line of a job.
pub fn write_args(job_dir: &Path, args: &str) -> Result<()> {
    let path = job_dir.join(ARGS_FILE);
    fs::write(&path, format!("{args}\n"))
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Read a job's persisted argument line.
pub fn read_args(job_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(job_dir.join(ARGS_FILE)).ok()?;
    content.lines().next().map(str::to_string)
}

/// A job directory is "done" once its return-value file exists.
pub fn is_done(job_dir: &Path, adapter: &dyn ToolAdapter) -> bool {
    job_dir.join(adapter.return_value_file()).exists()
}

/// Write the global failure counter at the run root.
pub fn write_failed_count(root: &Path, failed: usize) -> Result<()> {
    write_durable(&root.join(FAILED_COUNT_FILE), &failed.to_string())
}

/// Read the global failure counter from a prior run.
pub fn read_failed_count(root: &Path) -> Option<usize> {
    let content = fs::read_to_string(root.join(FAILED_COUNT_FILE)).ok()?;
    content.trim().parse().ok()
}

/// Decides which jobs a resumed run may skip.
pub struct RestartController;

impl RestartController {
    /// True iff persisted state records a successful prior execution.
    pub fn should_skip(job_dir: &Path, adapter: &dyn ToolAdapter) -> bool {
        match read_return_value(job_dir, adapter) {
            Some(0) => {
                debug!("Persisted success in {}", job_dir.display());
                true
            }
            _ => false,
        }
    }

    /// Fast path: a prior run that recorded zero failures leaves a restart
    /// with nothing to execute.
    pub fn nothing_to_do(root: &Path) -> bool {
        read_failed_count(root) == Some(0)
    }
}
