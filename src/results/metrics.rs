//! Consolidated metrics compilation
//!
//! Some tools leave a structured metrics artifact in every successful job
//! directory. After a clean (non-aborted) run those artifacts are fed to an
//! external summarizer binary that compiles them, optionally together with a
//! prior baseline document, into one consolidated metrics file at the run
//! root.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::tool::ToolAdapter;

/// File name of the consolidated document at the run root.
pub const METRICS_FILE: &str = "metrics.xml";

/// Drives the external summarizer over per-job metrics artifacts.
pub struct MetricsCompiler<'a> {
    summarizer: &'a Path,
    adapter: &'a dyn ToolAdapter,
    baseline: Option<&'a Path>,
}

impl<'a> MetricsCompiler<'a> {
    pub fn new(
        summarizer: &'a Path,
        adapter: &'a dyn ToolAdapter,
        baseline: Option<&'a Path>,
    ) -> Self {
        Self {
            summarizer,
            adapter,
            baseline,
        }
    }

    /// Compile every metrics artifact under `root` into
    /// `<root>/metrics.xml`. No-op when the tool leaves no artifacts.
    pub fn compile(&self, root: &Path) -> Result<Option<PathBuf>> {
        let artifact = match self.adapter.metrics_artifact() {
            Some(artifact) => artifact,
            None => return Ok(None),
        };

        let artifacts = self.collect(root, artifact)?;
        if artifacts.is_empty() {
            debug!("No {artifact} files under {}, nothing to compile", root.display());
            return Ok(None);
        }

        let output = root.join(METRICS_FILE);
        let mut command = Command::new(self.summarizer);
        command.args(&artifacts);
        if let Some(baseline) = self.baseline {
            command.arg(baseline);
        }
        command.arg(&output);

        info!(
            "Compiling {} metrics files with {}",
            artifacts.len(),
            self.summarizer.display()
        );
        let status = command
            .status()
            .with_context(|| format!("Failed to run {}", self.summarizer.display()))?;
        if !status.success() {
            bail!("{} exited with {status}", self.summarizer.display());
        }
        Ok(Some(output))
    }

    /// All `<job_dir>/<artifact>` files under `root`, in sorted order,
    /// skipping tool scratch directories.
    fn collect(&self, dir: &Path, artifact: &str) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if self
                .adapter
                .scratch_dirs()
                .iter()
                .any(|s| name.to_str() == Some(s))
            {
                continue;
            }
            let candidate = path.join(artifact);
            if candidate.exists() {
                found.push(candidate);
            }
            found.extend(self.collect(&path, artifact)?);
        }
        found.sort();
        Ok(found)
    }
}
