//! Bottom-up result aggregation
//!
//! After the pool completes, the output tree is walked post-order and every
//! internal directory receives two artifacts derived from its immediate
//! children: a concatenated failure log and a line-oriented `report`. The
//! report of a subtree depends only on its children's persisted state, so
//! aggregation composes: re-running it on any subtree reproduces the same
//! content.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::ExitClass;
use crate::state;
use crate::tool::ToolAdapter;

/// Name of the per-directory consolidated report file.
pub const REPORT_FILE: &str = "report";

/// Classification of one directory in the output tree.
enum DirKind {
    /// Holds a persisted job state; never recursed into.
    Leaf,
    /// Contains only subdirectories (and aggregation artifacts).
    Internal,
    /// Contains nothing; produces no report.
    Empty,
}

/// Walks the output directory tree and writes per-directory reports.
pub struct ResultAggregator<'a> {
    adapter: &'a dyn ToolAdapter,
}

impl<'a> ResultAggregator<'a> {
    pub fn new(adapter: &'a dyn ToolAdapter) -> Self {
        Self { adapter }
    }

    /// Aggregate the whole tree rooted at `dir`. The root's `report` file is
    /// the consolidated summary of the run.
    pub fn aggregate(&self, dir: &Path) -> Result<()> {
        match self.classify(dir)? {
            DirKind::Leaf | DirKind::Empty => Ok(()),
            DirKind::Internal => self.aggregate_internal(dir),
        }
    }

    fn classify(&self, dir: &Path) -> Result<DirKind> {
        if state::is_done(dir, self.adapter) {
            return Ok(DirKind::Leaf);
        }
        let mut entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;
        if entries.next().is_none() {
            Ok(DirKind::Empty)
        } else {
            Ok(DirKind::Internal)
        }
    }

    fn aggregate_internal(&self, dir: &Path) -> Result<()> {
        let subdirs = self.subdirs(dir)?;
        for subdir in &subdirs {
            self.aggregate(subdir)?;
        }

        self.merge_failed_outputs(dir, &subdirs)?;
        self.write_report(dir, &subdirs)?;
        debug!("Aggregated {}", dir.display());
        Ok(())
    }

    /// Immediate subdirectories in sorted order, excluding tool scratch
    /// space.
    fn subdirs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut subdirs = Vec::new();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let is_scratch = self
                .adapter
                .scratch_dirs()
                .iter()
                .any(|s| name.to_str() == Some(s));
            if !is_scratch {
                subdirs.push(path);
            }
        }
        subdirs.sort();
        Ok(subdirs)
    }

    /// Concatenate the children's failure logs into this directory's own,
    /// leaf contributions separated by blank lines. Removed again when no
    /// child contributed anything.
    fn merge_failed_outputs(&self, dir: &Path, subdirs: &[PathBuf]) -> Result<()> {
        let failed_name = self.adapter.failed_output_file();
        let merged_path = dir.join(&failed_name);
        let mut merged = File::create(&merged_path)
            .with_context(|| format!("Failed to create {}", merged_path.display()))?;

        let mut wrote = false;
        for subdir in subdirs {
            let child_failed = subdir.join(&failed_name);
            if !child_failed.exists() {
                continue;
            }
            let content = fs::read_to_string(&child_failed)
                .with_context(|| format!("Failed to read {}", child_failed.display()))?;
            merged.write_all(content.as_bytes())?;
            wrote = true;
            // A leaf's failure log is its execution transcript; keep leaf
            // contributions visually separated.
            if subdir.join(self.adapter.execution_output_file()).exists() {
                merged.write_all(b"\n\n\n")?;
            }
        }
        drop(merged);

        if !wrote {
            fs::remove_file(&merged_path)
                .with_context(|| format!("Failed to remove {}", merged_path.display()))?;
        }
        Ok(())
    }

    /// One line per leaf child, the verbatim report of each internal child.
    fn write_report(&self, dir: &Path, subdirs: &[PathBuf]) -> Result<()> {
        let report_path = dir.join(REPORT_FILE);
        let mut report = File::create(&report_path)
            .with_context(|| format!("Failed to create {}", report_path.display()))?;

        for subdir in subdirs {
            if let Some(code) = state::read_return_value(subdir, self.adapter) {
                writeln!(report, "{}", self.leaf_line(subdir, code))?;
            } else {
                let child_report = subdir.join(REPORT_FILE);
                if child_report.exists() {
                    let content = fs::read_to_string(&child_report)
                        .with_context(|| format!("Failed to read {}", child_report.display()))?;
                    report.write_all(content.as_bytes())?;
                }
            }
        }
        Ok(())
    }

    fn leaf_line(&self, job_dir: &Path, code: i32) -> String {
        let args = state::read_args(job_dir).unwrap_or_default();
        let class = ExitClass::from_exit(code, None);
        if class.is_success() {
            match self.adapter.results_summary(job_dir) {
                Some(summary) => format!("SUCCESS ({summary}): {args}"),
                None => format!("SUCCESS: {args}"),
            }
        } else {
            match class.report_annotation() {
                Some(kind) => format!("FAILURE({kind}): {args}"),
                None => format!("FAILURE: {args}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::CharacterizeAdapter;

    fn make_leaf(dir: &Path, code: i32, args: &str) {
        fs::create_dir_all(dir).unwrap();
        state::write_return_value(dir, &CharacterizeAdapter, code).unwrap();
        state::write_args(dir, args).unwrap();
        if code != 0 {
            fs::write(
                dir.join("eucalyptus_failed_output"),
                format!("log of {args}\n"),
            )
            .unwrap();
            fs::write(dir.join("eucalyptus_execution_output"), "transcript\n").unwrap();
        }
    }

    #[test]
    fn test_report_lines_for_leaf_children() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dev");
        make_leaf(&root.join("adder"), 0, "run adder");
        make_leaf(&root.join("mult"), 1, "run mult");
        make_leaf(&root.join("shift"), 124, "run shift");

        ResultAggregator::new(&CharacterizeAdapter)
            .aggregate(&root)
            .unwrap();

        let report = fs::read_to_string(root.join("report")).unwrap();
        assert_eq!(
            report,
            "SUCCESS: run adder\nFAILURE: run mult\nFAILURE(Timeout): run shift\n"
        );
    }

    #[test]
    fn test_success_line_includes_metrics_summary() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dev");
        let leaf = root.join("adder");
        make_leaf(&leaf, 0, "run adder");
        fs::write(leaf.join("eucalyptus_results"), "17\n").unwrap();

        ResultAggregator::new(&CharacterizeAdapter)
            .aggregate(&root)
            .unwrap();

        let report = fs::read_to_string(root.join("report")).unwrap();
        assert_eq!(report, "SUCCESS (17 cycles): run adder\n");
    }

    #[test]
    fn test_nested_reports_are_spliced_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        make_leaf(&root.join("devA/adder"), 0, "a adder");
        make_leaf(&root.join("devA/mult"), 2, "a mult");
        make_leaf(&root.join("devB/adder"), 0, "b adder");

        ResultAggregator::new(&CharacterizeAdapter)
            .aggregate(&root)
            .unwrap();

        let child_a = fs::read_to_string(root.join("devA/report")).unwrap();
        let child_b = fs::read_to_string(root.join("devB/report")).unwrap();
        let parent = fs::read_to_string(root.join("report")).unwrap();
        assert_eq!(parent, format!("{child_a}{child_b}"));
        assert_eq!(child_a, "SUCCESS: a adder\nFAILURE: a mult\n");
    }

    #[test]
    fn test_failed_outputs_propagate_upward() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        make_leaf(&root.join("dev/adder"), 0, "adder");
        make_leaf(&root.join("dev/mult"), 1, "mult");

        ResultAggregator::new(&CharacterizeAdapter)
            .aggregate(&root)
            .unwrap();

        let merged = fs::read_to_string(root.join("dev/eucalyptus_failed_output")).unwrap();
        assert!(merged.contains("log of mult"));
        let top = fs::read_to_string(root.join("eucalyptus_failed_output")).unwrap();
        assert!(top.contains("log of mult"));
    }

    #[test]
    fn test_all_green_leaves_no_failed_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dev");
        make_leaf(&root.join("adder"), 0, "adder");

        ResultAggregator::new(&CharacterizeAdapter)
            .aggregate(&root)
            .unwrap();

        assert!(!root.join("eucalyptus_failed_output").exists());
        assert!(root.join("report").exists());
    }

    #[test]
    fn test_empty_and_scratch_dirs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        make_leaf(&root.join("dev/adder"), 0, "adder");
        fs::create_dir_all(root.join("dev/HLS_output")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();

        ResultAggregator::new(&CharacterizeAdapter)
            .aggregate(&root)
            .unwrap();

        assert!(!root.join("dev/HLS_output").join("report").exists());
        assert!(!root.join("empty/report").exists());
        let report = fs::read_to_string(root.join("report")).unwrap();
        assert_eq!(report, "SUCCESS: adder\n");
    }

    #[test]
    fn test_leaf_directories_are_not_recursed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dev");
        let leaf = root.join("adder");
        make_leaf(&leaf, 0, "adder");
        // A stray subdirectory inside a leaf must not get its own report.
        fs::create_dir_all(leaf.join("stray")).unwrap();

        ResultAggregator::new(&CharacterizeAdapter)
            .aggregate(&root)
            .unwrap();

        assert!(!leaf.join("report").exists());
        assert!(!leaf.join("stray/report").exists());
    }
}
