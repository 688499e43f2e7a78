//! Core data model for batch runs
//!
//! Defines job descriptors, exit classification, and run summaries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exit code recorded for a job killed by the wall-clock deadline.
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code for a job that hit the output file-size limit (128 + SIGXFSZ).
pub const EXIT_FILE_SIZE_LIMIT: i32 = 153;

/// Signal number of a forced kill.
pub const SIGKILL_SIGNAL: i32 = 9;

/// One invocation of the external tool, identified by its position in the
/// ordered job list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobDescriptor {
    /// 1-based position in the job list.
    pub position: usize,

    /// Literal command-line tail appended to the tool path.
    pub args: String,
}

impl JobDescriptor {
    pub fn new(position: usize, args: impl Into<String>) -> Self {
        Self {
            position,
            args: args.into(),
        }
    }
}

impl fmt::Display for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {}: {}", self.position, self.args)
    }
}

/// Classification of a finished job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitClass {
    /// Exit code 0.
    Success,
    /// Wall-clock deadline expired (recorded as exit code 124).
    Timeout,
    /// Output file-size cap exceeded (exit code 153, SIGXFSZ).
    FileSizeLimit,
    /// Forced kill during an active abort (SIGKILL).
    Killed,
    /// Any other nonzero exit.
    Failure,
}

impl ExitClass {
    /// Classify a recorded exit code plus optional terminating signal.
    pub fn from_exit(code: i32, signal: Option<i32>) -> Self {
        if signal == Some(SIGKILL_SIGNAL) {
            return ExitClass::Killed;
        }
        match code {
            0 => ExitClass::Success,
            EXIT_TIMEOUT => ExitClass::Timeout,
            EXIT_FILE_SIZE_LIMIT => ExitClass::FileSizeLimit,
            _ => ExitClass::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitClass::Success)
    }

    /// Annotation used in per-directory reports, if any.
    pub fn report_annotation(&self) -> Option<&'static str> {
        match self {
            ExitClass::Timeout => Some("Timeout"),
            ExitClass::FileSizeLimit => Some("File size limit exceeded"),
            _ => None,
        }
    }
}

impl fmt::Display for ExitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitClass::Success => "SUCCESS",
            ExitClass::Timeout => "FAILURE (Timeout)",
            ExitClass::FileSizeLimit => "FAILURE (File size limit exceeded)",
            ExitClass::Killed => "KILLED",
            ExitClass::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}

/// Outcome of one job as observed by the worker pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Subprocess ran to an observable end.
    Finished { exit_code: i32, class: ExitClass },
    /// Restart mode found a persisted success; nothing was spawned.
    Skipped,
}

impl JobOutcome {
    pub fn class(&self) -> ExitClass {
        match self {
            JobOutcome::Finished { class, .. } => *class,
            JobOutcome::Skipped => ExitClass::Success,
        }
    }
}

/// Aggregate counters for one pool run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Jobs counted (claimed and not suppressed by an active abort).
    pub total: usize,

    /// Jobs that passed, including restart skips.
    pub passed: usize,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.total - self.passed
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} passed, {} failed", self.passed, self.failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_classification() {
        assert_eq!(ExitClass::from_exit(0, None), ExitClass::Success);
        assert_eq!(ExitClass::from_exit(124, None), ExitClass::Timeout);
        assert_eq!(ExitClass::from_exit(153, None), ExitClass::FileSizeLimit);
        assert_eq!(ExitClass::from_exit(1, None), ExitClass::Failure);
        assert_eq!(ExitClass::from_exit(137, Some(9)), ExitClass::Killed);
    }

    #[test]
    fn test_report_annotation() {
        assert_eq!(ExitClass::Timeout.report_annotation(), Some("Timeout"));
        assert_eq!(
            ExitClass::FileSizeLimit.report_annotation(),
            Some("File size limit exceeded")
        );
        assert_eq!(ExitClass::Failure.report_annotation(), None);
        assert_eq!(ExitClass::Success.report_annotation(), None);
    }

    #[test]
    fn test_run_summary() {
        let summary = RunSummary {
            total: 10,
            passed: 7,
        };
        assert_eq!(summary.failed(), 3);
        assert!(!summary.all_passed());
        assert_eq!(summary.to_string(), "7 passed, 3 failed");
    }

    #[test]
    fn test_skipped_outcome_counts_as_success() {
        assert!(JobOutcome::Skipped.class().is_success());
    }
}
