//! Single-job execution
//!
//! Runs one job descriptor as a subprocess under a resource envelope and a
//! wall-clock deadline, captures combined output, classifies the result, and
//! persists the per-directory state. All per-job errors stay local: nothing
//! in here unwinds into the worker loop.

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

use super::context::RunContext;
use super::process_tree::ProcessKiller;
use crate::config::{ResourceLimits, RunOptions};
use crate::models::{ExitClass, JobDescriptor, JobOutcome, EXIT_TIMEOUT};
use crate::state::{self, RestartController};
use crate::tool::ToolAdapter;

const HEADER_RULER: &str =
    "################################################################################";

/// Poll interval for the wall-clock deadline loop.
const WAIT_POLL: Duration = Duration::from_millis(20);

/// Exit code recorded when the child could not be spawned or observed.
const EXIT_FAILED_SAFE: i32 = -1;

/// OS-level failure to create or observe a child. Swallowed by the runner:
/// the job is recorded as failed-safe.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to open execution log: {0}")]
    Log(std::io::Error),

    #[error("failed to spawn job process: {0}")]
    Spawn(std::io::Error),

    #[error("failed to wait for job process: {0}")]
    Wait(std::io::Error),
}

/// Executes single jobs on behalf of the worker pool.
pub struct JobRunner<'a> {
    tool: &'a Path,
    root: &'a Path,
    options: &'a RunOptions,
    adapter: &'a dyn ToolAdapter,
    killer: &'a dyn ProcessKiller,
    ctx: &'a RunContext,
}

impl<'a> JobRunner<'a> {
    pub fn new(
        tool: &'a Path,
        root: &'a Path,
        options: &'a RunOptions,
        adapter: &'a dyn ToolAdapter,
        killer: &'a dyn ProcessKiller,
        ctx: &'a RunContext,
    ) -> Self {
        Self {
            tool,
            root,
            options,
            adapter,
            killer,
            ctx,
        }
    }

    /// Run one claimed job to completion. Returns `None` when the abort
    /// decision arrived between the claim and the spawn, in which case
    /// nothing was executed or counted.
    pub fn execute(&self, job: &JobDescriptor, worker: usize) -> Option<JobOutcome> {
        // A job claimed just before the abort decision must leave its
        // directory untouched: a prior attempt's failure artifacts are
        // still the record of that attempt.
        if self.ctx.abort_requested() {
            return None;
        }

        let cwd = self.root.join(self.adapter.job_dir(&job.args));

        if self.options.restart && RestartController::should_skip(&cwd, self.adapter) {
            let progress = self.ctx.record(true);
            info!("   SKIPPING --- OVERALL: {progress} --- {}", job.args);
            return Some(JobOutcome::Skipped);
        }

        self.remove_stale_artifacts(&cwd);

        let command = format!("exec {} {}", self.tool.display(), job.args);
        let (exit_code, signal) = match self.spawn_and_wait(&cwd, &command, worker) {
            Ok(None) => return None,
            Ok(Some(result)) => result,
            Err(err) => {
                error!("{} in {}", err, cwd.display());
                (EXIT_FAILED_SAFE, None)
            }
        };

        let class = ExitClass::from_exit(exit_code, signal);

        // Broadcast before persisting so sibling workers stop claiming as
        // early as possible.
        if self.options.fail_fast && !class.is_success() {
            self.ctx.abort_and_kill(self.killer);
        }

        self.persist(&cwd, job, exit_code, class);

        if class == ExitClass::Killed && self.ctx.abort_requested() {
            // Expected casualty of the abort, not a new failure.
            debug!("Job killed during abort, not counted: {}", job.args);
        } else {
            let progress = self.ctx.record(class.is_success());
            info!("   {class} --- OVERALL: {progress} --- {}", job.args);
        }

        if class.is_success() && self.options.clean {
            self.clean_job_dir(&cwd);
        }

        Some(JobOutcome::Finished { exit_code, class })
    }

    /// Remove leftovers of a previous attempt: the failed-output marker and
    /// any scratch subdirectory. Filesystem errors here are logged, never
    /// fatal.
    fn remove_stale_artifacts(&self, cwd: &Path) {
        let failed = cwd.join(self.adapter.failed_output_file());
        if failed.exists() {
            if let Err(err) = fs::remove_file(&failed) {
                debug!("Could not remove {}: {err}", failed.display());
            }
        }
        for scratch in self.adapter.scratch_dirs() {
            let dir = cwd.join(scratch);
            if dir.is_dir() {
                if let Err(err) = fs::remove_dir_all(&dir) {
                    debug!("Could not remove {}: {err}", dir.display());
                }
            }
        }
    }

    /// Spawn the job under the resource envelope and wait for it, bounded by
    /// the wall-clock timeout. `Ok(None)` means the abort decision was
    /// already made and nothing was spawned.
    fn spawn_and_wait(
        &self,
        cwd: &Path,
        command: &str,
        worker: usize,
    ) -> Result<Option<(i32, Option<i32>)>, ExecError> {
        let log = self
            .open_execution_log(cwd, command)
            .map_err(ExecError::Log)?;
        let log_err = log.try_clone().map_err(ExecError::Log)?;

        let limits = self.options.limits;
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        unsafe {
            cmd.pre_exec(move || enter_group_with_limits(&limits));
        }

        let child = self
            .ctx
            .spawn_guarded(worker, || cmd.spawn())
            .map_err(ExecError::Spawn)?;
        let mut child = match child {
            Some(child) => child,
            None => return Ok(None),
        };

        let result = self.wait_with_deadline(&mut child);
        self.ctx.clear_child(worker);

        let (status, timed_out) = result?;
        if timed_out {
            return Ok(Some((EXIT_TIMEOUT, None)));
        }

        let signal = status.signal();
        let code = status.code().unwrap_or_else(|| match signal {
            Some(s) => 128 + s,
            None => EXIT_FAILED_SAFE,
        });
        Ok(Some((code, signal)))
    }

    /// Poll the child until it exits or the deadline passes; on deadline the
    /// whole process tree is killed and the job is reported as timed out.
    fn wait_with_deadline(&self, child: &mut Child) -> Result<(ExitStatus, bool), ExecError> {
        let deadline = Instant::now() + self.options.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok((status, false)),
                Ok(None) => {}
                Err(err) => return Err(ExecError::Wait(err)),
            }
            if Instant::now() >= deadline {
                self.killer.kill_tree(child.id());
                let status = child.wait().map_err(ExecError::Wait)?;
                return Ok((status, true));
            }
            std::thread::sleep(WAIT_POLL);
        }
    }

    /// Open the execution log and write its framed header.
    fn open_execution_log(&self, cwd: &Path, command: &str) -> std::io::Result<File> {
        let mut log = File::create(cwd.join(self.adapter.execution_output_file()))?;
        writeln!(log, "{HEADER_RULER}")?;
        writeln!(log, "cd {}; {command}", cwd.display())?;
        writeln!(log, "{HEADER_RULER}")?;
        log.flush()?;
        Ok(log)
    }

    /// Persist the job state in order: fsynced return value first (it marks
    /// the job as done), then the argument line, then the failure artifact.
    fn persist(&self, cwd: &Path, job: &JobDescriptor, exit_code: i32, class: ExitClass) {
        if let Err(err) = state::write_return_value(cwd, self.adapter, exit_code) {
            error!("Failed to persist return value for {}: {err}", job.args);
        }
        if let Err(err) = state::write_args(cwd, &job.args) {
            error!("Failed to persist args for {}: {err}", job.args);
        }
        if !class.is_success() {
            let output = cwd.join(self.adapter.execution_output_file());
            let failed = cwd.join(self.adapter.failed_output_file());
            if let Err(err) = fs::copy(&output, &failed) {
                error!("Failed to write {}: {err}", failed.display());
            }
        }
    }

    /// After a successful job, remove everything except the canonical state
    /// files and the metrics artifact.
    fn clean_job_dir(&self, cwd: &Path) {
        let mut keep: Vec<String> = self.adapter.canonical_files();
        keep.push(self.adapter.results_file());
        if let Some(metrics) = self.adapter.metrics_artifact() {
            keep.push(metrics.to_string());
        }

        let entries = match fs::read_dir(cwd) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Could not clean {}: {err}", cwd.display());
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else if !keep.iter().any(|k| name.to_str() == Some(k)) {
                fs::remove_file(&path)
            } else {
                continue;
            };
            if let Err(err) = result {
                debug!("Could not remove {}: {err}", path.display());
            }
        }
    }
}

/// `pre_exec` hook: put the child in its own process group (so the tree can
/// be killed as one unit) and apply the rlimit envelope.
fn enter_group_with_limits(limits: &ResourceLimits) -> std::io::Result<()> {
    unsafe {
        if libc::setsid() == -1 {
            return Err(std::io::Error::last_os_error());
        }

        let fsize = libc::rlimit {
            rlim_cur: (limits.file_size_kb * 1024) as libc::rlim_t,
            rlim_max: (limits.file_size_kb * 1024) as libc::rlim_t,
        };
        if libc::setrlimit(libc::RLIMIT_FSIZE, &fsize) != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let vmem = libc::rlimit {
            rlim_cur: (limits.virtual_memory_kb * 1024) as libc::rlim_t,
            rlim_max: (limits.virtual_memory_kb * 1024) as libc::rlim_t,
        };
        if libc::setrlimit(libc::RLIMIT_AS, &vmem) != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let stack = libc::rlimit {
            rlim_cur: (limits.stack_kb * 1024) as libc::rlim_t,
            rlim_max: (limits.stack_kb * 1024) as libc::rlim_t,
        };
        if libc::setrlimit(libc::RLIMIT_STACK, &stack) != 0 {
            return Err(std::io::Error::last_os_error());
        }

        if let Some(secs) = limits.cpu_secs {
            let cpu = libc::rlimit {
                rlim_cur: secs as libc::rlim_t,
                rlim_max: secs as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
    }
    Ok(())
}
