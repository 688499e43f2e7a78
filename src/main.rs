//! benchrun - concurrent batch runner for external tool invocations
//!
//! Pulls an ordered job list through a fixed-size worker pool, runs every
//! job as a resource-limited, time-bounded subprocess, persists per-job
//! outcomes to durable per-directory state, and aggregates the output tree
//! bottom-up into consolidated pass/fail reports.
//!
//! ## Usage
//!
//! ```bash
//! # Characterize a device library on 8 workers
//! benchrun --tool /opt/panda/bin/eucalyptus --job-list jobs.txt -j 8
//!
//! # Resume a crashed run, stopping on the first new failure
//! benchrun --tool /opt/panda/bin/eucalyptus --job-list jobs.txt --restart --stop
//!
//! # Regression benchmarks with a 30 minute per-job timeout
//! benchrun --tool /opt/panda/bin/bambu --job-list jobs.txt -p benchmark -t 30m
//! ```

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod cli;
mod config;
mod executor;
mod models;
mod results;
mod state;
mod tool;
mod utils;

use cli::Args;
use config::{parse_timeout, ConfigFile, ResourceLimits, RunOptions};
use executor::{ProcessGroupKiller, RunContext, WorkerPool};
use models::JobDescriptor;
use results::{MetricsCompiler, ResultAggregator, StoredRunSummary};
use tool::{adapter_for_profile, ToolAdapter};
use utils::init_logger;

/// Exit code when the job list resolves to zero jobs.
const EXIT_NO_JOBS: u8 = 2;

/// Set by the SIGINT handler, observed by the watcher thread.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let config = match &args.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::load_default()?,
    };
    let options = build_options(args, &config)?;

    let profile = args
        .profile
        .clone()
        .or_else(|| config.profile.clone())
        .unwrap_or_else(|| "characterize".to_string());
    let adapter = adapter_for_profile(&profile)
        .with_context(|| format!("Unknown tool profile: {profile}"))?;

    if !args.tool.is_file() {
        bail!("{} does not exist", args.tool.display());
    }
    info!("Tool found: {}", args.tool.display());

    let jobs = read_job_list(&args.job_list)?;
    if jobs.is_empty() {
        error!("No jobs found in {}", args.job_list.display());
        return Ok(ExitCode::from(EXIT_NO_JOBS));
    }
    info!("Loaded {} jobs from {}", jobs.len(), args.job_list.display());

    let root = args.output.as_path();
    if args.restart {
        if !root.is_dir() {
            bail!(
                "Cannot restart: output directory {} does not exist",
                root.display()
            );
        }
        if state::RestartController::nothing_to_do(root) {
            info!("Previous run recorded zero failures, nothing to do");
            return Ok(ExitCode::SUCCESS);
        }
    } else {
        if root.exists() {
            bail!(
                "Output directory {} already exists (use --restart to resume)",
                root.display()
            );
        }
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create {}", root.display()))?;
    }

    prepare_run_root(root, &jobs, adapter.as_ref())?;

    let handler = handle_sigint as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }

    let started_at = Utc::now();
    let killer = ProcessGroupKiller;
    let ctx = Arc::new(RunContext::new(jobs.len(), options.workers));
    let watcher = spawn_interrupt_watcher(Arc::clone(&ctx));

    let pool = WorkerPool::new(&args.tool, root, &options, adapter.as_ref(), &killer);
    let summary = pool.run(&jobs, &ctx);

    watcher.stop();
    let aborted = ctx.abort_requested();

    state::write_failed_count(root, summary.failed())?;

    ResultAggregator::new(adapter.as_ref())
        .aggregate(root)
        .context("Result aggregation failed")?;

    StoredRunSummary::new(
        &profile,
        &args.tool,
        started_at,
        options.workers,
        summary,
        aborted,
    )
    .save(root)?;

    if aborted {
        warn!("Run was aborted, skipping metrics compilation");
    } else if let Some(summarizer) = &args.summarizer {
        let compiler =
            MetricsCompiler::new(summarizer, adapter.as_ref(), args.baseline.as_deref());
        if let Err(err) = compiler.compile(root) {
            error!("Metrics compilation failed: {err:#}");
        }
    }

    if aborted || (options.fail_fast && summary.failed() > 0) {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Merge CLI arguments over config-file defaults into the run options.
/// A flag given on the command line always wins, even when it repeats the
/// built-in default.
fn build_options(args: &Args, config: &ConfigFile) -> Result<RunOptions> {
    let workers = args.jobs.or(config.workers).unwrap_or(1);

    let timeout = parse_timeout(
        args.timeout
            .as_deref()
            .or(config.timeout.as_deref())
            .unwrap_or("1440m"),
    )?;

    let mut limits = config.limits.unwrap_or_default();
    if let Some(kb) = args.max_file_size {
        limits.file_size_kb = kb;
    }
    if let Some(kb) = args.max_memory {
        limits.virtual_memory_kb = kb;
    }
    if let Some(kb) = args.max_stack {
        limits.stack_kb = kb;
    }
    if let Some(secs) = args.max_cpu {
        limits.cpu_secs = Some(secs);
    }

    Ok(RunOptions {
        workers: workers.max(1),
        timeout,
        fail_fast: args.stop,
        restart: args.restart,
        clean: !args.no_clean,
        limits,
    })
}

/// Read the ordered job list, one argument line per job. Blank lines and
/// `#` comments are ignored; positions are 1-based over the kept lines.
fn read_job_list(path: &Path) -> Result<Vec<JobDescriptor>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job list {}", path.display()))?;
    let jobs = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(i, line)| JobDescriptor::new(i + 1, line))
        .collect();
    Ok(jobs)
}

/// Persist the expanded job list at the run root and create every job
/// directory up front.
fn prepare_run_root(root: &Path, jobs: &[JobDescriptor], adapter: &dyn ToolAdapter) -> Result<()> {
    let list_path = root.join("job_list");
    let mut content = String::new();
    for job in jobs {
        content.push_str(&job.args);
        content.push('\n');
    }
    std::fs::write(&list_path, content)
        .with_context(|| format!("Failed to write {}", list_path.display()))?;

    for job in jobs {
        let dir = root.join(adapter.job_dir(&job.args));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create job directory {}", dir.display()))?;
    }
    Ok(())
}

/// Watches the interrupt flag while the pool runs; on SIGINT it broadcasts
/// the abort so live jobs die and no new ones start.
struct InterruptWatcher {
    done: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<()>,
}

impl InterruptWatcher {
    fn stop(self) {
        self.done.store(true, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

fn spawn_interrupt_watcher(ctx: Arc<RunContext>) -> InterruptWatcher {
    let done = Arc::new(AtomicBool::new(false));
    let done_flag = Arc::clone(&done);
    let handle = std::thread::spawn(move || {
        while !done_flag.load(Ordering::SeqCst) {
            if INTERRUPTED.load(Ordering::SeqCst) && !ctx.abort_requested() {
                warn!("Interrupt received, aborting run");
                ctx.abort_and_kill(&ProcessGroupKiller);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    });
    InterruptWatcher { done, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_job_list_skips_blank_and_comment_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.txt");
        std::fs::write(&path, "job one\n\n# comment\njob two\n").unwrap();

        let jobs = read_job_list(&path).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0], JobDescriptor::new(1, "job one"));
        assert_eq!(jobs[1], JobDescriptor::new(2, "job two"));
    }

    #[test]
    fn test_build_options_cli_overrides_config() {
        let args = Args::parse_from([
            "benchrun",
            "--tool",
            "/opt/tool",
            "--job-list",
            "jobs.txt",
            "-j",
            "4",
            "--max-memory",
            "1048576",
        ]);
        let config = ConfigFile {
            workers: Some(16),
            timeout: Some("10m".to_string()),
            limits: None,
            profile: None,
        };

        let options = build_options(&args, &config).unwrap();
        assert_eq!(options.workers, 4);
        assert_eq!(options.timeout, Duration::from_secs(600));
        assert_eq!(options.limits.virtual_memory_kb, 1_048_576);
        assert_eq!(options.limits.file_size_kb, ResourceLimits::default().file_size_kb);
    }

    #[test]
    fn test_build_options_explicit_default_beats_config() {
        let args = Args::parse_from([
            "benchrun",
            "--tool",
            "/opt/tool",
            "--job-list",
            "jobs.txt",
            "-j",
            "1",
            "-t",
            "1440m",
        ]);
        let config = ConfigFile {
            workers: Some(16),
            timeout: Some("10m".to_string()),
            limits: None,
            profile: None,
        };

        // Spelling out the built-in default on the command line still
        // overrides the config file.
        let options = build_options(&args, &config).unwrap();
        assert_eq!(options.workers, 1);
        assert_eq!(options.timeout, Duration::from_secs(1440 * 60));
    }

    #[test]
    fn test_build_options_config_fills_defaults() {
        let args = Args::parse_from(["benchrun", "--tool", "/opt/tool", "--job-list", "jobs.txt"]);
        let config = ConfigFile {
            workers: Some(16),
            timeout: None,
            limits: None,
            profile: None,
        };

        let options = build_options(&args, &config).unwrap();
        assert_eq!(options.workers, 16);
        assert_eq!(options.timeout, Duration::from_secs(1440 * 60));
        assert!(options.clean);
        assert!(!options.fail_fast);
    }

    #[test]
    fn test_prepare_run_root_creates_job_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("run");
        std::fs::create_dir(&root).unwrap();
        let jobs = vec![
            JobDescriptor::new(1, "--target-datafile=dev-seed.xml --characterize=plus_expr"),
            JobDescriptor::new(2, "--target-datafile=dev-seed.xml --characterize=mult_expr"),
        ];

        prepare_run_root(&root, &jobs, &tool::CharacterizeAdapter).unwrap();

        assert!(root.join("job_list").is_file());
        assert!(root.join("dev/plus_expr").is_dir());
        assert!(root.join("dev/mult_expr").is_dir());
        let list = std::fs::read_to_string(root.join("job_list")).unwrap();
        assert_eq!(list.lines().count(), 2);
    }
}
