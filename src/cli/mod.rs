//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::Parser;
use std::path::PathBuf;

/// Concurrent batch runner for external tool invocations
#[derive(Parser, Debug)]
#[command(name = "benchrun")]
#[command(version = "0.1.0")]
#[command(about = "Run a job list through a worker pool and aggregate the results")]
#[command(long_about = None)]
pub struct Args {
    /// Path of the tool executable to invoke for every job
    #[arg(long)]
    pub tool: PathBuf,

    /// File with one argument line per job
    #[arg(long)]
    pub job_list: PathBuf,

    /// Directory where output files will be put
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Number of jobs executed concurrently (default 1)
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// Timeout per job (30s, 90m, 2h; bare numbers are minutes; default 1440m)
    #[arg(short, long)]
    pub timeout: Option<String>,

    /// Tool profile (characterize, benchmark; default characterize)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Resume the last execution, skipping recorded successes
    #[arg(long)]
    pub restart: bool,

    /// Stop the whole run on the first error
    #[arg(long)]
    pub stop: bool,

    /// Do not clean produced files after successful jobs
    #[arg(long)]
    pub no_clean: bool,

    /// Summarizer executable compiling per-job metrics files
    #[arg(long)]
    pub summarizer: Option<PathBuf>,

    /// Prior consolidated metrics document fed to the summarizer
    #[arg(long)]
    pub baseline: Option<PathBuf>,

    /// Output file-size limit per job, in KB
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Virtual-memory limit per job, in KB
    #[arg(long)]
    pub max_memory: Option<u64>,

    /// Stack limit per job, in KB
    #[arg(long)]
    pub max_stack: Option<u64>,

    /// CPU-time limit per job, in seconds
    #[arg(long)]
    pub max_cpu: Option<u64>,

    /// Config file with run defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}
