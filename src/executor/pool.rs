//! Worker pool
//!
//! A fixed set of OS threads pulls job indices from the shared cursor and
//! runs them to completion. Workers are plain scoped threads: a job is a
//! blocking subprocess wait, and a worker must stay preemptible so the
//! abort broadcast can reach its child mid-run.

use std::path::Path;
use tracing::{debug, info};

use super::context::RunContext;
use super::process_tree::ProcessKiller;
use super::runner::JobRunner;
use crate::config::RunOptions;
use crate::models::{JobDescriptor, RunSummary};
use crate::tool::ToolAdapter;

/// Runs an ordered job list over a fixed number of worker threads.
pub struct WorkerPool<'a> {
    tool: &'a Path,
    root: &'a Path,
    options: &'a RunOptions,
    adapter: &'a dyn ToolAdapter,
    killer: &'a dyn ProcessKiller,
}

impl<'a> WorkerPool<'a> {
    pub fn new(
        tool: &'a Path,
        root: &'a Path,
        options: &'a RunOptions,
        adapter: &'a dyn ToolAdapter,
        killer: &'a dyn ProcessKiller,
    ) -> Self {
        Self {
            tool,
            root,
            options,
            adapter,
            killer,
        }
    }

    /// Execute every job in `jobs`, in list order of claiming, and return
    /// the final counters. Blocks until all workers have exited.
    pub fn run(&self, jobs: &[JobDescriptor], ctx: &RunContext) -> RunSummary {
        let workers = self.options.workers.max(1);
        info!("Running {} jobs on {} workers", jobs.len(), workers);

        std::thread::scope(|scope| {
            for worker in 0..workers {
                scope.spawn(move || self.worker_loop(jobs, ctx, worker));
            }
        });

        let summary = ctx.summary();
        info!("Run complete: {summary}");
        summary
    }

    fn worker_loop(&self, jobs: &[JobDescriptor], ctx: &RunContext, worker: usize) {
        let runner = JobRunner::new(
            self.tool,
            self.root,
            self.options,
            self.adapter,
            self.killer,
            ctx,
        );
        while let Some(index) = ctx.claim() {
            let job = &jobs[index];
            debug!("Worker {worker} claimed job {job}");
            if runner.execute(job, worker).is_none() {
                break;
            }
        }
        debug!("Worker {worker} done");
    }
}
